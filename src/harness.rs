use std::io;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::debug;
use thiserror::Error;

use crate::counter::TurnCounter;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("failed to spawn worker {index}")]
    Spawn {
        index: usize,
        #[source]
        source: io::Error,
    },

    #[error("worker {index} panicked")]
    WorkerPanicked { index: usize },
}

/// 1 回のランの結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub elapsed: Duration,
    /// ランが終わった時点のカウンタの値
    pub final_value: u64,
}

impl Outcome {
    /// 経過時間 (ミリ秒、切り捨て)
    pub fn millis(&self) -> u128 {
        self.elapsed.as_millis()
    }
}

/// 返ってきた値が `target` 以上になるまで `turn_increment` を呼び続ける。
/// 少なくとも 1 回は呼ぶ。最後に見た値を返す。
pub fn worker(counter: &dyn TurnCounter, total_threads: usize, my_index: usize, target: u64) -> u64 {
    loop {
        let value = counter.turn_increment(total_threads, my_index);
        if value >= target {
            return value;
        }
    }
}

/// `threads` 個のワーカーを起動し、全員が終わるまでの時間を測る。
///
/// 各ワーカーには `0..threads` の固有の番号と、同じ `counter` への参照を渡す。
/// 起動失敗もワーカーのパニックも致命的なので、そのままエラーで返す。
pub fn run(
    threads: NonZeroUsize,
    target: u64,
    counter: &Arc<dyn TurnCounter>,
) -> Result<Outcome, HarnessError> {
    let total = threads.get();
    debug!("starting {total} workers (target = {target})");

    let start = Instant::now();

    let mut handles = Vec::with_capacity(total);
    for index in 0..total {
        let counter = Arc::clone(counter);
        let handle = thread::Builder::new()
            .name(format!("lstest-worker-{index}"))
            .spawn(move || worker(&*counter, total, index, target))
            .map_err(|source| HarnessError::Spawn { index, source })?;
        handles.push(handle);
    }

    let mut final_value = 0;
    for (index, handle) in handles.into_iter().enumerate() {
        let last = handle
            .join()
            .map_err(|_| HarnessError::WorkerPanicked { index })?;
        final_value = final_value.max(last);
    }

    let elapsed = start.elapsed();
    debug!("joined {total} workers in {elapsed:?} (final value = {final_value})");

    Ok(Outcome {
        elapsed,
        final_value,
    })
}

#[cfg(test)]
use crate::counter::Strategy;

#[cfg(test)]
fn nz(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap()
}

/// スピン方式はコア数までに抑える。超えると 1 ターンごとにタイムスライス待ちになる
#[cfg(test)]
fn threads_for(strategy: Strategy, wanted: usize) -> NonZeroUsize {
    if strategy.busy_waits() {
        nz(wanted.min(crate::config::detect_threads().get()))
    } else {
        nz(wanted)
    }
}

#[test]
fn test_worker_calls_at_least_once() {
    let counter = Strategy::CasSpin.counter();
    // target 0 でも 1 回は呼ぶので、index 0 の番なら進む
    assert_eq!(worker(&*counter, 2, 0, 0), 1);
    assert_eq!(worker(&*counter, 2, 0, 0), 1);
}

#[test]
#[serial_test::serial]
fn test_single_worker_reaches_target_exactly() {
    for strategy in Strategy::ALL {
        let outcome = run(nz(1), 10, &strategy.counter()).unwrap();
        assert_eq!(outcome.final_value, 10);
    }
}

#[test]
#[serial_test::serial]
fn test_run_terminates_in_bounds() {
    for strategy in Strategy::ALL {
        for wanted in [2, 3, 4] {
            let threads = threads_for(strategy, wanted);
            let outcome = run(threads, 1_000, &strategy.counter()).unwrap();
            assert!(outcome.final_value >= 1_000);
            // 各ワーカーは target 到達後に高々 1 回しか進められない
            assert!(outcome.final_value <= 1_000 + threads.get() as u64);
        }
    }
}

#[test]
fn test_spin_threads_capped_at_cores() {
    let cores = crate::config::detect_threads().get();
    assert_eq!(threads_for(Strategy::CasSpin, cores * 2).get(), cores);
    assert_eq!(threads_for(Strategy::FlagSpin, cores * 2).get(), cores);
    assert_eq!(threads_for(Strategy::Mutex, cores * 2).get(), cores * 2);
}

#[test]
#[serial_test::serial]
fn test_mutex_oversubscribed() {
    let threads = nz(crate::config::detect_threads().get() * 2);
    let outcome = run(threads, 200, &Strategy::Mutex.counter()).unwrap();
    assert!(outcome.final_value >= 200);
    assert!(outcome.final_value <= 200 + threads.get() as u64);
}

#[test]
fn test_millis_truncates() {
    let outcome = Outcome {
        elapsed: Duration::from_micros(2_999),
        final_value: 0,
    };
    assert_eq!(outcome.millis(), 2);
}
