use std::fmt;
use std::sync::Arc;

use crate::mutex::Mutex;
use crate::spinlock::{CasSpinLock, FlagSpinLock};

/// 複数スレッドが順番にインクリメントする共有カウンタ。
///
/// `turn_increment` は排他区間内で `value % total_threads == my_index`
/// のときだけ値を 1 増やし、(更新後の) 値のコピーを返す。
/// 自分の番でなければ値は変わらない。
pub trait TurnCounter: Send + Sync {
    /// `total_threads` は 1 以上、`my_index` は `total_threads` 未満でなければならない。
    fn turn_increment(&self, total_threads: usize, my_index: usize) -> u64;
}

/// 保護領域で行う処理。3 つの実装で共通。
#[inline]
fn take_turn(value: &mut u64, total_threads: usize, my_index: usize) -> u64 {
    debug_assert!(total_threads > 0);
    debug_assert!(my_index < total_threads);
    if *value % total_threads as u64 == my_index as u64 {
        *value += 1;
    }
    *value
}

/// CAS スピンロックで守るカウンタ
pub struct SpinCounter {
    value: CasSpinLock<u64>,
}

impl SpinCounter {
    pub const fn new() -> Self {
        Self {
            value: CasSpinLock::new(0),
        }
    }
}

impl Default for SpinCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnCounter for SpinCounter {
    fn turn_increment(&self, total_threads: usize, my_index: usize) -> u64 {
        take_turn(&mut self.value.lock(), total_threads, my_index)
    }
}

/// test-and-set フラグのスピンロックで守るカウンタ
pub struct FlagCounter {
    value: FlagSpinLock<u64>,
}

impl FlagCounter {
    pub const fn new() -> Self {
        Self {
            value: FlagSpinLock::new(0),
        }
    }
}

impl Default for FlagCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnCounter for FlagCounter {
    fn turn_increment(&self, total_threads: usize, my_index: usize) -> u64 {
        take_turn(&mut self.value.lock(), total_threads, my_index)
    }
}

/// ブロッキング Mutex で守るカウンタ
pub struct MutexCounter {
    value: Mutex<u64>,
}

impl MutexCounter {
    pub const fn new() -> Self {
        Self {
            value: Mutex::new(0),
        }
    }
}

impl Default for MutexCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnCounter for MutexCounter {
    fn turn_increment(&self, total_threads: usize, my_index: usize) -> u64 {
        take_turn(&mut self.value.lock(), total_threads, my_index)
    }
}

/// 排他の方式。この 3 つ以外はない。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    CasSpin,
    FlagSpin,
    Mutex,
}

impl Strategy {
    /// レポートに出す順
    pub const ALL: [Strategy; 3] = [Strategy::CasSpin, Strategy::FlagSpin, Strategy::Mutex];

    pub fn label(self) -> &'static str {
        match self {
            Strategy::CasSpin => "cas spinlock",
            Strategy::FlagSpin => "flag spinlock",
            Strategy::Mutex => "mutex",
        }
    }

    /// 待っている間も CPU を使い続ける方式か
    pub fn busy_waits(self) -> bool {
        !matches!(self, Strategy::Mutex)
    }

    /// 値 0 の新しいカウンタを作る。ラン毎に作り直すこと。
    pub fn counter(self) -> Arc<dyn TurnCounter> {
        match self {
            Strategy::CasSpin => Arc::new(SpinCounter::new()),
            Strategy::FlagSpin => Arc::new(FlagCounter::new()),
            Strategy::Mutex => Arc::new(MutexCounter::new()),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[test]
fn test_increments_only_on_own_turn() {
    for strategy in Strategy::ALL {
        let counter = strategy.counter();
        // 0 は index 0 の番
        assert_eq!(counter.turn_increment(3, 1), 0);
        assert_eq!(counter.turn_increment(3, 2), 0);
        assert_eq!(counter.turn_increment(3, 0), 1);
        // もう index 0 の番ではない
        assert_eq!(counter.turn_increment(3, 0), 1);
        assert_eq!(counter.turn_increment(3, 1), 2);
        assert_eq!(counter.turn_increment(3, 2), 3);
        assert_eq!(counter.turn_increment(3, 0), 4);
    }
}

#[test]
fn test_single_thread_always_has_the_turn() {
    for strategy in Strategy::ALL {
        let counter = strategy.counter();
        let values: Vec<u64> = (0..10).map(|_| counter.turn_increment(1, 0)).collect();
        assert_eq!(values, (1..=10).collect::<Vec<u64>>());
    }
}

#[test]
fn test_fresh_counter_per_call() {
    let a = Strategy::Mutex.counter();
    a.turn_increment(1, 0);
    let b = Strategy::Mutex.counter();
    assert_eq!(b.turn_increment(2, 1), 0);
}

#[test]
fn test_labels() {
    let labels: Vec<String> = Strategy::ALL.iter().map(|s| s.to_string()).collect();
    assert_eq!(labels, ["cas spinlock", "flag spinlock", "mutex"]);
}

#[test]
fn test_only_mutex_blocks() {
    let spinning: Vec<Strategy> = Strategy::ALL.into_iter().filter(|s| s.busy_waits()).collect();
    assert_eq!(spinning, [Strategy::CasSpin, Strategy::FlagSpin]);
}
