use std::fmt;
use std::num::NonZeroUsize;

use log::debug;

use crate::config::Config;
use crate::counter::Strategy;
use crate::harness::{self, HarnessError, Outcome};

/// スレッド数の倍率。基準値と 2 倍で測る
pub const THREAD_MULTIPLIERS: [usize; 2] = [1, 2];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Measurement {
    pub strategy: Strategy,
    pub threads: NonZeroUsize,
    pub target: u64,
    pub outcome: Outcome,
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "execution time: {}ms ({}, threads = {}, count = {})",
            self.outcome.millis(),
            self.strategy,
            self.threads,
            self.target
        )
    }
}

pub fn started_banner(config: &Config) -> String {
    format!("lstest started (CPU cores: {})", config.threads)
}

pub fn stopped_banner() -> &'static str {
    "lstest stopped"
}

/// 方式 x 倍率 の 6 ランを順番に実行する。
/// 各ランでカウンタは新しく作り、終わるたびに `on_measurement` を呼ぶ。
pub fn run_suite<F>(config: &Config, mut on_measurement: F) -> Result<Vec<Measurement>, HarnessError>
where
    F: FnMut(&Measurement),
{
    let mut measurements = Vec::with_capacity(Strategy::ALL.len() * THREAD_MULTIPLIERS.len());

    for strategy in Strategy::ALL {
        for multiplier in THREAD_MULTIPLIERS {
            let threads = config.threads.saturating_mul(nonzero(multiplier));
            debug!("run: {strategy}, threads = {threads}");

            let counter = strategy.counter();
            let outcome = harness::run(threads, config.target, &counter)?;

            let measurement = Measurement {
                strategy,
                threads,
                target: config.target,
                outcome,
            };
            on_measurement(&measurement);
            measurements.push(measurement);
        }
    }

    Ok(measurements)
}

fn nonzero(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap_or(NonZeroUsize::MIN)
}

#[test]
fn test_measurement_line() {
    use std::time::Duration;

    let m = Measurement {
        strategy: Strategy::FlagSpin,
        threads: NonZeroUsize::new(8).unwrap(),
        target: 1_000_000,
        outcome: Outcome {
            elapsed: Duration::from_millis(1234),
            final_value: 1_000_003,
        },
    };
    assert_eq!(
        m.to_string(),
        "execution time: 1234ms (flag spinlock, threads = 8, count = 1000000)"
    );
}

#[test]
fn test_banners() {
    let config = Config {
        target: 10,
        threads: NonZeroUsize::new(4).unwrap(),
    };
    assert_eq!(started_banner(&config), "lstest started (CPU cores: 4)");
    assert_eq!(stopped_banner(), "lstest stopped");
}

#[test]
#[serial_test::serial]
fn test_suite_order_and_threads() {
    // 2 倍にしてもコア数を超えないようにする (1 コアだけは超えるので目標を小さく)
    let base = (crate::config::detect_threads().get() / 2).max(1);
    let config = Config {
        target: 4,
        threads: NonZeroUsize::new(base).unwrap(),
    };
    let mut seen = 0;
    let measurements = run_suite(&config, |_| seen += 1).unwrap();
    assert_eq!(seen, 6);

    let plan: Vec<(Strategy, usize)> = measurements
        .iter()
        .map(|m| (m.strategy, m.threads.get()))
        .collect();
    assert_eq!(
        plan,
        [
            (Strategy::CasSpin, base),
            (Strategy::CasSpin, base * 2),
            (Strategy::FlagSpin, base),
            (Strategy::FlagSpin, base * 2),
            (Strategy::Mutex, base),
            (Strategy::Mutex, base * 2),
        ]
    );
    for m in &measurements {
        assert_eq!(m.target, 4);
        assert!(m.outcome.final_value >= 4);
        assert!(m.outcome.final_value <= 4 + m.threads.get() as u64);
    }
}
