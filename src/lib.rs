//! 3 種類の排他制御 (CAS スピンロック、test-and-set スピンロック、ブロッキング Mutex) で
//! 共有カウンタを順番に進め、そのスループットを比較する。

pub mod config;
pub mod counter;
pub mod harness;
pub mod mutex;
pub mod report;
pub mod spinlock;

pub use config::Config;
pub use counter::{Strategy, TurnCounter};
pub use harness::{run, HarnessError, Outcome};
pub use report::{run_suite, Measurement};
