use std::num::NonZeroUsize;
use std::thread;

use log::warn;

/// 引数がない、または不正なときのカウント目標
pub const DEFAULT_TARGET: u64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// カウンタをここまで進める
    pub target: u64,
    /// 基準のスレッド数 (検出した CPU 数)
    pub threads: NonZeroUsize,
}

impl Config {
    /// 第 1 引数 (プログラム名の次) を目標カウントとして読む。
    /// 読めなければ黙ってデフォルトにする。
    pub fn from_args<I>(args: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let target = match args.into_iter().nth(1) {
            Some(arg) => parse_target(&arg).unwrap_or_else(|| {
                warn!("invalid count {arg:?}, using {DEFAULT_TARGET}");
                DEFAULT_TARGET
            }),
            None => DEFAULT_TARGET,
        };

        Self {
            target,
            threads: detect_threads(),
        }
    }
}

/// 非負の整数だけを受け付ける
pub fn parse_target(arg: &str) -> Option<u64> {
    arg.trim().parse().ok()
}

pub fn detect_threads() -> NonZeroUsize {
    thread::available_parallelism().unwrap_or_else(|e| {
        warn!("failed to detect CPU count ({e}), defaulting to 1");
        NonZeroUsize::MIN
    })
}

#[cfg(test)]
fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_default_when_missing() {
    let config = Config::from_args(args(&["lstest"]));
    assert_eq!(config.target, DEFAULT_TARGET);
    assert_eq!(config.threads, detect_threads());
}

#[test]
fn test_reads_first_argument() {
    assert_eq!(Config::from_args(args(&["lstest", "5000"])).target, 5000);
    assert_eq!(Config::from_args(args(&["lstest", "0", "9"])).target, 0);
}

#[test]
fn test_invalid_falls_back() {
    for bad in ["-5", "abc", "", "1.5", "12abc", "99999999999999999999999"] {
        let config = Config::from_args(args(&["lstest", bad]));
        assert_eq!(config.target, DEFAULT_TARGET, "{bad:?}");
    }
}

#[test]
fn test_parse_target() {
    assert_eq!(parse_target(" 42 "), Some(42));
    assert_eq!(parse_target("-1"), None);
}
