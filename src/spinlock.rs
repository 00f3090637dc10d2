use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::Ordering::*;
use std::sync::atomic::{AtomicBool, AtomicU32};

const FREE: u32 = 0;
const HELD: u32 = 1;

/// 汎用の compare-and-swap で状態セルを FREE -> HELD に遷移させるスピンロック。
///
/// 取得に失敗したら即座にリトライする (バックオフも yield もしない)。
pub struct CasSpinLock<T> {
    /// 0: FREE, 1: HELD
    state: AtomicU32,
    value: UnsafeCell<T>,
}

unsafe impl<T> Sync for CasSpinLock<T> where T: Send {}

pub struct CasSpinGuard<'a, T> {
    lock: &'a CasSpinLock<T>,
}

unsafe impl<T> Sync for CasSpinGuard<'_, T> where T: Sync {}

impl<T> CasSpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            state: AtomicU32::new(FREE),
            value: UnsafeCell::new(value),
        }
    }

    pub fn lock(&self) -> CasSpinGuard<T> {
        // 失敗側は何も読まないので Relaxed で良い
        while self
            .state
            .compare_exchange_weak(FREE, HELD, Acquire, Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }
        CasSpinGuard { lock: self }
    }

    #[cfg(test)]
    fn is_locked(&self) -> bool {
        self.state.load(Relaxed) == HELD
    }

    #[cfg(test)]
    fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T> Deref for CasSpinGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // 安全性:ガードが存在する = ロックを排他的に保持している
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for CasSpinGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for CasSpinGuard<'_, T> {
    fn drop(&mut self) {
        // 保護領域内の書き込みは、次に Acquire で取得したスレッドから見える
        self.lock.state.store(FREE, Release);
    }
}

/// test-and-set 専用のフラグで作るスピンロック。
pub struct FlagSpinLock<T> {
    locked: AtomicBool,
    value: UnsafeCell<T>,
}

unsafe impl<T> Sync for FlagSpinLock<T> where T: Send {}

pub struct FlagSpinGuard<'a, T> {
    lock: &'a FlagSpinLock<T>,
}

unsafe impl<T> Sync for FlagSpinGuard<'_, T> where T: Sync {}

impl<T> FlagSpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    pub fn lock(&self) -> FlagSpinGuard<T> {
        // swap(true) が test-and-set。直前の値が false ならロックを取れた
        while self.locked.swap(true, Acquire) {
            std::hint::spin_loop();
        }
        FlagSpinGuard { lock: self }
    }

    #[cfg(test)]
    fn is_locked(&self) -> bool {
        self.locked.load(Relaxed)
    }

    #[cfg(test)]
    fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T> Deref for FlagSpinGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for FlagSpinGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for FlagSpinGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Release);
    }
}

#[cfg(test)]
use std::sync::atomic::AtomicUsize;
#[cfg(test)]
use std::thread;

/// 保護領域に同時に入っているスレッド数を数え、1 を超えないことを確認する
#[cfg(test)]
fn assert_exclusive<G: DerefMut<Target = u64>>(lock: impl Fn() -> G + Sync) -> u64 {
    const ROUNDS: u64 = 20_000;
    // コア数を超えてスピンさせると、保持者が横取りされるたびにタイムスライス分止まる
    let threads = crate::config::detect_threads().get().clamp(2, 8);

    let inside = AtomicUsize::new(0);
    let peak = AtomicUsize::new(0);
    let total = thread::scope(|s| {
        for _ in 0..threads {
            s.spawn(|| {
                for _ in 0..ROUNDS {
                    let mut guard = lock();
                    let now = inside.fetch_add(1, Relaxed) + 1;
                    peak.fetch_max(now, Relaxed);
                    // 非アトミックな read-modify-write。排他が壊れていれば取りこぼす
                    let v = *guard;
                    *guard = v + 1;
                    inside.fetch_sub(1, Relaxed);
                }
            });
        }
        threads as u64 * ROUNDS
    });
    assert_eq!(peak.load(Relaxed), 1);
    total
}

#[test]
#[serial_test::serial]
fn test_cas_spin_lock_exclusive() {
    let lock = CasSpinLock::new(0u64);
    let expected = assert_exclusive(|| lock.lock());
    assert!(!lock.is_locked());
    assert_eq!(lock.into_inner(), expected);
}

#[test]
#[serial_test::serial]
fn test_flag_spin_lock_exclusive() {
    let lock = FlagSpinLock::new(0u64);
    let expected = assert_exclusive(|| lock.lock());
    assert!(!lock.is_locked());
    assert_eq!(lock.into_inner(), expected);
}

#[test]
fn test_guard_releases_on_drop() {
    let cas = CasSpinLock::new(1);
    let flag = FlagSpinLock::new(1);
    {
        let _a = cas.lock();
        let _b = flag.lock();
        assert!(cas.is_locked());
        assert!(flag.is_locked());
    }
    assert!(!cas.is_locked());
    assert!(!flag.is_locked());
}
