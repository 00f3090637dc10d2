use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering::*;

use atomic_wait::{wait, wake_one};

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;
/// ロック中で、futex で寝ているスレッドがいるかもしれない
const CONTENDED: u32 = 2;

/// 取れなければその場でスレッドを寝かせるロック。ビジーループはしない。
///
/// 解放時に起こすのは高々 1 スレッド。起こす順番に公平性の保証はない。
pub struct Mutex<T> {
    state: AtomicU32,
    value: UnsafeCell<T>,
}

unsafe impl<T> Sync for Mutex<T> where T: Send {}

pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
}

unsafe impl<T> Sync for MutexGuard<'_, T> where T: Sync {}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.mutex.value.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.value.get() }
    }
}

impl<T> Mutex<T> {
    pub const fn new(value: T) -> Self {
        Self {
            state: AtomicU32::new(UNLOCKED),
            value: UnsafeCell::new(value),
        }
    }

    pub fn lock(&self) -> MutexGuard<T> {
        if self
            .state
            .compare_exchange(UNLOCKED, LOCKED, Acquire, Relaxed)
            .is_err()
        {
            block_until_acquired(&self.state);
        }
        MutexGuard { mutex: self }
    }

    #[cfg(test)]
    fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

fn block_until_acquired(state: &AtomicU32) {
    // 取れたときも CONTENDED のまま持つ。他に寝ているスレッドを解放時に取りこぼさないため
    while state.swap(CONTENDED, Acquire) != UNLOCKED {
        wait(state, CONTENDED);
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        // LOCKED からの解放なら誰も寝ていないので syscall は不要
        if self.mutex.state.swap(UNLOCKED, Release) == CONTENDED {
            wake_one(&self.mutex.state);
        }
    }
}

#[cfg(test)]
use std::thread;
#[cfg(test)]
use std::time::Duration;

#[test]
fn test_mutex_exclusive() {
    use std::sync::atomic::AtomicUsize;

    let mutex = Mutex::new(0u64);
    let inside = AtomicUsize::new(0);
    let peak = AtomicUsize::new(0);

    thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                for _ in 0..20_000 {
                    let mut guard = mutex.lock();
                    let now = inside.fetch_add(1, Relaxed) + 1;
                    peak.fetch_max(now, Relaxed);
                    let v = *guard;
                    *guard = v + 1;
                    inside.fetch_sub(1, Relaxed);
                }
            });
        }
    });

    assert_eq!(peak.load(Relaxed), 1);
    assert_eq!(mutex.into_inner(), 8 * 20_000);
}

#[test]
fn test_mutex_wakes_waiter() {
    let mutex = Mutex::new(0);

    thread::scope(|s| {
        let mut guard = mutex.lock();
        let waiter = s.spawn(|| *mutex.lock());
        // waiter が寝るまで待つ
        while mutex.state.load(Relaxed) != CONTENDED {
            thread::sleep(Duration::from_millis(1));
        }
        *guard = 7;
        drop(guard);
        assert_eq!(waiter.join().unwrap(), 7);
    });

    assert_eq!(mutex.state.load(Relaxed), UNLOCKED);
}

#[test]
fn test_uncontended_lock_never_marks_waiters() {
    let mutex = Mutex::new(());
    {
        let _guard = mutex.lock();
        assert_eq!(mutex.state.load(Relaxed), LOCKED);
    }
    assert_eq!(mutex.state.load(Relaxed), UNLOCKED);
}
