//! Isolate entry lock
//!
//! An isolate may only be entered by one thread at a time. Every host call
//! into the engine holds an [`EntryGuard`]; the lock is re-entrant for the
//! owning thread so host code running inside a callback can call back into
//! the same isolate.
//!
//! Engine → host dispatch takes a [`SuspendGuard`], which gives the isolate
//! up for the duration of the host callback and takes it back, at the saved
//! depth, before control returns to the engine.

use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct PinState {
    owner: Option<ThreadId>,
    depth: usize,
}

/// Re-entrant single-permit lock pinning a thread to an isolate
#[derive(Debug, Default)]
pub(crate) struct EntryLock {
    state: Mutex<PinState>,
    released: Condvar,
}

impl EntryLock {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Pin the current thread, waiting while another thread holds the isolate
    pub(crate) fn enter(&self) -> EntryGuard<'_> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        while matches!(state.owner, Some(owner) if owner != me) {
            self.released.wait(&mut state);
        }
        state.owner = Some(me);
        state.depth += 1;
        EntryGuard { lock: self }
    }

    /// Release the pin held by the current thread until the guard drops.
    ///
    /// A thread that does not hold the pin gets a guard that does nothing.
    pub(crate) fn suspend(&self) -> SuspendGuard<'_> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.owner != Some(me) {
            return SuspendGuard { lock: self, depth: 0 };
        }
        let depth = std::mem::take(&mut state.depth);
        state.owner = None;
        self.released.notify_all();
        SuspendGuard { lock: self, depth }
    }

    /// True when the current thread holds the pin
    #[cfg(test)]
    pub(crate) fn is_held_by_current(&self) -> bool {
        self.state.lock().owner == Some(thread::current().id())
    }
}

/// Pin held by a host → engine call
pub(crate) struct EntryGuard<'a> {
    lock: &'a EntryLock,
}

impl Drop for EntryGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.lock.state.lock();
        state.depth -= 1;
        if state.depth == 0 {
            state.owner = None;
            self.lock.released.notify_all();
        }
    }
}

/// Pin given up by an engine → host dispatch
pub(crate) struct SuspendGuard<'a> {
    lock: &'a EntryLock,
    depth: usize,
}

impl Drop for SuspendGuard<'_> {
    fn drop(&mut self) {
        if self.depth == 0 {
            return;
        }
        let me = thread::current().id();
        let mut state = self.lock.state.lock();
        while matches!(state.owner, Some(owner) if owner != me) {
            self.lock.released.wait(&mut state);
        }
        state.owner = Some(me);
        state.depth = self.depth;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_enter_is_reentrant() {
        let lock = EntryLock::new();
        let outer = lock.enter();
        let inner = lock.enter();
        assert!(lock.is_held_by_current());
        drop(inner);
        assert!(lock.is_held_by_current());
        drop(outer);
        assert!(!lock.is_held_by_current());
    }

    #[test]
    fn test_suspend_releases_and_restores_depth() {
        let lock = EntryLock::new();
        let _outer = lock.enter();
        let _inner = lock.enter();
        {
            let _suspended = lock.suspend();
            assert!(!lock.is_held_by_current());
            // Host code inside the callback re-enters and leaves.
            let nested = lock.enter();
            drop(nested);
            assert!(!lock.is_held_by_current());
        }
        assert!(lock.is_held_by_current());
        assert_eq!(lock.state.lock().depth, 2);
    }

    #[test]
    fn test_suspend_without_pin_is_noop() {
        let lock = EntryLock::new();
        {
            let _suspended = lock.suspend();
        }
        assert!(!lock.is_held_by_current());
    }

    #[test]
    fn test_second_thread_waits_for_release() {
        let lock = Arc::new(EntryLock::new());
        let entered = Arc::new(AtomicBool::new(false));

        let guard = lock.enter();
        let handle = {
            let lock = lock.clone();
            let entered = entered.clone();
            std::thread::spawn(move || {
                let _guard = lock.enter();
                entered.store(true, Ordering::SeqCst);
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        assert!(!entered.load(Ordering::SeqCst));
        drop(guard);
        handle.join().unwrap();
        assert!(entered.load(Ordering::SeqCst));
    }

    #[test]
    fn test_suspend_lets_other_thread_in() {
        let lock = Arc::new(EntryLock::new());
        let _guard = lock.enter();
        let suspended = lock.suspend();

        let other = {
            let lock = lock.clone();
            std::thread::spawn(move || {
                let _guard = lock.enter();
            })
        };
        other.join().unwrap();

        drop(suspended);
        assert!(lock.is_held_by_current());
    }
}
