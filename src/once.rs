use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

const UNINITIALIZED: u8 = 0;
const INITIALIZING: u8 = 1;
const INITIALIZED: u8 = 2;

/// Observable phase of a [`OnceInit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    Uninitialized,
    Initializing,
    Initialized,
}

/// Exactly-once initializer for a payload shared read-only by every stage.
///
/// Concurrent first callers of [`OnceInit::ensure`] race; one runs the
/// builder and the rest block until it finishes. Every caller gets the same
/// reference and none can observe a half-built value.
#[derive(Debug)]
pub struct OnceInit<T> {
    cell: OnceLock<T>,
    state: AtomicU8,
}

impl<T> OnceInit<T> {
    pub const fn new() -> Self {
        Self {
            cell: OnceLock::new(),
            state: AtomicU8::new(UNINITIALIZED),
        }
    }

    /// Return the payload, building it with `builder` if nobody has yet
    pub fn ensure<F>(&self, builder: F) -> &T
    where
        F: FnOnce() -> T,
    {
        self.cell.get_or_init(|| {
            self.state.store(INITIALIZING, Ordering::Release);
            let building = ResetOnUnwind(&self.state);
            let value = builder();
            std::mem::forget(building);
            self.state.store(INITIALIZED, Ordering::Release);
            value
        })
    }

    /// The payload if it has been built
    pub fn get(&self) -> Option<&T> {
        self.cell.get()
    }

    pub fn state(&self) -> InitState {
        if self.cell.get().is_some() {
            return InitState::Initialized;
        }
        match self.state.load(Ordering::Acquire) {
            UNINITIALIZED => InitState::Uninitialized,
            INITIALIZING => InitState::Initializing,
            _ => InitState::Initialized,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }
}

/// Puts the state back to uninitialized if the builder panics, since
/// `OnceLock` lets the next caller try again
struct ResetOnUnwind<'a>(&'a AtomicU8);

impl Drop for ResetOnUnwind<'_> {
    fn drop(&mut self) {
        self.0.store(UNINITIALIZED, Ordering::Release);
    }
}

impl<T> Default for OnceInit<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_builder_runs_once_for_concurrent_callers() {
        let once = Arc::new(OnceInit::new());
        let builds = Arc::new(AtomicUsize::new(0));
        let start = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let once = Arc::clone(&once);
                let builds = Arc::clone(&builds);
                let start = Arc::clone(&start);
                thread::spawn(move || {
                    start.wait();
                    let value: &Vec<u32> = once.ensure(|| {
                        builds.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(20));
                        (0..100).collect()
                    });
                    assert_eq!(value.len(), 100);
                    value as *const Vec<u32> as usize
                })
            })
            .collect();

        let addresses: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(addresses.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(once.state(), InitState::Initialized);
    }

    #[test]
    fn test_later_callers_see_first_value() {
        let once = OnceInit::new();
        assert_eq!(once.state(), InitState::Uninitialized);
        assert!(once.get().is_none());

        assert_eq!(*once.ensure(|| 1), 1);
        assert_eq!(*once.ensure(|| 2), 1);
        assert!(std::ptr::eq(once.get().unwrap(), once.ensure(|| 3)));
    }

    #[test]
    fn test_panicking_builder_allows_retry() {
        let once: OnceInit<u32> = OnceInit::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            once.ensure(|| panic!("builder failed"));
        }));
        assert!(result.is_err());
        assert_eq!(once.state(), InitState::Uninitialized);
        assert!(!once.is_initialized());

        assert_eq!(*once.ensure(|| 7), 7);
        assert_eq!(once.state(), InitState::Initialized);
    }
}
