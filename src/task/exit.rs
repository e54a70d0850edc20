//! Cooperative cancellation signal shared by a task's worker and watchdog.
//!
//! Workers poll the flag at loop boundaries. A worker blocked inside an instrument call
//! is not interrupted; the per-call deadline at the instrument boundary bounds that wait.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Shared exit flag. Cloning shares the same signal.
#[derive(Debug, Clone, Default)]
pub struct ExitFlag {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ExitFlag {
    /// Lowered flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag and wake every waiter.
    pub fn set(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    /// Lower the flag for the next run.
    pub fn clear(&self) {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }

    /// Whether the flag is raised.
    pub fn is_set(&self) -> bool {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep for `timeout` or until the flag is raised. Returns whether it is set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut set = lock.lock().unwrap_or_else(PoisonError::into_inner);
        while !*set {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            set = cvar
                .wait_timeout(set, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
        *set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_clear() {
        let flag = ExitFlag::new();
        assert!(!flag.is_set());
        let shared = flag.clone();
        shared.set();
        assert!(flag.is_set());
        flag.clear();
        assert!(!shared.is_set());
    }

    #[test]
    fn wait_times_out_when_unset() {
        let flag = ExitFlag::new();
        let start = Instant::now();
        assert!(!flag.wait_timeout(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn wait_wakes_early_on_set() {
        let flag = ExitFlag::new();
        let setter = flag.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            setter.set();
        });
        let start = Instant::now();
        assert!(flag.wait_timeout(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }
}
