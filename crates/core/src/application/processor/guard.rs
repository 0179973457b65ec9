// Single-flight guard for queue passes
use std::sync::atomic::{AtomicBool, Ordering};

/// Held for the duration of one pass; dropping it releases the flag
///
/// Release happens on every exit path (early return, `?`, panic), so a
/// failed pass never blocks the next scheduled one.
pub(crate) struct PassGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> PassGuard<'a> {
    /// Acquire the flag, or None if a pass is already running
    pub(crate) fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_fails_while_held() {
        let flag = AtomicBool::new(false);
        let guard = PassGuard::try_acquire(&flag);
        assert!(guard.is_some());
        assert!(PassGuard::try_acquire(&flag).is_none());

        drop(guard);
        assert!(PassGuard::try_acquire(&flag).is_some());
    }

    #[test]
    fn test_released_on_panic() {
        let flag = AtomicBool::new(false);
        let result = std::panic::catch_unwind(|| {
            let _guard = PassGuard::try_acquire(&flag).unwrap();
            panic!("pass blew up");
        });
        assert!(result.is_err());
        assert!(!flag.load(Ordering::SeqCst));
    }
}
