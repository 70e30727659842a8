//! Cooperative termination.
//! The engine polls a `Terminator` at the top of every significant loop; it
//! never interrupts a move burst. A host pauses a job by letting the check
//! itself block.
//!
//! Notes:
//! - Relaxed atomics are sufficient for a one-way "stop" flag.
//! - `request()` is safe to call from signal handlers.
//! - Any `Fn() -> bool` closure is a `Terminator`.
//!
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// Request a cooperative process-wide shutdown (idempotent).
#[inline]
pub fn request() {
    SHUTDOWN.store(true, Ordering::Relaxed);
}

/// Check whether a process-wide shutdown has been requested.
#[inline]
pub fn is_requested() -> bool {
    SHUTDOWN.load(Ordering::Relaxed)
}

/// Test/utility-only: clear the process-wide flag.
#[cfg(test)]
#[inline]
pub fn reset() {
    SHUTDOWN.store(false, Ordering::Relaxed);
}

/// Termination check polled by the engine.
pub trait Terminator {
    fn should_terminate(&self) -> bool;
}

impl<F: Fn() -> bool> Terminator for F {
    fn should_terminate(&self) -> bool {
        self()
    }
}

/// Never requests termination.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverTerminate;

impl Terminator for NeverTerminate {
    fn should_terminate(&self) -> bool {
        false
    }
}

/// Follows the process-wide flag set by the Ctrl-C handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessShutdown;

impl Terminator for ProcessShutdown {
    fn should_terminate(&self) -> bool {
        is_requested()
    }
}

/// Shareable per-job flag.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

impl Terminator for ShutdownFlag {
    fn should_terminate(&self) -> bool {
        self.is_requested()
    }
}

/// Terminates after `n` checks; used to cut a job short at an arbitrary point.
#[derive(Debug, Default)]
pub struct CountdownTerminator {
    remaining: std::sync::atomic::AtomicU64,
}

impl CountdownTerminator {
    pub fn new(checks: u64) -> Self {
        Self {
            remaining: checks.into(),
        }
    }
}

impl Terminator for CountdownTerminator {
    fn should_terminate(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn closures_are_terminators() {
        let t = || true;
        assert!(t.should_terminate());
        assert!(!NeverTerminate.should_terminate());
    }

    #[test]
    fn flag_is_shared_between_clones() {
        let a = ShutdownFlag::new();
        let b = a.clone();
        assert!(!b.should_terminate());
        a.request();
        assert!(b.should_terminate());
    }

    #[test]
    fn countdown_fires_after_n_checks() {
        let t = CountdownTerminator::new(2);
        assert!(!t.should_terminate());
        assert!(!t.should_terminate());
        assert!(t.should_terminate());
        assert!(t.should_terminate());
    }

    #[test]
    #[serial]
    fn process_flag_round_trip() {
        reset();
        assert!(!ProcessShutdown.should_terminate());
        request();
        assert!(ProcessShutdown.should_terminate());
        reset();
    }
}
