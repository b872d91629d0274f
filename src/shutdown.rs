//! Cooperative cancellation token shared by every long-running task.
//!
//! A single handle passed to every thread in place of scattered volatile
//! flags. Cloning shares the same underlying flags; every task observes the
//! same state. Two flags so "please wind down" and "stop right now" are
//! distinguishable.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct ShutdownToken {
    /// Orderly shutdown: finish in-flight work, close sockets, stop the
    /// concentrator. Set by SIGINT/SIGTERM or an autoquit endpoint.
    exit: Arc<AtomicBool>,
    /// Abrupt shutdown: stop looping immediately. Set by SIGQUIT or a
    /// spurious concentrator reset.
    quit: Arc<AtomicBool>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request an orderly shutdown.
    pub fn request_exit(&self) {
        self.exit.store(true, Ordering::Release);
    }

    /// Request an immediate shutdown.
    pub fn request_quit(&self) {
        self.quit.store(true, Ordering::Release);
        self.exit.store(true, Ordering::Release);
    }

    /// True once either an orderly or an immediate shutdown was requested.
    /// Every loop head should check this.
    pub fn should_exit(&self) -> bool {
        self.exit.load(Ordering::Acquire)
    }

    /// True only for the abrupt path; callers that still want to flush
    /// state on orderly exit but not on quit can check this separately.
    pub fn should_quit(&self) -> bool {
        self.quit.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_token_has_not_exited() {
        let token = ShutdownToken::new();
        assert!(!token.should_exit());
        assert!(!token.should_quit());
    }

    #[test]
    fn request_exit_is_visible_on_clones() {
        let token = ShutdownToken::new();
        let clone = token.clone();
        token.request_exit();
        assert!(clone.should_exit());
        assert!(!clone.should_quit());
    }

    #[test]
    fn request_quit_implies_exit() {
        let token = ShutdownToken::new();
        token.request_quit();
        assert!(token.should_exit());
        assert!(token.should_quit());
    }
}
