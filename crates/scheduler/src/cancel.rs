//! Cooperative cancellation for long-running streaming work
//!
//! The streaming loop suspends between items. Before touching shared state
//! after every suspension point it checks its [`CancellationToken`], so a
//! cache that has been torn down is never mutated by a late load.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Shared flag signalling that work should stop
///
/// Clones observe the same state. Cancellation is sticky: once cancelled a
/// token stays cancelled.
///
/// # Example
///
/// ```
/// use texslot_scheduler::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker_token = token.clone();
///
/// token.cancel();
/// assert!(worker_token.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token in the non-cancelled state
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel this token and every clone of it
    ///
    /// Idempotent. Returns `true` only for the call that flipped the flag.
    pub fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::AcqRel)
    }

    /// Check if `cancel()` has been called on this token or any clone
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_starts_active() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_cancel_is_shared_with_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();

        assert!(token.cancel());
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let token = CancellationToken::new();
        assert!(token.cancel());
        assert!(!token.cancel());
        assert!(token.is_cancelled());
    }
}
