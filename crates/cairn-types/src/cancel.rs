use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{CairnError, Result};

/// Cooperative cancellation flag shared between a caller and the operations
/// it starts. Clones observe the same flag.
///
/// Every blob-store call and every block-manager entry point takes a token
/// and checks it at its suspension points; in-memory work between those
/// points is not interrupted.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Returns `Err(Cancelled)` once `cancel()` has been called.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(CairnError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_token_is_not_cancelled() {
        let t = CancelToken::new();
        assert!(!t.is_cancelled());
        assert!(t.check().is_ok());
    }

    #[test]
    fn clones_share_the_flag() {
        let t = CancelToken::new();
        let t2 = t.clone();
        t.cancel();
        assert!(t2.is_cancelled());
        assert!(matches!(t2.check(), Err(CairnError::Cancelled)));
    }
}
