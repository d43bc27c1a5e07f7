//! Cooperative cancellation.
//!
//! Long-running loops (ancestry walks, pack builds, wire negotiations) check a
//! shared token between items; observing a cancelled token surfaces
//! [`GitError::Cancelled`] and releases any partial state.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use crate::errors::GitError;

/// Cloneable cancellation handle.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; all clones observe it.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Error out if cancellation has been requested.
    pub fn check(&self) -> Result<(), GitError> {
        if self.is_cancelled() {
            Err(GitError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A fresh token is live; cancelling flips every clone.
    #[test]
    fn cancel_propagates_to_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(GitError::Cancelled)));
    }
}
