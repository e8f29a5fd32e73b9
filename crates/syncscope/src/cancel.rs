use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{SyncError, SyncStage};

/// Cooperative cancellation flag shared between a caller and running operations.
///
/// Operations poll the flag before each database round trip, so a
/// cancellation takes effect at the next checkpoint and never interrupts a
/// statement already in flight.
///
/// ```
/// use syncscope::CancellationSignal;
///
/// let signal = CancellationSignal::new();
/// let handle = signal.clone();
/// handle.cancel();
/// assert!(signal.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationSignal {
    cancelled: Arc<AtomicBool>,
}

impl CancellationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Every clone observes it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fail with [`SyncError::Cancelled`] if cancellation was requested.
    pub fn check(&self, stage: SyncStage) -> Result<(), SyncError> {
        if self.is_cancelled() {
            return Err(SyncError::Cancelled { stage });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_fails_once_cancelled() {
        let signal = CancellationSignal::new();
        assert!(signal.check(SyncStage::ScopeLoading).is_ok());

        signal.clone().cancel();
        let err = signal.check(SyncStage::ScopeLoading).unwrap_err();
        assert!(matches!(
            err,
            SyncError::Cancelled {
                stage: SyncStage::ScopeLoading
            }
        ));
    }
}
