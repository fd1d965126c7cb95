use thiserror::Error;

/// Failures reported by a [`LeaseStore`](crate::LeaseStore) backend.
///
/// A lost conditional write is not an error; stores report it as
/// [`WriteOutcome::Conflict`](crate::WriteOutcome::Conflict).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Unavailable(#[from] anyhow::Error),

    #[error("malformed lease record {name}: {reason}")]
    Malformed { name: String, reason: String },

    #[error("lease store did not answer within {0:?}")]
    TimedOut(std::time::Duration),
}

/// Errors surfaced by the lock client and its handles.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("lock {name} not granted (holder={})", .holder.as_deref().unwrap_or("unknown"))]
    LockNotGranted {
        name: String,
        holder: Option<String>,
    },

    #[error("lock {name} lost")]
    LockLost { name: String },

    #[error("lease store unavailable: {0}")]
    BackendUnavailable(#[from] StoreError),

    #[error("lock {name} already released")]
    AlreadyReleased { name: String },

    #[error("lock client is closed")]
    ClientClosed,
}

impl LockError {
    /// True for failures where trying to acquire again later makes sense.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LockError::LockNotGranted { .. } | LockError::BackendUnavailable(_)
        )
    }
}
