//! Caller-facing error type for session operations.

use thiserror::Error;
use waitroom_core::backend::BackendError;

/// Error returned by [`Session`](crate::session::Session) operations.
///
/// Precondition failures (`AlreadyQueued`, `CallInFlight`) are rejected
/// locally without touching the network.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// This session already holds a queue entry; `leave` or `reset` first.
    #[error("Session already holds a queue entry")]
    AlreadyQueued,

    /// Another join/resume/leave call is still in flight.
    #[error("Another queue call is in flight")]
    CallInFlight,

    /// The backend rejected the call or the call failed.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The server did not confirm the removal; the local view is torn down
    /// regardless.
    #[error("Leave not confirmed by server: {0}")]
    LeaveUnconfirmed(String),

    /// The call did not complete within the configured timeout.
    #[error("Timed out waiting for the queue backend")]
    Timeout,

    /// The session's store is shutting down.
    #[error("Session is closed")]
    SessionClosed,
}

impl From<crate::store::StoreError> for QueueError {
    fn from(error: crate::store::StoreError) -> Self {
        match error {
            crate::store::StoreError::Timeout => Self::Timeout,
            crate::store::StoreError::Closed => Self::SessionClosed,
        }
    }
}
