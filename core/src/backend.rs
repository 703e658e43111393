//! The REST backend seam: join/leave/position/status operations.
//!
//! The backend is an external collaborator; the client consumes it through
//! the [`QueueBackend`] trait so reducer tests can run against a mock and
//! production wires in the HTTP implementation from `waitroom-client`.

use crate::types::{EntryId, QueuePosition, QueueStatus, ResourceId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Errors
// ============================================================================

/// Failure of a backend call.
///
/// Variants are `Clone` because rejections travel through the action
/// feedback loop (recorded in session state *and* returned to the caller).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The resource (event) does not exist.
    #[error("Resource not found")]
    ResourceNotFound,

    /// The resource exists but queueing is not enabled for it.
    #[error("Queue is not enabled for this resource")]
    QueueDisabled,

    /// The user already holds a queue entry elsewhere.
    #[error("Already queued: {0}")]
    AlreadyQueued(String),

    /// The credential was rejected.
    #[error("Unauthorized")]
    Unauthorized,

    /// Any other HTTP-level rejection.
    #[error("Backend returned {status}: {message}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Body message, when one was provided.
        message: String,
    },

    /// The request never completed (connection refused, timeout, ...).
    #[error("Request failed: {0}")]
    Request(String),

    /// The response body could not be decoded.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

// ============================================================================
// Responses
// ============================================================================

/// Response of the join operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResponse {
    /// Server-issued entry id.
    pub entry_id: EntryId,
    /// Resource joined.
    pub resource_id: ResourceId,
    /// 1-based rank at join time.
    pub rank: u32,
    /// Status at join time; never terminal for a successful join.
    pub status: QueueStatus,
    /// Advisory wait estimate.
    pub estimated_wait_minutes: Option<u32>,
    /// Entries strictly ahead; normalized to `rank - 1` when omitted.
    pub ahead_count: Option<u32>,
    /// When the entry was created.
    pub joined_at: Option<DateTime<Utc>>,
}

impl JoinResponse {
    /// Build the position snapshot this response seeds.
    #[must_use]
    pub fn into_position(self) -> QueuePosition {
        QueuePosition {
            ahead_count: QueuePosition::normalized_ahead_count(self.rank, self.ahead_count),
            entry_id: self.entry_id,
            resource_id: self.resource_id,
            rank: self.rank,
            status: self.status,
            estimated_wait_minutes: self.estimated_wait_minutes,
            authorization_deadline: None,
            joined_at: self.joined_at,
        }
    }
}

/// Response of the position-lookup operation, when an entry exists.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionResponse {
    /// Server-issued entry id.
    pub entry_id: EntryId,
    /// Resource the entry belongs to.
    pub resource_id: ResourceId,
    /// Current 1-based rank.
    pub rank: u32,
    /// Current status.
    pub status: QueueStatus,
    /// Advisory wait estimate.
    pub estimated_wait_minutes: Option<u32>,
    /// Entries strictly ahead; normalized to `rank - 1` when omitted.
    pub ahead_count: Option<u32>,
    /// Authorization deadline, present once admitted.
    pub authorization_deadline: Option<DateTime<Utc>>,
    /// When the entry was created.
    pub joined_at: Option<DateTime<Utc>>,
}

impl PositionResponse {
    /// Build the position snapshot this response seeds.
    #[must_use]
    pub fn into_position(self) -> QueuePosition {
        QueuePosition {
            ahead_count: QueuePosition::normalized_ahead_count(self.rank, self.ahead_count),
            entry_id: self.entry_id,
            resource_id: self.resource_id,
            rank: self.rank,
            status: self.status,
            estimated_wait_minutes: self.estimated_wait_minutes,
            authorization_deadline: self.authorization_deadline,
            joined_at: self.joined_at,
        }
    }
}

/// Response of the leave operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveResponse {
    /// Whether the server confirmed the removal.
    pub success: bool,
    /// Optional human-readable detail.
    pub message: Option<String>,
}

/// Aggregate queue status for a resource (not per-user).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatusResponse {
    /// The resource described.
    pub resource_id: ResourceId,
    /// Whether queueing is enabled at all.
    pub queue_enabled: bool,
    /// Entries currently waiting.
    pub total_in_queue: u32,
    /// Entries currently authorized/processing.
    pub currently_processing: u32,
    /// Advisory wait estimate for a new entry.
    pub estimated_wait_minutes: Option<u32>,
    /// Whether the queue is actively admitting.
    pub is_active: bool,
}

// ============================================================================
// Trait
// ============================================================================

/// The REST operations the queue backend exposes.
///
/// `position` returns `Ok(None)` for the backend's explicit "not queued"
/// signal; that is an expected outcome, not an error.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Join the queue for `resource_id`.
    ///
    /// # Errors
    ///
    /// Returns a [`BackendError`] when the server rejects the join (unknown
    /// resource, queue disabled, already queued) or the call fails.
    async fn join(&self, resource_id: ResourceId) -> Result<JoinResponse, BackendError>;

    /// Look up an existing entry for `resource_id`.
    ///
    /// # Errors
    ///
    /// Returns a [`BackendError`] for transport or server failures; an
    /// explicit "not queued" response is `Ok(None)`.
    async fn position(
        &self,
        resource_id: ResourceId,
    ) -> Result<Option<PositionResponse>, BackendError>;

    /// Leave the queue for `resource_id`. Best-effort from the client's
    /// perspective once the user has confirmed intent.
    ///
    /// # Errors
    ///
    /// Returns a [`BackendError`] when the call fails; the session tears
    /// down its local view regardless.
    async fn leave(&self, resource_id: ResourceId) -> Result<LeaveResponse, BackendError>;

    /// Fetch the aggregate queue status for `resource_id`.
    ///
    /// # Errors
    ///
    /// Returns a [`BackendError`] for transport or server failures.
    async fn status(&self, resource_id: ResourceId) -> Result<QueueStatusResponse, BackendError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn join_response_decodes_camel_case() {
        let text = r#"{
            "entryId": "qe_1",
            "resourceId": "550e8400-e29b-41d4-a716-446655440000",
            "rank": 42,
            "status": "waiting",
            "estimatedWaitMinutes": 12,
            "aheadCount": 41,
            "joinedAt": "2025-06-01T12:00:00Z"
        }"#;

        let response: JoinResponse = serde_json::from_str(text).unwrap();
        assert_eq!(response.rank, 42);
        assert_eq!(response.status, QueueStatus::Waiting);

        let position = response.into_position();
        assert_eq!(position.ahead_count, 41);
        assert!(position.authorization_deadline.is_none());
    }

    #[test]
    fn join_response_normalizes_missing_ahead_count() {
        let text = r#"{
            "entryId": "qe_1",
            "resourceId": "550e8400-e29b-41d4-a716-446655440000",
            "rank": 5,
            "status": "waiting"
        }"#;

        let response: JoinResponse = serde_json::from_str(text).unwrap();
        assert_eq!(response.into_position().ahead_count, 4);
    }
}
