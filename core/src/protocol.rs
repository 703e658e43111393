//! Wire protocol for the real-time queue channel.
//!
//! The channel speaks JSON frames with a `type` tag and a `data` payload:
//!
//! **Server → Client (Position Update):**
//! ```json
//! {
//!   "type": "position_update",
//!   "data": {
//!     "entryId": "qe_01J9X4",
//!     "resourceId": "550e8400-e29b-41d4-a716-446655440000",
//!     "rank": 42,
//!     "aheadCount": 41,
//!     "status": "waiting",
//!     "estimatedWaitMinutes": 12
//!   }
//! }
//! ```
//!
//! **Server → Client (Status Change):**
//! ```json
//! { "type": "status_change", "data": { "newStatus": "processing" } }
//! ```
//!
//! **Server → Client (Error):**
//! ```json
//! { "type": "error", "data": { "message": "Queue paused" } }
//! ```
//!
//! **Client → Server (Refresh):**
//! ```json
//! { "type": "refresh" }
//! ```
//!
//! A frame that fails to decode is dropped by the session (and counted);
//! one corrupt frame must never tear down the membership.

use crate::types::{EntryId, QueuePosition, QueueStatus, ResourceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Close codes
// ============================================================================

/// Normal closure requested by either side; never retried.
pub const CLOSE_CODE_NORMAL: u16 = 1000;

/// Reserved close code for credential rejection; terminal, never retried.
pub const CLOSE_CODE_AUTH_FAILURE: u16 = 4001;

/// Client meaning of a channel close code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseClass {
    /// Intentional close; no reconnect.
    Normal,
    /// Credential rejected; reconnecting cannot fix it.
    AuthFailure,
    /// Anything else: transient loss, recoverable by reconnecting.
    Transient,
}

impl CloseClass {
    /// Classify a close code per the protocol's reserved meanings.
    #[must_use]
    pub const fn of(code: u16) -> Self {
        match code {
            CLOSE_CODE_NORMAL => Self::Normal,
            CLOSE_CODE_AUTH_FAILURE => Self::AuthFailure,
            _ => Self::Transient,
        }
    }
}

// ============================================================================
// Payloads
// ============================================================================

/// Payload of a `position_update` frame: a full position snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionPayload {
    /// Server-issued entry id, when the server repeats it.
    pub entry_id: Option<EntryId>,
    /// Resource the update pertains to.
    pub resource_id: Option<ResourceId>,
    /// 1-based rank.
    pub rank: u32,
    /// Entries strictly ahead; normalized to `rank - 1` when omitted.
    pub ahead_count: Option<u32>,
    /// Membership status carried by the snapshot.
    pub status: QueueStatus,
    /// Advisory wait estimate.
    pub estimated_wait_minutes: Option<u32>,
    /// Authorization deadline, present once admitted.
    pub authorization_deadline: Option<DateTime<Utc>>,
}

/// Payload of a `status_change` frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChangePayload {
    /// The status the server moved the entry to.
    pub new_status: QueueStatus,
    /// Deadline accompanying a promotion to authorized, when provided.
    pub authorization_deadline: Option<DateTime<Utc>>,
}

/// Payload of an `error` frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Human-readable failure reason.
    pub message: String,
}

// ============================================================================
// Frames
// ============================================================================

/// Inbound frame from the real-time channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Full position snapshot; replaces the mutable position fields wholesale.
    PositionUpdate {
        /// Snapshot payload.
        data: PositionPayload,
    },
    /// Status transition pushed by the server.
    StatusChange {
        /// Transition payload.
        data: StatusChangePayload,
    },
    /// Server-side error; recorded, position untouched.
    Error {
        /// Error payload.
        data: ErrorPayload,
    },
    /// Liveness signal; no state change.
    Heartbeat,
}

impl ServerFrame {
    /// Decode a frame from channel text.
    ///
    /// # Errors
    ///
    /// Returns the underlying `serde_json` error for malformed input; the
    /// session counts and drops such frames rather than failing.
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Outbound frame to the real-time channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Best-effort "send me the current state" request.
    Refresh,
}

impl ClientFrame {
    /// Encode the frame as channel text.
    ///
    /// # Errors
    ///
    /// Returns the underlying `serde_json` error; cannot occur for the
    /// current frame set but propagated rather than swallowed.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ============================================================================
// Snapshot application
// ============================================================================

impl QueuePosition {
    /// Replace the mutable fields of this position wholesale from a
    /// `position_update` payload.
    ///
    /// Identity fields (`entry_id`, `resource_id`, `joined_at`) are kept;
    /// everything the payload carries wins. Applying the same payload twice
    /// is a no-op (idempotent snapshot, not a delta).
    pub fn apply_update(&mut self, payload: &PositionPayload) {
        self.rank = payload.rank;
        self.ahead_count = Self::normalized_ahead_count(payload.rank, payload.ahead_count);
        self.status = payload.status;
        self.estimated_wait_minutes = payload.estimated_wait_minutes;
        self.authorization_deadline = payload.authorization_deadline;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn decodes_position_update() {
        let text = r#"{
            "type": "position_update",
            "data": {
                "entryId": "qe_1",
                "rank": 42,
                "aheadCount": 41,
                "status": "waiting",
                "estimatedWaitMinutes": 12
            }
        }"#;

        let frame = ServerFrame::decode(text).unwrap();
        match frame {
            ServerFrame::PositionUpdate { data } => {
                assert_eq!(data.rank, 42);
                assert_eq!(data.ahead_count, Some(41));
                assert_eq!(data.status, QueueStatus::Waiting);
                assert_eq!(data.estimated_wait_minutes, Some(12));
                assert!(data.authorization_deadline.is_none());
            }
            other => panic!("wrong frame: {other:?}"),
        }
    }

    #[test]
    fn decodes_status_change_processing_as_authorized() {
        let text = r#"{ "type": "status_change", "data": { "newStatus": "processing" } }"#;
        let frame = ServerFrame::decode(text).unwrap();
        match frame {
            ServerFrame::StatusChange { data } => {
                assert_eq!(data.new_status, QueueStatus::Authorized);
            }
            other => panic!("wrong frame: {other:?}"),
        }
    }

    #[test]
    fn decodes_heartbeat_with_or_without_data() {
        assert_eq!(
            ServerFrame::decode(r#"{ "type": "heartbeat" }"#).unwrap(),
            ServerFrame::Heartbeat
        );
    }

    #[test]
    fn malformed_frames_error_out() {
        assert!(ServerFrame::decode("not json").is_err());
        assert!(ServerFrame::decode(r#"{ "type": "mystery" }"#).is_err());
        assert!(ServerFrame::decode(r#"{ "type": "position_update", "data": {} }"#).is_err());
    }

    #[test]
    fn encodes_refresh() {
        assert_eq!(ClientFrame::Refresh.encode().unwrap(), r#"{"type":"refresh"}"#);
    }

    #[test]
    fn close_code_classification() {
        assert_eq!(CloseClass::of(CLOSE_CODE_NORMAL), CloseClass::Normal);
        assert_eq!(CloseClass::of(CLOSE_CODE_AUTH_FAILURE), CloseClass::AuthFailure);
        assert_eq!(CloseClass::of(1006), CloseClass::Transient);
        assert_eq!(CloseClass::of(1011), CloseClass::Transient);
    }

    mod apply_update_tests {
        use super::*;
        use crate::types::EntryId;

        fn base_position() -> QueuePosition {
            QueuePosition {
                entry_id: EntryId::new("qe_1"),
                resource_id: crate::types::ResourceId::new(),
                rank: 42,
                ahead_count: 41,
                status: QueueStatus::Waiting,
                estimated_wait_minutes: Some(12),
                authorization_deadline: None,
                joined_at: None,
            }
        }

        #[test]
        fn replaces_wholesale_and_is_idempotent() {
            let mut position = base_position();
            let payload = PositionPayload {
                entry_id: None,
                resource_id: None,
                rank: 7,
                ahead_count: Some(6),
                status: QueueStatus::Waiting,
                estimated_wait_minutes: None,
                authorization_deadline: None,
            };

            position.apply_update(&payload);
            let first = position.clone();
            position.apply_update(&payload);

            assert_eq!(position, first);
            assert_eq!(position.rank, 7);
            assert_eq!(position.ahead_count, 6);
            assert_eq!(position.estimated_wait_minutes, None);
            // Identity fields survive the replacement.
            assert_eq!(position.entry_id, EntryId::new("qe_1"));
        }

        #[test]
        fn normalizes_missing_ahead_count() {
            let mut position = base_position();
            let payload = PositionPayload {
                entry_id: None,
                resource_id: None,
                rank: 9,
                ahead_count: None,
                status: QueueStatus::Waiting,
                estimated_wait_minutes: Some(3),
                authorization_deadline: None,
            };

            position.apply_update(&payload);
            assert_eq!(position.ahead_count, 8);
        }

        mod properties {
            use super::*;
            use proptest::prelude::*;

            fn any_status() -> impl Strategy<Value = QueueStatus> {
                prop_oneof![
                    Just(QueueStatus::Waiting),
                    Just(QueueStatus::Authorized),
                    Just(QueueStatus::Expired),
                    Just(QueueStatus::Left),
                ]
            }

            proptest! {
                #[test]
                fn apply_update_is_idempotent(
                    rank in 0u32..100_000,
                    ahead in proptest::option::of(0u32..100_000),
                    wait in proptest::option::of(0u32..10_000),
                    status in any_status(),
                ) {
                    let payload = PositionPayload {
                        entry_id: None,
                        resource_id: None,
                        rank,
                        ahead_count: ahead,
                        status,
                        estimated_wait_minutes: wait,
                        authorization_deadline: None,
                    };

                    let mut position = base_position();
                    position.apply_update(&payload);
                    let once = position.clone();
                    position.apply_update(&payload);

                    prop_assert_eq!(&position, &once);
                    prop_assert_eq!(
                        position.ahead_count,
                        QueuePosition::normalized_ahead_count(rank, ahead)
                    );
                }
            }
        }
    }
}
