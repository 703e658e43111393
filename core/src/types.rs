//! Domain types for the queue-position client.
//!
//! This module contains the value objects and state records that describe
//! one user's membership in a virtual admission queue: identifiers, the
//! position snapshot, the connection lifecycle, and the derived countdown.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for the resource (event) being queued for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceId(Uuid);

impl ResourceId {
    /// Creates a new random `ResourceId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `ResourceId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ResourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error type for `EntryId` parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid entry ID: {0}")]
pub struct ParseEntryIdError(String);

/// Opaque identifier for a queue entry, issued by the server at join time.
///
/// The server owns the format; the client never inspects it, only echoes
/// it back. Stable for the life of the queue membership.
///
/// # Validation
///
/// - `FromStr::from_str()`: Validates input (rejects empty strings)
/// - `From::from()` and `new()`: No validation (for server-issued values)
///
/// # Examples
///
/// ```
/// use waitroom_core::types::EntryId;
///
/// let entry_id = EntryId::new("qe_01J9X4");
/// assert_eq!(entry_id.as_str(), "qe_01J9X4");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(String);

impl EntryId {
    /// Create a new `EntryId` from a string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the entry ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert the `EntryId` into its inner `String`.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntryId {
    type Err = ParseEntryIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseEntryIdError("Entry ID cannot be empty".to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl From<String> for EntryId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EntryId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for EntryId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Queue status
// ============================================================================

/// Status of a queue membership.
///
/// Terminal states are [`Expired`](Self::Expired) and [`Left`](Self::Left);
/// both are reached only by explicit client action or the expiry policy,
/// never silently. `Waiting` never transitions back from `Authorized`.
///
/// On the wire the server may say `"processing"` for an entry whose turn
/// has come; that decodes to `Authorized`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Holding a place in the queue, not yet admitted.
    #[serde(alias = "queued")]
    Waiting,
    /// Server has granted time-boxed permission to proceed to checkout.
    #[serde(alias = "processing")]
    Authorized,
    /// The authorization window lapsed (terminal).
    Expired,
    /// The user left the queue (terminal).
    Left,
}

impl QueueStatus {
    /// Whether this status admits no further transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Expired | Self::Left)
    }

    /// Whether the server has authorized the user to proceed.
    #[must_use]
    pub const fn is_authorized(self) -> bool {
        matches!(self, Self::Authorized)
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting"),
            Self::Authorized => write!(f, "authorized"),
            Self::Expired => write!(f, "expired"),
            Self::Left => write!(f, "left"),
        }
    }
}

// ============================================================================
// Queue position
// ============================================================================

/// One user's authoritative position in the admission queue.
///
/// Owned exclusively by the session; replaced wholesale on each update,
/// never partially mutated by more than one writer.
///
/// There is deliberately no stored `can_proceed` flag: whether checkout is
/// unlocked is derived from `status`, the deadline and the current time via
/// [`QueuePosition::can_proceed`], so the flag and the status can never
/// disagree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueuePosition {
    /// Server-issued entry identifier, stable for the membership's life.
    pub entry_id: EntryId,
    /// The resource this entry queues for.
    pub resource_id: ResourceId,
    /// 1-based position; monotonically non-increasing under normal operation.
    pub rank: u32,
    /// Entries strictly ahead. Invariant: `ahead_count == rank - 1` when
    /// both come from the same server payload.
    pub ahead_count: u32,
    /// Current membership status.
    pub status: QueueStatus,
    /// Advisory wait estimate; no invariant ties it to `rank`.
    pub estimated_wait_minutes: Option<u32>,
    /// Present if and only if `status == Authorized`.
    pub authorization_deadline: Option<DateTime<Utc>>,
    /// When the entry joined the queue, if the server reported it.
    pub joined_at: Option<DateTime<Utc>>,
}

impl QueuePosition {
    /// Normalize an `ahead_count` against the rank it was emitted with.
    ///
    /// Servers that omit the field get the invariant value `rank - 1`.
    #[must_use]
    pub const fn normalized_ahead_count(rank: u32, ahead_count: Option<u32>) -> u32 {
        match ahead_count {
            Some(ahead) => ahead,
            None => rank.saturating_sub(1),
        }
    }

    /// Derived predicate: true iff the server has authorized the user and
    /// the deadline (when present) has not lapsed at `now`.
    #[must_use]
    pub fn can_proceed(&self, now: DateTime<Utc>) -> bool {
        if !self.status.is_authorized() {
            return false;
        }
        match self.authorization_deadline {
            Some(deadline) => now < deadline,
            None => true,
        }
    }
}

// ============================================================================
// Connection state
// ============================================================================

/// Generation counter for channel and call lifetimes.
///
/// Every async completion and transport event is tagged with the epoch it
/// was started under; a `reset()` bumps the epoch so stale completions can
/// never resurrect cleared state.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChannelEpoch(u64);

impl ChannelEpoch {
    /// The initial epoch for a fresh session.
    pub const INITIAL: Self = Self(0);

    /// Create an epoch with the given value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the epoch number.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Get the next epoch (current + 1).
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for ChannelEpoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle phase of the real-time channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionPhase {
    /// No channel and none wanted.
    Idle,
    /// A connect attempt is in flight.
    Connecting,
    /// Channel is open and authenticated.
    Open,
    /// Transient loss; a reconnect attempt is scheduled.
    ReconnectPending,
    /// Terminal failure (invalid credential); reconnecting cannot fix it.
    FailedTerminal,
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::ReconnectPending => write!(f, "reconnect-pending"),
            Self::FailedTerminal => write!(f, "failed-terminal"),
        }
    }
}

/// State of the real-time channel, owned by the transport manager.
///
/// A transient disconnect does not destroy this record; it moves the phase
/// to [`ConnectionPhase::ReconnectPending`] instead. Only a session reset
/// returns it to its initial value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionState {
    /// Current lifecycle phase.
    pub phase: ConnectionPhase,
    /// Last human-readable failure reason; cleared on successful open.
    pub last_error: Option<String>,
    /// Consecutive reconnect attempts since the channel was last open.
    pub reconnect_attempts: u32,
    /// Generation of the current (or most recent) connect attempt.
    pub epoch: ChannelEpoch,
}

impl ConnectionState {
    /// A fresh, idle connection record.
    #[must_use]
    pub const fn idle() -> Self {
        Self {
            phase: ConnectionPhase::Idle,
            last_error: None,
            reconnect_attempts: 0,
            epoch: ChannelEpoch::INITIAL,
        }
    }

    /// Whether the channel is currently open.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self.phase, ConnectionPhase::Open)
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::idle()
    }
}

// ============================================================================
// Countdown
// ============================================================================

/// Live countdown derived from an absolute authorization deadline.
///
/// Never persisted: recomputed from `deadline - now` on every tick, so the
/// displayed value is always consistent with the clock it was derived from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Countdown {
    remaining_ms: i64,
}

impl Countdown {
    /// Derive the countdown for `deadline` as observed at `now`.
    ///
    /// A lapsed deadline yields a countdown that
    /// [`is_expired`](Self::is_expired).
    #[must_use]
    pub fn until(deadline: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let remaining: Duration = deadline - now;
        Self {
            remaining_ms: remaining.num_milliseconds().max(0),
        }
    }

    /// Whole seconds remaining, rounded up so a sub-second remainder still
    /// counts as one second. Clamped at zero.
    #[must_use]
    pub const fn remaining_secs(self) -> i64 {
        (self.remaining_ms + 999) / 1000
    }

    /// Whether the deadline has lapsed. Agrees with
    /// [`QueuePosition::can_proceed`] at millisecond precision.
    #[must_use]
    pub const fn is_expired(self) -> bool {
        self.remaining_ms == 0
    }

    /// Human-readable `M:SS` rendering, or `Expired` once lapsed.
    #[must_use]
    pub fn display(self) -> String {
        if self.is_expired() {
            "Expired".to_string()
        } else {
            let minutes = self.remaining_secs() / 60;
            let seconds = self.remaining_secs() % 60;
            format!("{minutes}:{seconds:02}")
        }
    }
}
