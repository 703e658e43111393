//! The real-time channel seam.
//!
//! The transport manager in `waitroom-client` implements
//! [`ChannelConnector`] over a WebSocket; tests implement it with a mock.
//! The connector owns the single live channel: opening always closes the
//! previous one first, and every event it emits is tagged with the
//! [`ChannelEpoch`](crate::types::ChannelEpoch) of the connect attempt that
//! produced it so the session can discard stale events.

use crate::protocol::ClientFrame;
use crate::types::{ChannelEpoch, ResourceId};
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

/// Caller-held credential embedded into the channel address.
///
/// Required to open the channel; absence is a precondition failure, not a
/// retryable error. The inner value is redacted from `Debug` output so it
/// never leaks into logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wrap a credential string.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Expose the raw token for address construction.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential(***)")
    }
}

/// Precondition failure of a connect attempt.
///
/// `open` refuses an attempt it cannot address. The session treats the
/// refusal as terminal, since no channel events will ever follow it; I/O
/// failures after the attempt starts surface as [`ChannelEvent`]s instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The channel address could not be constructed.
    #[error("Invalid channel address: {0}")]
    InvalidAddress(String),
}

/// A request to open the real-time channel for one resource.
#[derive(Clone, Debug)]
pub struct ChannelRequest {
    /// Resource whose queue events the channel should carry.
    pub resource_id: ResourceId,
    /// Credential embedded into the channel address.
    pub credential: Credential,
    /// Epoch all events from this attempt will carry.
    pub epoch: ChannelEpoch,
}

/// Unsolicited event from the channel, tagged with its connect epoch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The channel opened and authenticated.
    Opened {
        /// Connect attempt this event belongs to.
        epoch: ChannelEpoch,
    },
    /// Raw frame text arrived; the session decodes and applies it.
    Frame {
        /// Connect attempt this event belongs to.
        epoch: ChannelEpoch,
        /// Undecoded frame text.
        text: String,
    },
    /// Transport-level error; not necessarily paired with a close.
    Errored {
        /// Connect attempt this event belongs to.
        epoch: ChannelEpoch,
        /// Human-readable failure reason.
        message: String,
    },
    /// The channel closed with the given close code.
    Closed {
        /// Connect attempt this event belongs to.
        epoch: ChannelEpoch,
        /// Wire close code; classified via
        /// [`CloseClass`](crate::protocol::CloseClass).
        code: u16,
    },
}

/// Owner of the single live real-time channel.
///
/// # Contract
///
/// - At most one channel is live at any time; `open` closes whatever
///   existed previously rather than layering connections.
/// - `open` does not suspend until the channel is established: success or
///   failure of the attempt is observed through [`ChannelEvent`]s.
/// - `send` is best-effort: a frame offered while no channel is open is
///   dropped, never queued.
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    /// Start a connect attempt, replacing any live channel.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] only for precondition failures (bad
    /// address); I/O failures surface as [`ChannelEvent::Closed`].
    async fn open(&self, request: ChannelRequest) -> Result<(), TransportError>;

    /// Best-effort send of an outbound frame on the live channel.
    async fn send(&self, frame: ClientFrame);

    /// Close the live channel with a normal close code, if one exists.
    /// Always leaves the connector without a channel.
    async fn close(&self);
}
