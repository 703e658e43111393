//! The queue session: state, actions and the public handle.
//!
//! A [`Session`] owns one queue membership end to end. All mutation runs
//! through the [`SessionReducer`] inside a [`Store`], so there is exactly
//! one writer; callers and background tasks alike only ever dispatch
//! actions. UI-facing consumers observe the session through
//! [`Session::subscribe`] and never mutate anything.

use crate::backend::HttpQueueBackend;
use crate::config::WaitroomConfig;
use crate::error::QueueError;
use crate::reconnect::ReconnectPolicy;
use crate::store::Store;
use crate::transport::WebSocketConnector;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use waitroom_core::backend::{BackendError, QueueBackend, QueueStatusResponse};
use waitroom_core::channel::{ChannelConnector, ChannelEvent, Credential};
use waitroom_core::environment::{Clock, SystemClock};
use waitroom_core::types::{
    ChannelEpoch, ConnectionState, Countdown, QueuePosition, ResourceId,
};

mod reducer;

pub use reducer::SessionReducer;

// ============================================================================
// State
// ============================================================================

/// Everything a consumer can observe about one queue session.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct SessionState {
    /// The queue membership, absent until a join/resume succeeds.
    pub position: Option<QueuePosition>,
    /// Real-time channel lifecycle.
    pub connection: ConnectionState,
    /// Last session-level error message, cleared when a call succeeds.
    pub last_error: Option<String>,
    /// Countdown toward the authorization deadline; present only while
    /// the position is authorized with a deadline.
    pub countdown: Option<Countdown>,
    /// Frames dropped because they failed to decode.
    pub malformed_frames: u64,
    /// Frames rejected for violating protocol invariants (e.g. demotion).
    pub protocol_errors: u64,
    /// Whether a join/resume/leave call is currently in flight.
    pub call_in_flight: bool,
}

impl SessionState {
    /// A fresh session with no membership.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Derived checkout predicate at `now`; see
    /// [`QueuePosition::can_proceed`].
    #[must_use]
    pub fn can_proceed(&self, now: waitroom_core::DateTime<waitroom_core::Utc>) -> bool {
        self.position
            .as_ref()
            .is_some_and(|position| position.can_proceed(now))
    }
}

// ============================================================================
// Actions
// ============================================================================

/// Every input the session reducer responds to.
///
/// The first block is caller intent; the second is async call completions
/// (each tagged with the epoch it started under); the third is transport
/// events forwarded from the channel connector.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionAction {
    /// Join the queue for a resource.
    Join {
        /// Resource to queue for.
        resource_id: ResourceId,
    },
    /// Look up and adopt an existing entry for a resource.
    Resume {
        /// Resource to resume for.
        resource_id: ResourceId,
    },
    /// Leave the queue, tearing down the membership.
    Leave,
    /// Unconditionally drop all local state and close the channel.
    Reset,
    /// Ask the server for a fresh position snapshot.
    Refresh,
    /// Periodic tick driving countdown recomputation.
    Tick,

    /// Join call succeeded.
    JoinSucceeded {
        /// Epoch the call started under.
        epoch: ChannelEpoch,
        /// Seeded position snapshot.
        position: QueuePosition,
    },
    /// Join call failed.
    JoinFailed {
        /// Epoch the call started under.
        epoch: ChannelEpoch,
        /// Rejection or transport failure.
        error: BackendError,
    },
    /// Resume found an existing entry.
    ResumeSucceeded {
        /// Epoch the call started under.
        epoch: ChannelEpoch,
        /// Adopted position snapshot.
        position: QueuePosition,
    },
    /// Resume got the explicit "not queued" answer.
    ResumeNotQueued {
        /// Epoch the call started under.
        epoch: ChannelEpoch,
    },
    /// Resume call failed.
    ResumeFailed {
        /// Epoch the call started under.
        epoch: ChannelEpoch,
        /// Rejection or transport failure.
        error: BackendError,
    },
    /// Leave call finished; the local view tears down either way.
    LeaveFinished {
        /// Epoch the call started under.
        epoch: ChannelEpoch,
        /// Failure detail when the server did not confirm the removal.
        error: Option<String>,
    },

    /// The channel opened and authenticated.
    ChannelOpened {
        /// Connect attempt the event belongs to.
        epoch: ChannelEpoch,
    },
    /// The channel closed with a wire close code.
    ChannelClosed {
        /// Connect attempt the event belongs to.
        epoch: ChannelEpoch,
        /// Wire close code.
        code: u16,
    },
    /// Transport-level error, recorded for visibility.
    ChannelErrored {
        /// Connect attempt the event belongs to.
        epoch: ChannelEpoch,
        /// Human-readable failure reason.
        message: String,
    },
    /// A connect attempt was refused before it started (bad channel
    /// address). No channel events will ever follow it.
    ChannelOpenFailed {
        /// Connect attempt the failure belongs to.
        epoch: ChannelEpoch,
        /// Human-readable failure reason.
        message: String,
    },
    /// Raw frame text from the channel, decoded by the reducer.
    FrameReceived {
        /// Connect attempt the event belongs to.
        epoch: ChannelEpoch,
        /// Undecoded frame text.
        text: String,
    },
    /// A scheduled reconnect delay elapsed.
    ReconnectDue {
        /// Connect attempt the delay was scheduled under.
        epoch: ChannelEpoch,
    },
}

impl From<ChannelEvent> for SessionAction {
    fn from(event: ChannelEvent) -> Self {
        match event {
            ChannelEvent::Opened { epoch } => Self::ChannelOpened { epoch },
            ChannelEvent::Frame { epoch, text } => Self::FrameReceived { epoch, text },
            ChannelEvent::Errored { epoch, message } => Self::ChannelErrored { epoch, message },
            ChannelEvent::Closed { epoch, code } => Self::ChannelClosed { epoch, code },
        }
    }
}

// ============================================================================
// Environment
// ============================================================================

/// Injected dependencies for the session reducer.
#[derive(Clone)]
pub struct SessionEnvironment {
    /// REST backend.
    pub backend: Arc<dyn QueueBackend>,
    /// Real-time channel connector.
    pub channel: Arc<dyn ChannelConnector>,
    /// Time source for deadline and countdown derivation.
    pub clock: Arc<dyn Clock>,
    /// Backoff schedule for transient channel loss.
    pub reconnect: ReconnectPolicy,
    /// Credential for the real-time channel; its absence makes connecting
    /// a terminal failure.
    pub credential: Option<Credential>,
}

// ============================================================================
// Session handle
// ============================================================================

/// Tuning knobs for a session that are not part of the environment.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionOptions {
    /// End-to-end timeout for join/resume/leave calls.
    pub call_timeout: Duration,
    /// Countdown tick interval.
    pub tick_interval: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(10),
            tick_interval: Duration::from_secs(1),
        }
    }
}

impl From<&WaitroomConfig> for SessionOptions {
    fn from(config: &WaitroomConfig) -> Self {
        Self {
            call_timeout: config.call_timeout(),
            tick_interval: config.tick_interval(),
        }
    }
}

/// Public facade over one queue membership.
///
/// Calls are serialized through the store; `join`, `resume` and `leave`
/// suspend until their completion action feeds back or the call timeout
/// elapses. Dropping the session aborts its background tasks; it does not
/// leave the queue (call [`Session::leave`] for that).
pub struct Session {
    store: Store<SessionReducer>,
    backend: Arc<dyn QueueBackend>,
    clock: Arc<dyn Clock>,
    call_timeout: Duration,
    ticker: tokio::task::JoinHandle<()>,
    forwarder: tokio::task::JoinHandle<()>,
}

impl Session {
    /// Build a session from an environment, the channel's event stream and
    /// options. Spawns the tick and event-forwarding tasks.
    #[must_use]
    pub fn new(
        environment: SessionEnvironment,
        mut events: mpsc::UnboundedReceiver<ChannelEvent>,
        options: SessionOptions,
    ) -> Self {
        let backend = Arc::clone(&environment.backend);
        let clock = Arc::clone(&environment.clock);
        let store = Store::new(SessionState::new(), SessionReducer, environment);

        let forwarder = tokio::spawn({
            let store = store.clone();
            async move {
                while let Some(event) = events.recv().await {
                    store.send(SessionAction::from(event)).await;
                }
            }
        });

        let ticker = tokio::spawn({
            let store = store.clone();
            let interval = options.tick_interval;
            async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    store.send(SessionAction::Tick).await;
                }
            }
        });

        Self {
            store,
            backend,
            clock,
            call_timeout: options.call_timeout,
            ticker,
            forwarder,
        }
    }

    /// Build a production session from configuration: HTTP backend,
    /// WebSocket connector, system clock.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Backend`] when the API base URL is invalid.
    pub fn from_config(
        config: &WaitroomConfig,
        credential: Option<Credential>,
    ) -> Result<Self, QueueError> {
        let backend = HttpQueueBackend::new(&config.api_base_url, credential.clone())?;
        let (connector, events) =
            WebSocketConnector::new(config.ws_base_url.clone(), config.connect_timeout());
        let environment = SessionEnvironment {
            backend: Arc::new(backend),
            channel: connector,
            clock: Arc::new(SystemClock),
            reconnect: config.reconnect.policy(),
            credential,
        };
        Ok(Self::new(environment, events, SessionOptions::from(config)))
    }

    /// Join the queue for `resource_id` and return the seeded position.
    ///
    /// # Errors
    ///
    /// [`QueueError::AlreadyQueued`] when this session already holds an
    /// entry, [`QueueError::CallInFlight`] when another call is running,
    /// [`QueueError::Backend`] when the server rejects the join, or
    /// [`QueueError::Timeout`] when the call does not complete in time.
    pub async fn join(&self, resource_id: ResourceId) -> Result<QueuePosition, QueueError> {
        self.ensure_idle().await?;

        let completed = self
            .store
            .send_and_wait_for(
                SessionAction::Join { resource_id },
                |action| {
                    matches!(
                        action,
                        SessionAction::JoinSucceeded { .. } | SessionAction::JoinFailed { .. }
                    )
                },
                self.call_timeout,
            )
            .await?;

        match completed {
            SessionAction::JoinSucceeded { position, .. } => Ok(position),
            SessionAction::JoinFailed { error, .. } => Err(QueueError::Backend(error)),
            other => {
                tracing::error!(?other, "Unexpected join completion");
                Err(QueueError::SessionClosed)
            }
        }
    }

    /// Look up an existing entry for `resource_id` and adopt it.
    ///
    /// Returns `Ok(None)` when the server reports no entry; callers
    /// typically fall back to [`Session::join`].
    ///
    /// # Errors
    ///
    /// Same precondition and failure modes as [`Session::join`].
    pub async fn resume(
        &self,
        resource_id: ResourceId,
    ) -> Result<Option<QueuePosition>, QueueError> {
        self.ensure_idle().await?;

        let completed = self
            .store
            .send_and_wait_for(
                SessionAction::Resume { resource_id },
                |action| {
                    matches!(
                        action,
                        SessionAction::ResumeSucceeded { .. }
                            | SessionAction::ResumeNotQueued { .. }
                            | SessionAction::ResumeFailed { .. }
                    )
                },
                self.call_timeout,
            )
            .await?;

        match completed {
            SessionAction::ResumeSucceeded { position, .. } => Ok(Some(position)),
            SessionAction::ResumeNotQueued { .. } => Ok(None),
            SessionAction::ResumeFailed { error, .. } => Err(QueueError::Backend(error)),
            other => {
                tracing::error!(?other, "Unexpected resume completion");
                Err(QueueError::SessionClosed)
            }
        }
    }

    /// Leave the queue. The local view is torn down even when the server
    /// does not confirm the removal; that soft failure is reported as
    /// [`QueueError::LeaveUnconfirmed`].
    ///
    /// A leave without a membership is a no-op.
    ///
    /// # Errors
    ///
    /// [`QueueError::CallInFlight`], [`QueueError::LeaveUnconfirmed`] or
    /// [`QueueError::Timeout`].
    pub async fn leave(&self) -> Result<(), QueueError> {
        let (has_position, in_flight) = self
            .store
            .with_state(|state| (state.position.is_some(), state.call_in_flight))
            .await;
        if !has_position {
            return Ok(());
        }
        if in_flight {
            return Err(QueueError::CallInFlight);
        }

        let completed = self
            .store
            .send_and_wait_for(
                SessionAction::Leave,
                |action| matches!(action, SessionAction::LeaveFinished { .. }),
                self.call_timeout,
            )
            .await?;

        match completed {
            SessionAction::LeaveFinished { error: None, .. } => Ok(()),
            SessionAction::LeaveFinished {
                error: Some(message),
                ..
            } => Err(QueueError::LeaveUnconfirmed(message)),
            other => {
                tracing::error!(?other, "Unexpected leave completion");
                Err(QueueError::SessionClosed)
            }
        }
    }

    /// Unconditionally drop all local state and close the channel. Makes
    /// no network call and cannot fail.
    pub async fn reset(&self) {
        self.store.send(SessionAction::Reset).await;
    }

    /// Ask the server for a fresh position snapshot over the channel.
    /// Best-effort: dropped when the channel is not open.
    pub async fn refresh(&self) {
        self.store.send(SessionAction::Refresh).await;
    }

    /// Fetch aggregate queue status for a resource. Read-only; does not
    /// touch session state.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Backend`] when the call fails.
    pub async fn queue_status(
        &self,
        resource_id: ResourceId,
    ) -> Result<QueueStatusResponse, QueueError> {
        Ok(self.backend.status(resource_id).await?)
    }

    /// Subscribe to state snapshots.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.store.subscribe()
    }

    /// Clone the current state.
    pub async fn snapshot(&self) -> SessionState {
        self.store.with_state(Clone::clone).await
    }

    /// The current position, if any.
    pub async fn position(&self) -> Option<QueuePosition> {
        self.store.with_state(|state| state.position.clone()).await
    }

    /// Whether checkout is unlocked right now.
    pub async fn can_proceed(&self) -> bool {
        let now = self.clock.now();
        self.store.with_state(|state| state.can_proceed(now)).await
    }

    async fn ensure_idle(&self) -> Result<(), QueueError> {
        let (has_position, in_flight) = self
            .store
            .with_state(|state| (state.position.is_some(), state.call_in_flight))
            .await;
        if in_flight {
            return Err(QueueError::CallInFlight);
        }
        if has_position {
            return Err(QueueError::AlreadyQueued);
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.ticker.abort();
        self.forwarder.abort();
    }
}
