//! The session reducer: every state transition of one queue membership.
//!
//! All policy lives here, as pure transitions: precondition guards,
//! wholesale position replacement, demotion rejection, close-code
//! classification, reconnect scheduling and epoch guards against stale
//! completions. I/O only ever appears as returned effects.

use super::{SessionAction, SessionEnvironment, SessionState};
use smallvec::smallvec;
use std::sync::Arc;
use waitroom_core::channel::ChannelRequest;
use waitroom_core::environment::Clock;
use waitroom_core::protocol::{CloseClass, ServerFrame};
use waitroom_core::types::{ChannelEpoch, ConnectionPhase, Countdown, QueueStatus, ResourceId};
use waitroom_core::{Effect, Effects, Reducer};

/// Reducer driving [`SessionState`].
pub struct SessionReducer;

impl Reducer for SessionReducer {
    type State = SessionState;
    type Action = SessionAction;
    type Environment = SessionEnvironment;

    #[allow(clippy::too_many_lines)]
    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        environment: &Self::Environment,
    ) -> Effects<Self::Action> {
        match action {
            SessionAction::Join { resource_id } => Self::join(state, environment, resource_id),
            SessionAction::Resume { resource_id } => Self::resume(state, environment, resource_id),
            SessionAction::Leave => Self::leave(state, environment),
            SessionAction::Reset => Self::reset(state, environment),
            SessionAction::Refresh => Self::refresh(state, environment),
            SessionAction::Tick => {
                refresh_countdown(state, environment.clock.as_ref());
                smallvec![]
            }

            SessionAction::JoinSucceeded { epoch, position } => {
                Self::join_succeeded(state, environment, epoch, position)
            }
            SessionAction::JoinFailed { epoch, error } => {
                Self::call_failed(state, epoch, &error.to_string())
            }
            SessionAction::ResumeSucceeded { epoch, position } => {
                Self::resume_succeeded(state, environment, epoch, position)
            }
            SessionAction::ResumeNotQueued { epoch } => {
                if !is_current(state, epoch) {
                    return stale(epoch);
                }
                state.call_in_flight = false;
                smallvec![]
            }
            SessionAction::ResumeFailed { epoch, error } => {
                Self::call_failed(state, epoch, &error.to_string())
            }
            SessionAction::LeaveFinished { epoch, error } => {
                Self::leave_finished(state, environment, epoch, error)
            }

            SessionAction::ChannelOpened { epoch } => {
                if !is_current(state, epoch) {
                    return stale(epoch);
                }
                state.connection.phase = ConnectionPhase::Open;
                state.connection.last_error = None;
                state.connection.reconnect_attempts = 0;
                tracing::info!(%epoch, "Real-time channel open");
                metrics::counter!("queue.channel.opened").increment(1);
                smallvec![]
            }
            SessionAction::ChannelErrored { epoch, message } => {
                if !is_current(state, epoch) {
                    return stale(epoch);
                }
                tracing::warn!(%epoch, %message, "Channel error");
                state.connection.last_error = Some(message);
                smallvec![]
            }
            SessionAction::ChannelOpenFailed { epoch, message } => {
                if !is_current(state, epoch) {
                    return stale(epoch);
                }
                // The attempt never started, so no Closed event will follow;
                // without this transition the phase would stay Connecting.
                tracing::error!(%epoch, %message, "Channel cannot be opened");
                state.connection.phase = ConnectionPhase::FailedTerminal;
                state.connection.last_error = Some(message);
                metrics::counter!("queue.channel.open_failed").increment(1);
                smallvec![]
            }
            SessionAction::ChannelClosed { epoch, code } => {
                Self::channel_closed(state, environment, epoch, code)
            }
            SessionAction::ReconnectDue { epoch } => {
                Self::reconnect_due(state, environment, epoch)
            }
            SessionAction::FrameReceived { epoch, text } => {
                Self::frame_received(state, environment, epoch, &text)
            }
        }
    }
}

impl SessionReducer {
    fn join(
        state: &mut SessionState,
        environment: &SessionEnvironment,
        resource_id: ResourceId,
    ) -> Effects<SessionAction> {
        if state.position.is_some() {
            tracing::warn!("Ignoring join: session already holds a queue entry");
            return smallvec![];
        }
        if state.call_in_flight {
            tracing::warn!("Ignoring join: another call is in flight");
            return smallvec![];
        }

        state.call_in_flight = true;
        state.last_error = None;
        metrics::counter!("queue.join.started").increment(1);

        let epoch = state.connection.epoch;
        let backend = Arc::clone(&environment.backend);
        smallvec![Effect::Future(Box::pin(async move {
            Some(match backend.join(resource_id).await {
                Ok(response) => SessionAction::JoinSucceeded {
                    epoch,
                    position: response.into_position(),
                },
                Err(error) => SessionAction::JoinFailed { epoch, error },
            })
        }))]
    }

    fn resume(
        state: &mut SessionState,
        environment: &SessionEnvironment,
        resource_id: ResourceId,
    ) -> Effects<SessionAction> {
        if state.position.is_some() {
            tracing::warn!("Ignoring resume: session already holds a queue entry");
            return smallvec![];
        }
        if state.call_in_flight {
            tracing::warn!("Ignoring resume: another call is in flight");
            return smallvec![];
        }

        state.call_in_flight = true;
        state.last_error = None;

        let epoch = state.connection.epoch;
        let backend = Arc::clone(&environment.backend);
        smallvec![Effect::Future(Box::pin(async move {
            Some(match backend.position(resource_id).await {
                Ok(Some(response)) => SessionAction::ResumeSucceeded {
                    epoch,
                    position: response.into_position(),
                },
                Ok(None) => SessionAction::ResumeNotQueued { epoch },
                Err(error) => SessionAction::ResumeFailed { epoch, error },
            })
        }))]
    }

    fn leave(
        state: &mut SessionState,
        environment: &SessionEnvironment,
    ) -> Effects<SessionAction> {
        let Some(position) = &state.position else {
            // Leaving without a membership is a no-op, not an error.
            return smallvec![];
        };
        if state.call_in_flight {
            tracing::warn!("Ignoring leave: another call is in flight");
            return smallvec![];
        }

        state.call_in_flight = true;
        let resource_id = position.resource_id;
        let epoch = state.connection.epoch;
        let backend = Arc::clone(&environment.backend);
        smallvec![Effect::Future(Box::pin(async move {
            let error = match backend.leave(resource_id).await {
                Ok(response) if response.success => None,
                Ok(response) => Some(
                    response
                        .message
                        .unwrap_or_else(|| "removal not confirmed".to_string()),
                ),
                Err(error) => Some(error.to_string()),
            };
            Some(SessionAction::LeaveFinished { epoch, error })
        }))]
    }

    fn leave_finished(
        state: &mut SessionState,
        environment: &SessionEnvironment,
        epoch: ChannelEpoch,
        error: Option<String>,
    ) -> Effects<SessionAction> {
        if !is_current(state, epoch) {
            return stale(epoch);
        }

        // Torn down whether or not the server confirmed: the user's intent
        // to abandon the queue wins.
        if let Some(message) = &error {
            tracing::warn!(%message, "Leave not confirmed; tearing down anyway");
        }
        teardown(state);
        state.last_error = error;
        metrics::counter!("queue.session.left").increment(1);
        smallvec![disconnect(environment)]
    }

    fn reset(
        state: &mut SessionState,
        environment: &SessionEnvironment,
    ) -> Effects<SessionAction> {
        teardown(state);
        state.last_error = None;
        state.malformed_frames = 0;
        state.protocol_errors = 0;
        tracing::debug!("Session reset");
        smallvec![disconnect(environment)]
    }

    fn refresh(
        state: &SessionState,
        environment: &SessionEnvironment,
    ) -> Effects<SessionAction> {
        if !state.connection.is_open() {
            tracing::debug!("Dropping refresh request: channel not open");
            return smallvec![];
        }
        let channel = Arc::clone(&environment.channel);
        smallvec![Effect::Future(Box::pin(async move {
            channel
                .send(waitroom_core::protocol::ClientFrame::Refresh)
                .await;
            None
        }))]
    }

    fn join_succeeded(
        state: &mut SessionState,
        environment: &SessionEnvironment,
        epoch: ChannelEpoch,
        position: waitroom_core::types::QueuePosition,
    ) -> Effects<SessionAction> {
        if !is_current(state, epoch) {
            return stale(epoch);
        }
        state.call_in_flight = false;

        // A successful join never yields a terminal entry.
        if position.status.is_terminal() {
            tracing::warn!(status = %position.status, "Join returned a terminal status");
            state.protocol_errors += 1;
            state.last_error = Some("join returned a terminal status".to_string());
            return smallvec![];
        }

        let resource_id = position.resource_id;
        tracing::info!(
            rank = position.rank,
            ahead = position.ahead_count,
            status = %position.status,
            "Joined queue"
        );
        metrics::counter!("queue.join.succeeded").increment(1);
        state.position = Some(position);
        state.last_error = None;
        refresh_countdown(state, environment.clock.as_ref());

        connect(state, environment, resource_id)
    }

    fn resume_succeeded(
        state: &mut SessionState,
        environment: &SessionEnvironment,
        epoch: ChannelEpoch,
        position: waitroom_core::types::QueuePosition,
    ) -> Effects<SessionAction> {
        if !is_current(state, epoch) {
            return stale(epoch);
        }
        state.call_in_flight = false;

        let resource_id = position.resource_id;
        let terminal = position.status.is_terminal();
        tracing::info!(rank = position.rank, status = %position.status, "Resumed queue entry");
        state.position = Some(position);
        state.last_error = None;
        refresh_countdown(state, environment.clock.as_ref());

        // A resumed entry can legitimately be terminal (it expired while
        // we were away); show it, but do not open a channel for it.
        if terminal {
            smallvec![]
        } else {
            connect(state, environment, resource_id)
        }
    }

    fn call_failed(
        state: &mut SessionState,
        epoch: ChannelEpoch,
        message: &str,
    ) -> Effects<SessionAction> {
        if !is_current(state, epoch) {
            return stale(epoch);
        }
        state.call_in_flight = false;
        state.last_error = Some(message.to_string());
        metrics::counter!("queue.call.failed").increment(1);
        smallvec![]
    }

    fn channel_closed(
        state: &mut SessionState,
        environment: &SessionEnvironment,
        epoch: ChannelEpoch,
        code: u16,
    ) -> Effects<SessionAction> {
        if !is_current(state, epoch) {
            return stale(epoch);
        }
        if state.position.is_none() {
            // Closed after teardown; nothing left to recover.
            state.connection.phase = ConnectionPhase::Idle;
            return smallvec![];
        }

        match CloseClass::of(code) {
            CloseClass::Normal => {
                tracing::debug!(%epoch, "Channel closed normally");
                state.connection.phase = ConnectionPhase::Idle;
                smallvec![]
            }
            CloseClass::AuthFailure => {
                tracing::warn!(%epoch, code, "Channel rejected credential; not reconnecting");
                metrics::counter!("queue.channel.auth_failed").increment(1);
                state.connection.phase = ConnectionPhase::FailedTerminal;
                state.connection.last_error =
                    Some("authentication failed; re-authenticate to reconnect".to_string());
                smallvec![]
            }
            CloseClass::Transient => {
                state.connection.phase = ConnectionPhase::ReconnectPending;
                state.connection.reconnect_attempts += 1;
                state.connection.last_error = Some(format!("channel closed with code {code}"));
                let attempt = state.connection.reconnect_attempts;
                let delay = environment.reconnect.delay_for_attempt(attempt);
                tracing::info!(%epoch, code, attempt, ?delay, "Scheduling reconnect");
                metrics::counter!("queue.reconnect.scheduled").increment(1);
                smallvec![Effect::Delay {
                    duration: delay,
                    action: Box::new(SessionAction::ReconnectDue { epoch }),
                }]
            }
        }
    }

    fn reconnect_due(
        state: &mut SessionState,
        environment: &SessionEnvironment,
        epoch: ChannelEpoch,
    ) -> Effects<SessionAction> {
        if !is_current(state, epoch) {
            return stale(epoch);
        }
        if state.connection.phase != ConnectionPhase::ReconnectPending {
            tracing::debug!(phase = %state.connection.phase, "Dropping reconnect: phase changed");
            return smallvec![];
        }
        let Some(position) = &state.position else {
            state.connection.phase = ConnectionPhase::Idle;
            return smallvec![];
        };
        let resource_id = position.resource_id;
        connect(state, environment, resource_id)
    }

    fn frame_received(
        state: &mut SessionState,
        environment: &SessionEnvironment,
        epoch: ChannelEpoch,
        text: &str,
    ) -> Effects<SessionAction> {
        if !is_current(state, epoch) {
            return stale(epoch);
        }

        let frame = match ServerFrame::decode(text) {
            Ok(frame) => frame,
            Err(error) => {
                // Malformed frames are dropped, never fatal; the next
                // well-formed snapshot supersedes anything missed.
                state.malformed_frames += 1;
                metrics::counter!("queue.frames.malformed").increment(1);
                tracing::debug!(%error, "Dropping malformed frame");
                return smallvec![];
            }
        };

        match frame {
            ServerFrame::Heartbeat => {
                tracing::trace!("Heartbeat");
                smallvec![]
            }
            ServerFrame::Error { data } => {
                tracing::warn!(message = %data.message, "Server error frame");
                state.last_error = Some(data.message);
                smallvec![]
            }
            ServerFrame::PositionUpdate { data } => {
                let Some(position) = &mut state.position else {
                    return smallvec![];
                };
                if position.status.is_terminal() {
                    return smallvec![];
                }
                if position.status.is_authorized() && data.status == QueueStatus::Waiting {
                    // Demotion back to waiting is never modeled.
                    state.protocol_errors += 1;
                    metrics::counter!("queue.frames.rejected").increment(1);
                    tracing::warn!("Rejecting position update demoting authorized entry");
                    return smallvec![];
                }
                position.apply_update(&data);
                metrics::counter!("queue.position.updates").increment(1);
                refresh_countdown(state, environment.clock.as_ref());
                smallvec![]
            }
            ServerFrame::StatusChange { data } => {
                Self::status_change(state, environment, data)
            }
        }
    }

    fn status_change(
        state: &mut SessionState,
        environment: &SessionEnvironment,
        data: waitroom_core::protocol::StatusChangePayload,
    ) -> Effects<SessionAction> {
        let Some(position) = &mut state.position else {
            return smallvec![];
        };

        match data.new_status {
            QueueStatus::Authorized => {
                if position.status.is_terminal() {
                    return smallvec![];
                }
                position.status = QueueStatus::Authorized;
                if data.authorization_deadline.is_some() {
                    position.authorization_deadline = data.authorization_deadline;
                }
                tracing::info!(
                    deadline = ?position.authorization_deadline,
                    "Authorized to proceed"
                );
                metrics::counter!("queue.authorized").increment(1);
                refresh_countdown(state, environment.clock.as_ref());
                smallvec![]
            }
            QueueStatus::Waiting => {
                if position.status.is_authorized() {
                    state.protocol_errors += 1;
                    metrics::counter!("queue.frames.rejected").increment(1);
                    tracing::warn!("Rejecting status change demoting authorized entry");
                }
                smallvec![]
            }
            QueueStatus::Expired => {
                // Server-driven, authoritative expiry.
                position.status = QueueStatus::Expired;
                state.countdown = None;
                tracing::info!("Authorization window expired");
                metrics::counter!("queue.expired").increment(1);
                smallvec![]
            }
            QueueStatus::Left => {
                // The server removed the entry; tear down like a leave.
                tracing::info!("Server reports entry left the queue");
                teardown(state);
                smallvec![disconnect(environment)]
            }
        }
    }
}

/// Whether `epoch` belongs to the current generation of the session.
fn is_current(state: &SessionState, epoch: ChannelEpoch) -> bool {
    state.connection.epoch == epoch
}

fn stale(epoch: ChannelEpoch) -> Effects<SessionAction> {
    tracing::debug!(%epoch, "Discarding stale completion");
    metrics::counter!("queue.completions.stale").increment(1);
    smallvec![]
}

/// Recompute the countdown from the deadline and the clock; cleared
/// whenever the position is not authorized with a deadline.
fn refresh_countdown(state: &mut SessionState, clock: &dyn Clock) {
    state.countdown = match &state.position {
        Some(position) if position.status.is_authorized() => position
            .authorization_deadline
            .map(|deadline| Countdown::until(deadline, clock.now())),
        _ => None,
    };
}

/// Drop the membership and return the connection record to idle, bumping
/// the epoch so anything in flight becomes stale.
fn teardown(state: &mut SessionState) {
    state.position = None;
    state.countdown = None;
    state.call_in_flight = false;
    state.connection.phase = ConnectionPhase::Idle;
    state.connection.reconnect_attempts = 0;
    state.connection.last_error = None;
    state.connection.epoch = state.connection.epoch.next();
}

/// Start a connect attempt under a fresh epoch.
///
/// Without a credential the channel can never open; the connection is
/// marked terminally failed and no attempt is made.
fn connect(
    state: &mut SessionState,
    environment: &SessionEnvironment,
    resource_id: ResourceId,
) -> Effects<SessionAction> {
    let Some(credential) = environment.credential.clone() else {
        tracing::warn!("No credential; real-time channel unavailable");
        state.connection.phase = ConnectionPhase::FailedTerminal;
        state.connection.last_error = Some("missing credential".to_string());
        return smallvec![];
    };

    let epoch = state.connection.epoch.next();
    state.connection.epoch = epoch;
    state.connection.phase = ConnectionPhase::Connecting;

    let channel = Arc::clone(&environment.channel);
    smallvec![Effect::Future(Box::pin(async move {
        match channel
            .open(ChannelRequest {
                resource_id,
                credential,
                epoch,
            })
            .await
        {
            Ok(()) => None,
            Err(error) => Some(SessionAction::ChannelOpenFailed {
                epoch,
                message: error.to_string(),
            }),
        }
    }))]
}

fn disconnect(environment: &SessionEnvironment) -> Effect<SessionAction> {
    let channel = Arc::clone(&environment.channel);
    Effect::Future(Box::pin(async move {
        channel.close().await;
        None
    }))
}
