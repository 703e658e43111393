//! End-to-end session flows against mocked backend and transport.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use waitroom_client::reconnect::ReconnectPolicy;
use waitroom_client::session::{Session, SessionEnvironment, SessionOptions, SessionState};
use waitroom_client::QueueError;
use waitroom_core::backend::{BackendError, JoinResponse, LeaveResponse, QueueStatusResponse};
use waitroom_core::channel::{
    ChannelConnector, ChannelEvent, ChannelRequest, Credential, TransportError,
};
use waitroom_core::types::{
    ChannelEpoch, ConnectionPhase, EntryId, QueueStatus, ResourceId,
};
use waitroom_testing::mocks::{
    BackendCall, MockBackend, MockConnector, SteppingClock, test_instant,
};

struct Harness {
    session: Session,
    backend: Arc<MockBackend>,
    connector: Arc<MockConnector>,
    clock: SteppingClock,
    events: mpsc::UnboundedSender<ChannelEvent>,
}

fn harness() -> Harness {
    let clock = SteppingClock::new(test_instant());
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let connector = MockConnector::with_auto_open(events_tx.clone());
    let backend = MockBackend::new();

    let environment = SessionEnvironment {
        backend: Arc::clone(&backend) as Arc<dyn waitroom_core::backend::QueueBackend>,
        channel: Arc::clone(&connector) as Arc<dyn ChannelConnector>,
        clock: Arc::new(clock.clone()),
        reconnect: ReconnectPolicy::new()
            .with_initial_delay(Duration::from_millis(20))
            .with_max_delay(Duration::from_millis(100))
            .with_jitter(0.0),
        credential: Some(Credential::new("tok")),
    };
    let session = Session::new(
        environment,
        events_rx,
        SessionOptions {
            call_timeout: Duration::from_secs(2),
            tick_interval: Duration::from_millis(10),
        },
    );

    Harness {
        session,
        backend,
        connector,
        clock,
        events: events_tx,
    }
}

fn join_response(resource_id: ResourceId) -> JoinResponse {
    JoinResponse {
        entry_id: EntryId::new("qe_1"),
        resource_id,
        rank: 42,
        status: QueueStatus::Waiting,
        estimated_wait_minutes: Some(12),
        ahead_count: Some(41),
        joined_at: None,
    }
}

async fn wait_for_state<F>(
    states: &mut watch::Receiver<SessionState>,
    predicate: F,
) -> SessionState
where
    F: Fn(&SessionState) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            {
                let state = states.borrow_and_update();
                if predicate(&state) {
                    return state.clone();
                }
            }
            states.changed().await.expect("session store dropped");
        }
    })
    .await
    .expect("expected session state never observed")
}

async fn wait_until<F>(condition: F)
where
    F: Fn() -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never satisfied");
}

#[tokio::test]
async fn join_authorize_countdown_and_expiry() {
    let h = harness();
    let resource = ResourceId::new();
    h.backend.push_join(Ok(join_response(resource)));

    let position = h.session.join(resource).await.unwrap();
    assert_eq!(position.rank, 42);
    assert_eq!(position.ahead_count, 41);
    assert!(!h.session.can_proceed().await);

    let mut states = h.session.subscribe();
    wait_for_state(&mut states, |s| s.connection.is_open()).await;

    // Server admits the user with a five-minute window.
    let epoch = h.connector.last_open().unwrap().epoch;
    h.events
        .send(ChannelEvent::Frame {
            epoch,
            text: r#"{"type":"status_change","data":{"newStatus":"processing","authorizationDeadline":"2025-06-01T12:05:00Z"}}"#.to_string(),
        })
        .unwrap();

    let state = wait_for_state(&mut states, |s| {
        s.position
            .as_ref()
            .is_some_and(|p| p.status == QueueStatus::Authorized)
    })
    .await;
    assert!(state.countdown.is_some());
    assert!(h.session.can_proceed().await);

    // Let the window lapse; ticks re-derive the countdown from the clock.
    h.clock.advance(ChronoDuration::seconds(301));
    let state = wait_for_state(&mut states, |s| {
        s.countdown.is_some_and(waitroom_core::types::Countdown::is_expired)
    })
    .await;
    assert_eq!(state.countdown.unwrap().display(), "Expired");
    assert_eq!(
        state.position.as_ref().unwrap().status,
        QueueStatus::Authorized
    );
    assert!(!h.session.can_proceed().await);
}

#[tokio::test]
async fn position_updates_flow_into_state() {
    let h = harness();
    let resource = ResourceId::new();
    h.backend.push_join(Ok(join_response(resource)));
    h.session.join(resource).await.unwrap();

    let mut states = h.session.subscribe();
    wait_for_state(&mut states, |s| s.connection.is_open()).await;
    let epoch = h.connector.last_open().unwrap().epoch;

    h.events
        .send(ChannelEvent::Frame {
            epoch,
            text: r#"{"type":"position_update","data":{"rank":7,"aheadCount":6,"status":"waiting","estimatedWaitMinutes":2}}"#.to_string(),
        })
        .unwrap();

    let state = wait_for_state(&mut states, |s| {
        s.position.as_ref().is_some_and(|p| p.rank == 7)
    })
    .await;
    let position = state.position.unwrap();
    assert_eq!(position.ahead_count, 6);
    assert_eq!(position.estimated_wait_minutes, Some(2));
    // Identity survives wholesale replacement.
    assert_eq!(position.entry_id, EntryId::new("qe_1"));
}

#[tokio::test]
async fn transient_close_reconnects_and_auth_close_stops() {
    let h = harness();
    let resource = ResourceId::new();
    h.backend.push_join(Ok(join_response(resource)));
    h.session.join(resource).await.unwrap();

    let mut states = h.session.subscribe();
    wait_for_state(&mut states, |s| s.connection.is_open()).await;
    let first_epoch = h.connector.last_open().unwrap().epoch;

    // Transient loss: exactly one reconnect is scheduled and taken.
    h.events
        .send(ChannelEvent::Closed {
            epoch: first_epoch,
            code: 1006,
        })
        .unwrap();
    wait_until(|| h.connector.open_count() == 2).await;

    let second_epoch = h.connector.last_open().unwrap().epoch;
    assert!(second_epoch > first_epoch);
    wait_for_state(&mut states, |s| s.connection.is_open()).await;

    // Credential rejection: terminal, no further attempts.
    h.events
        .send(ChannelEvent::Closed {
            epoch: second_epoch,
            code: 4001,
        })
        .unwrap();
    wait_for_state(&mut states, |s| {
        s.connection.phase == ConnectionPhase::FailedTerminal
    })
    .await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.connector.open_count(), 2);
}

#[tokio::test]
async fn events_from_a_replaced_channel_are_ignored() {
    let h = harness();
    let resource = ResourceId::new();
    h.backend.push_join(Ok(join_response(resource)));
    h.session.join(resource).await.unwrap();

    let mut states = h.session.subscribe();
    wait_for_state(&mut states, |s| s.connection.is_open()).await;
    let live_epoch = h.connector.last_open().unwrap().epoch;

    // A frame from a dead generation must not touch the snapshot.
    h.events
        .send(ChannelEvent::Frame {
            epoch: ChannelEpoch::new(live_epoch.value() + 10),
            text: r#"{"type":"position_update","data":{"rank":1,"status":"waiting"}}"#.to_string(),
        })
        .unwrap();
    h.events
        .send(ChannelEvent::Frame {
            epoch: live_epoch,
            text: r#"{"type":"heartbeat"}"#.to_string(),
        })
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let state = h.session.snapshot().await;
    assert_eq!(state.malformed_frames, 0);
    assert_eq!(state.position.unwrap().rank, 42);
}

#[tokio::test]
async fn leave_tears_down_position_and_channel() {
    let h = harness();
    let resource = ResourceId::new();
    h.backend.push_join(Ok(join_response(resource)));
    h.backend.push_leave(Ok(LeaveResponse {
        success: true,
        message: None,
    }));

    h.session.join(resource).await.unwrap();
    let mut states = h.session.subscribe();
    wait_for_state(&mut states, |s| s.connection.is_open()).await;

    h.session.leave().await.unwrap();

    assert!(h.session.position().await.is_none());
    wait_until(|| h.connector.close_count() >= 1).await;
    assert!(h.backend.calls().contains(&BackendCall::Leave(resource)));

    // Leaving again is a no-op: no second backend call.
    h.session.leave().await.unwrap();
    let leaves = h
        .backend
        .calls()
        .into_iter()
        .filter(|call| matches!(call, BackendCall::Leave(_)))
        .count();
    assert_eq!(leaves, 1);
}

#[tokio::test]
async fn leave_failure_still_tears_down_locally() {
    let h = harness();
    let resource = ResourceId::new();
    h.backend.push_join(Ok(join_response(resource)));
    h.backend
        .push_leave(Err(BackendError::Request("connection refused".to_string())));

    h.session.join(resource).await.unwrap();

    let result = h.session.leave().await;
    assert!(matches!(result, Err(QueueError::LeaveUnconfirmed(_))));
    assert!(h.session.position().await.is_none());
}

#[tokio::test]
async fn resume_falls_back_to_join_when_not_queued() {
    let h = harness();
    let resource = ResourceId::new();
    h.backend.push_position(Ok(None));
    h.backend.push_join(Ok(join_response(resource)));

    let resumed = h.session.resume(resource).await.unwrap();
    assert!(resumed.is_none());

    let position = h.session.join(resource).await.unwrap();
    assert_eq!(position.rank, 42);
    assert_eq!(
        h.backend.calls(),
        vec![BackendCall::Position(resource), BackendCall::Join(resource)]
    );
}

#[tokio::test]
async fn second_join_is_rejected_locally() {
    let h = harness();
    let resource = ResourceId::new();
    h.backend.push_join(Ok(join_response(resource)));
    h.session.join(resource).await.unwrap();

    let result = h.session.join(resource).await;
    assert_eq!(result, Err(QueueError::AlreadyQueued));
    // The rejection never reached the backend.
    let joins = h
        .backend
        .calls()
        .into_iter()
        .filter(|call| matches!(call, BackendCall::Join(_)))
        .count();
    assert_eq!(joins, 1);
}

#[tokio::test]
async fn backend_rejection_surfaces_to_caller() {
    let h = harness();
    let resource = ResourceId::new();
    h.backend
        .push_join(Err(BackendError::AlreadyQueued("other event".to_string())));

    let result = h.session.join(resource).await;
    assert_eq!(
        result,
        Err(QueueError::Backend(BackendError::AlreadyQueued(
            "other event".to_string()
        )))
    );
    // The failure is also visible in observable state.
    let state = h.session.snapshot().await;
    assert!(state.last_error.is_some());
    assert!(state.position.is_none());
}

#[tokio::test]
async fn reset_discards_everything_without_backend_calls() {
    let h = harness();
    let resource = ResourceId::new();
    h.backend.push_join(Ok(join_response(resource)));
    h.session.join(resource).await.unwrap();

    h.session.reset().await;

    let mut states = h.session.subscribe();
    wait_for_state(&mut states, |s| s.position.is_none()).await;
    wait_until(|| h.connector.close_count() >= 1).await;
    assert!(
        !h.backend
            .calls()
            .iter()
            .any(|call| matches!(call, BackendCall::Leave(_)))
    );
}

#[tokio::test]
async fn refresh_sends_a_frame_only_while_open() {
    let h = harness();
    let resource = ResourceId::new();

    // Not open yet: dropped.
    h.session.refresh().await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(h.connector.sent_frames().is_empty());

    h.backend.push_join(Ok(join_response(resource)));
    h.session.join(resource).await.unwrap();
    let mut states = h.session.subscribe();
    wait_for_state(&mut states, |s| s.connection.is_open()).await;

    h.session.refresh().await;
    wait_until(|| !h.connector.sent_frames().is_empty()).await;
    assert_eq!(
        h.connector.sent_frames(),
        vec![waitroom_core::protocol::ClientFrame::Refresh]
    );
}

/// A connector that refuses every open, as a misconfigured channel base
/// URL would.
struct RefusingConnector;

#[async_trait::async_trait]
impl ChannelConnector for RefusingConnector {
    async fn open(&self, _request: ChannelRequest) -> Result<(), TransportError> {
        Err(TransportError::InvalidAddress(
            "relative URL without a base".to_string(),
        ))
    }

    async fn send(&self, _frame: waitroom_core::protocol::ClientFrame) {}

    async fn close(&self) {}
}

#[tokio::test]
async fn unopenable_channel_fails_terminally_instead_of_hanging() {
    let (_events_tx, events_rx) = mpsc::unbounded_channel::<ChannelEvent>();
    let backend = MockBackend::new();
    let environment = SessionEnvironment {
        backend: Arc::clone(&backend) as Arc<dyn waitroom_core::backend::QueueBackend>,
        channel: Arc::new(RefusingConnector),
        clock: Arc::new(SteppingClock::new(test_instant())),
        reconnect: ReconnectPolicy::new().with_jitter(0.0),
        credential: Some(Credential::new("tok")),
    };
    let session = Session::new(
        environment,
        events_rx,
        SessionOptions {
            call_timeout: Duration::from_secs(2),
            tick_interval: Duration::from_millis(10),
        },
    );

    let resource = ResourceId::new();
    backend.push_join(Ok(join_response(resource)));
    session.join(resource).await.unwrap();

    // The refusal must surface as a terminal phase, never an indefinite
    // Connecting spinner.
    let mut states = session.subscribe();
    let state = wait_for_state(&mut states, |s| {
        s.connection.phase == ConnectionPhase::FailedTerminal
    })
    .await;
    assert!(state.connection.last_error.is_some());
    // The membership itself survives; only the channel is dead.
    assert!(state.position.is_some());
}

#[tokio::test]
async fn queue_status_reads_through_without_touching_state() {
    let h = harness();
    let resource = ResourceId::new();
    h.backend.push_status(Ok(QueueStatusResponse {
        resource_id: resource,
        queue_enabled: true,
        total_in_queue: 120,
        currently_processing: 8,
        estimated_wait_minutes: Some(15),
        is_active: true,
    }));

    let status = h.session.queue_status(resource).await.unwrap();
    assert_eq!(status.total_in_queue, 120);
    assert_eq!(status.currently_processing, 8);
    assert_eq!(h.backend.calls(), vec![BackendCall::Status(resource)]);

    // Read-only: the session snapshot stays untouched.
    let state = h.session.snapshot().await;
    assert!(state.position.is_none());
    assert!(!state.call_in_flight);
}
