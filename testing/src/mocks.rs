//! Mock implementations of the session environment seams.
//!
//! All mocks are deterministic and record what was asked of them, so
//! tests can assert on interactions as well as outcomes.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Poisoned mutexes abort the test anyway

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use waitroom_core::backend::{
    BackendError, JoinResponse, LeaveResponse, PositionResponse, QueueBackend,
    QueueStatusResponse,
};
use waitroom_core::channel::{
    ChannelConnector, ChannelEvent, ChannelRequest, TransportError,
};
use waitroom_core::environment::Clock;
use waitroom_core::protocol::ClientFrame;
use waitroom_core::types::ResourceId;

// ============================================================================
// Clocks
// ============================================================================

/// Clock frozen at a fixed instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    now: DateTime<Utc>,
}

impl FixedClock {
    /// Create a clock frozen at `now`.
    #[must_use]
    pub const fn new(now: DateTime<Utc>) -> Self {
        Self { now }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }
}

/// A fixed clock at a well-known instant: 2025-06-01 12:00:00 UTC.
#[must_use]
pub fn test_clock() -> FixedClock {
    FixedClock::new(test_instant())
}

/// The instant [`test_clock`] is frozen at.
#[must_use]
pub fn test_instant() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

/// Clock that tests advance manually.
#[derive(Debug, Clone)]
pub struct SteppingClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl SteppingClock {
    /// Create a clock starting at `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Advance the clock by `step`.
    pub fn advance(&self, step: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += step;
    }

    /// Jump the clock to an absolute instant.
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock().unwrap() = instant;
    }
}

impl Clock for SteppingClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

// ============================================================================
// Backend
// ============================================================================

/// One recorded backend interaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendCall {
    /// `join` was called.
    Join(ResourceId),
    /// `position` was called.
    Position(ResourceId),
    /// `leave` was called.
    Leave(ResourceId),
    /// `status` was called.
    Status(ResourceId),
}

/// Scripted [`QueueBackend`]: responses are queued per operation and
/// popped in order; an unscripted call fails with
/// [`BackendError::Request`].
#[derive(Default)]
pub struct MockBackend {
    join_results: Mutex<VecDeque<Result<JoinResponse, BackendError>>>,
    position_results: Mutex<VecDeque<Result<Option<PositionResponse>, BackendError>>>,
    leave_results: Mutex<VecDeque<Result<LeaveResponse, BackendError>>>,
    status_results: Mutex<VecDeque<Result<QueueStatusResponse, BackendError>>>,
    calls: Mutex<Vec<BackendCall>>,
}

impl MockBackend {
    /// Create an empty mock.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a `join` result.
    pub fn push_join(&self, result: Result<JoinResponse, BackendError>) {
        self.join_results.lock().unwrap().push_back(result);
    }

    /// Queue a `position` result.
    pub fn push_position(&self, result: Result<Option<PositionResponse>, BackendError>) {
        self.position_results.lock().unwrap().push_back(result);
    }

    /// Queue a `leave` result.
    pub fn push_leave(&self, result: Result<LeaveResponse, BackendError>) {
        self.leave_results.lock().unwrap().push_back(result);
    }

    /// Queue a `status` result.
    pub fn push_status(&self, result: Result<QueueStatusResponse, BackendError>) {
        self.status_results.lock().unwrap().push_back(result);
    }

    /// All calls made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap().clone()
    }

    fn unscripted<T>() -> Result<T, BackendError> {
        Err(BackendError::Request("no scripted response".to_string()))
    }
}

#[async_trait]
impl QueueBackend for MockBackend {
    async fn join(&self, resource_id: ResourceId) -> Result<JoinResponse, BackendError> {
        self.calls.lock().unwrap().push(BackendCall::Join(resource_id));
        self.join_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(Self::unscripted)
    }

    async fn position(
        &self,
        resource_id: ResourceId,
    ) -> Result<Option<PositionResponse>, BackendError> {
        self.calls
            .lock()
            .unwrap()
            .push(BackendCall::Position(resource_id));
        self.position_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(Self::unscripted)
    }

    async fn leave(&self, resource_id: ResourceId) -> Result<LeaveResponse, BackendError> {
        self.calls.lock().unwrap().push(BackendCall::Leave(resource_id));
        self.leave_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(Self::unscripted)
    }

    async fn status(&self, resource_id: ResourceId) -> Result<QueueStatusResponse, BackendError> {
        self.calls
            .lock()
            .unwrap()
            .push(BackendCall::Status(resource_id));
        self.status_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(Self::unscripted)
    }
}

// ============================================================================
// Channel connector
// ============================================================================

/// Recording [`ChannelConnector`].
///
/// Records open requests, sent frames and close calls. When built with
/// [`MockConnector::with_auto_open`], every `open` immediately emits the
/// matching [`ChannelEvent::Opened`] on the given event sender, imitating
/// a server that accepts instantly.
#[derive(Default)]
pub struct MockConnector {
    opens: Mutex<Vec<ChannelRequest>>,
    sent: Mutex<Vec<ClientFrame>>,
    closes: AtomicUsize,
    auto_open: Option<mpsc::UnboundedSender<ChannelEvent>>,
}

impl MockConnector {
    /// Create a purely recording connector.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a connector that auto-acknowledges opens on `events`.
    #[must_use]
    pub fn with_auto_open(events: mpsc::UnboundedSender<ChannelEvent>) -> Arc<Self> {
        Arc::new(Self {
            auto_open: Some(events),
            ..Self::default()
        })
    }

    /// All open requests so far, in order.
    #[must_use]
    pub fn opens(&self) -> Vec<ChannelRequest> {
        self.opens.lock().unwrap().clone()
    }

    /// Number of open requests so far.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.opens.lock().unwrap().len()
    }

    /// The most recent open request.
    #[must_use]
    pub fn last_open(&self) -> Option<ChannelRequest> {
        self.opens.lock().unwrap().last().cloned()
    }

    /// All frames sent so far, in order.
    #[must_use]
    pub fn sent_frames(&self) -> Vec<ClientFrame> {
        self.sent.lock().unwrap().clone()
    }

    /// Number of close calls so far.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelConnector for MockConnector {
    async fn open(&self, request: ChannelRequest) -> Result<(), TransportError> {
        let epoch = request.epoch;
        self.opens.lock().unwrap().push(request);
        if let Some(events) = &self.auto_open {
            let _ = events.send(ChannelEvent::Opened { epoch });
        }
        Ok(())
    }

    async fn send(&self, frame: ClientFrame) {
        self.sent.lock().unwrap().push(frame);
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}
