//! The store runtime: serialized state mutation plus effect execution.
//!
//! Every action flows through [`Store::send`], which runs the reducer under
//! an exclusive write lock (the single-writer guarantee), publishes the new
//! state snapshot to watchers, and then executes the returned effects on
//! background tasks. Effect-produced actions feed back through the same
//! path, and are additionally broadcast so [`Store::send_and_wait_for`] can
//! turn the fire-and-forget loop into a request/response call.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{RwLock, broadcast, watch};
use waitroom_core::{Effect, Reducer};

/// Capacity of the action broadcast channel; a lagging observer skips
/// actions rather than applying backpressure to the store.
const ACTION_CHANNEL_CAPACITY: usize = 64;

/// Failure of a [`Store::send_and_wait_for`] call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No matching completion arrived within the timeout.
    #[error("Timed out waiting for a completion action")]
    Timeout,

    /// The store's action channel closed.
    #[error("Store is closed")]
    Closed,
}

/// Single-writer state container driving a [`Reducer`].
///
/// Cheap to clone; clones share the same state, watchers and environment.
pub struct Store<R>
where
    R: Reducer,
{
    state: Arc<RwLock<R::State>>,
    reducer: Arc<R>,
    environment: Arc<R::Environment>,
    state_watch: watch::Sender<R::State>,
    action_broadcast: broadcast::Sender<R::Action>,
}

impl<R> Clone for Store<R>
where
    R: Reducer,
{
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            reducer: Arc::clone(&self.reducer),
            environment: Arc::clone(&self.environment),
            state_watch: self.state_watch.clone(),
            action_broadcast: self.action_broadcast.clone(),
        }
    }
}

impl<R> Store<R>
where
    R: Reducer + Send + Sync + 'static,
    R::State: Clone + Send + Sync + 'static,
    R::Action: Clone + Send + Sync + 'static,
    R::Environment: Send + Sync + 'static,
{
    /// Create a store with an initial state, a reducer and its environment.
    #[must_use]
    pub fn new(initial_state: R::State, reducer: R, environment: R::Environment) -> Self {
        let (state_watch, _) = watch::channel(initial_state.clone());
        let (action_broadcast, _) = broadcast::channel(ACTION_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(RwLock::new(initial_state)),
            reducer: Arc::new(reducer),
            environment: Arc::new(environment),
            state_watch,
            action_broadcast,
        }
    }

    /// Dispatch an action: reduce, publish the snapshot, execute effects.
    #[tracing::instrument(skip(self, action), name = "store_send")]
    pub async fn send(&self, action: R::Action) {
        metrics::counter!("store.actions.total").increment(1);

        let effects = {
            let mut state = self.state.write().await;
            let effects = self.reducer.reduce(&mut state, action, &self.environment);
            self.state_watch.send_replace(state.clone());
            effects
        };

        tracing::trace!(count = effects.len(), "Executing effects");
        for effect in effects {
            self.spawn_effect(effect);
        }
    }

    /// Dispatch `action` and suspend until an effect-produced action
    /// matching `predicate` feeds back, or `timeout` elapses.
    ///
    /// The completion subscription is opened before the action is sent, so
    /// a completion can never race past the caller.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Timeout`] when no matching action arrives in
    /// time, or [`StoreError::Closed`] when the store shuts down first.
    pub async fn send_and_wait_for<F>(
        &self,
        action: R::Action,
        predicate: F,
        timeout: Duration,
    ) -> Result<R::Action, StoreError>
    where
        F: Fn(&R::Action) -> bool,
    {
        let mut actions = self.action_broadcast.subscribe();
        self.send(action).await;

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                metrics::counter!("store.calls.timeout").increment(1);
                return Err(StoreError::Timeout);
            }
            match tokio::time::timeout(deadline - now, actions.recv()).await {
                Ok(Ok(candidate)) => {
                    if predicate(&candidate) {
                        return Ok(candidate);
                    }
                }
                Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    tracing::warn!(skipped, "Completion observer lagged");
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => {
                    return Err(StoreError::Closed);
                }
                Err(_) => {
                    metrics::counter!("store.calls.timeout").increment(1);
                    return Err(StoreError::Timeout);
                }
            }
        }
    }

    /// Subscribe to state snapshots. The receiver always holds the latest
    /// state; intermediate snapshots may be skipped, never reordered.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<R::State> {
        self.state_watch.subscribe()
    }

    /// Subscribe to effect-produced actions.
    #[must_use]
    pub fn subscribe_actions(&self) -> broadcast::Receiver<R::Action> {
        self.action_broadcast.subscribe()
    }

    /// Read the current state through a closure, without cloning it.
    pub async fn with_state<F, T>(&self, read: F) -> T
    where
        F: FnOnce(&R::State) -> T,
    {
        let state = self.state.read().await;
        read(&state)
    }

    fn spawn_effect(&self, effect: Effect<R::Action>) {
        match effect {
            Effect::None => {}
            Effect::Parallel(effects) => {
                for effect in effects {
                    self.spawn_effect(effect);
                }
            }
            other => {
                let store = self.clone();
                tokio::spawn(async move {
                    store.run_effect(other).await;
                });
            }
        }
    }

    async fn run_effect(&self, effect: Effect<R::Action>) {
        match effect {
            Effect::None => {}
            Effect::Parallel(effects) => {
                for effect in effects {
                    self.spawn_effect(effect);
                }
            }
            Effect::Sequential(effects) => {
                for effect in effects {
                    Box::pin(self.run_effect(effect)).await;
                }
            }
            Effect::Delay { duration, action } => {
                tokio::time::sleep(duration).await;
                self.feedback(*action).await;
            }
            Effect::Future(future) => {
                if let Some(action) = future.await {
                    self.feedback(action).await;
                }
            }
        }
    }

    async fn feedback(&self, action: R::Action) {
        // Reduce first, broadcast second: a send_and_wait_for caller must
        // never observe a completion before its state transition landed.
        self.send(action.clone()).await;
        let _ = self.action_broadcast.send(action);
    }
}
