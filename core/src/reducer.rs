//! The core trait for session business logic.
//!
//! Reducers are pure functions: `(State, Action, Environment) → (State, Effects)`.
//! They contain all state-machine logic and are deterministic and testable;
//! the store runtime executes the returned effects and feeds resulting
//! actions back in.

use crate::effect::Effects;

/// The Reducer trait - core abstraction for state transitions
///
/// # Type Parameters
///
/// - `State`: The domain state this reducer operates on
/// - `Action`: All possible inputs (user commands, async completions,
///   transport events, timer ticks)
/// - `Environment`: The injected dependencies this reducer needs
///
/// # Example
///
/// ```ignore
/// impl Reducer for SessionReducer {
///     type State = SessionState;
///     type Action = SessionAction;
///     type Environment = SessionEnvironment;
///
///     fn reduce(
///         &self,
///         state: &mut SessionState,
///         action: SessionAction,
///         env: &SessionEnvironment,
///     ) -> Effects<SessionAction> {
///         match action {
///             SessionAction::Leave => { /* ... */ smallvec![] }
///             _ => smallvec![],
///         }
///     }
/// }
/// ```
pub trait Reducer {
    /// The state type this reducer operates on
    type State;

    /// The action type this reducer processes
    type Action;

    /// The environment type with injected dependencies
    type Environment;

    /// Reduce an action into state changes and effects
    ///
    /// This is a pure function that:
    /// 1. Validates the action (including staleness guards)
    /// 2. Updates state in place
    /// 3. Returns effect descriptions to be executed
    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> Effects<Self::Action>;
}
