//! Side effect descriptions returned by reducers.
//!
//! Effects are NOT executed immediately. They are descriptions of what
//! should happen, returned from reducers and executed by the store runtime
//! in `waitroom-client`. Keeping I/O out of the reducer is what makes every
//! state transition in the session unit-testable.

use smallvec::SmallVec;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// The effect collection a reducer returns.
///
/// Inline capacity of four covers every transition in the session reducer
/// without allocating.
pub type Effects<Action> = SmallVec<[Effect<Action>; 4]>;

/// Effect type - describes a side effect to be executed
///
/// # Type Parameters
///
/// - `Action`: The action type that effects can produce (feedback loop)
pub enum Effect<Action> {
    /// No-op effect
    None,

    /// Run effects in parallel
    Parallel(Vec<Effect<Action>>),

    /// Run effects sequentially
    Sequential(Vec<Effect<Action>>),

    /// Delayed action (for timeouts, scheduled reconnects)
    Delay {
        /// How long to wait
        duration: Duration,
        /// Action to dispatch after delay
        action: Box<Action>,
    },

    /// Arbitrary async computation
    ///
    /// Returns `Option<Action>` - if Some, the action is fed back into the
    /// reducer
    Future(Pin<Box<dyn Future<Output = Option<Action>> + Send>>),
}

// Manual Debug implementation since Future doesn't implement Debug
impl<Action> std::fmt::Debug for Effect<Action>
where
    Action: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Effect::None => write!(f, "Effect::None"),
            Effect::Parallel(effects) => f.debug_tuple("Effect::Parallel").field(effects).finish(),
            Effect::Sequential(effects) => {
                f.debug_tuple("Effect::Sequential").field(effects).finish()
            },
            Effect::Delay { duration, action } => f
                .debug_struct("Effect::Delay")
                .field("duration", duration)
                .field("action", action)
                .finish(),
            Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
        }
    }
}

impl<Action> Effect<Action> {
    /// Combine effects to run in parallel
    #[must_use]
    pub const fn merge(effects: Vec<Effect<Action>>) -> Effect<Action> {
        Effect::Parallel(effects)
    }

    /// Chain effects to run sequentially
    #[must_use]
    pub const fn chain(effects: Vec<Effect<Action>>) -> Effect<Action> {
        Effect::Sequential(effects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_formats_without_executing() {
        let delay: Effect<u32> = Effect::Delay {
            duration: Duration::from_secs(3),
            action: Box::new(7),
        };
        let rendered = format!("{delay:?}");
        assert!(rendered.contains("Effect::Delay"));

        let fut: Effect<u32> = Effect::Future(Box::pin(async { None }));
        assert_eq!(format!("{fut:?}"), "Effect::Future(<future>)");
    }
}
