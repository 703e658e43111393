//! # Waitroom Testing
//!
//! Testing utilities for the waitroom queue client:
//!
//! - [`ReducerTest`]: Given-When-Then harness for reducer unit tests
//! - [`mocks::FixedClock`] / [`mocks::SteppingClock`]: deterministic time
//! - [`mocks::MockBackend`]: scripted REST backend
//! - [`mocks::MockConnector`]: recording channel connector
//!
//! ## Example
//!
//! ```ignore
//! use waitroom_testing::{ReducerTest, assertions};
//!
//! ReducerTest::new(SessionReducer)
//!     .with_env(test_environment())
//!     .given_state(SessionState::new())
//!     .when_action(SessionAction::Tick)
//!     .then_state(|state| assert!(state.countdown.is_none()))
//!     .then_effects(|effects| assertions::assert_no_effects(effects))
//!     .run();
//! ```

pub mod mocks;

pub use reducer_test::{ReducerTest, assertions};
