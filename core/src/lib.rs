//! # Waitroom Core
//!
//! Core types and abstractions for the waitroom queue-position client.
//!
//! This crate defines everything the client shares across its runtime and
//! test harness:
//!
//! - **Domain types** ([`types::QueuePosition`], [`types::QueueStatus`],
//!   [`types::ConnectionState`]): the authoritative record of one user's
//!   membership in a virtual admission queue.
//! - **Wire protocol** ([`protocol::ServerFrame`] / [`protocol::ClientFrame`]):
//!   the JSON frames exchanged over the real-time channel, and the close
//!   code classification that separates transient loss from terminal
//!   failure.
//! - **Reducer architecture** ([`reducer::Reducer`] and [`effect::Effect`]):
//!   state transitions are pure functions from `(State, Action, Environment)`
//!   to `(State, Effects)`; side effects are descriptions executed by the
//!   store runtime in `waitroom-client`.
//! - **Environment traits** ([`environment::Clock`]): injected dependencies
//!   so time-sensitive logic (authorization deadlines, countdowns) stays
//!   deterministic under test.
//!
//! ## Architecture Principles
//!
//! - Functional Core, Imperative Shell
//! - Unidirectional Data Flow
//! - Explicit Effects (no hidden I/O)
//! - Dependency Injection via Environment

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use smallvec::{SmallVec, smallvec};

pub mod backend;
pub mod channel;
pub mod effect;
pub mod environment;
pub mod protocol;
pub mod reducer;
pub mod types;

pub use effect::{Effect, Effects};
pub use reducer::Reducer;
