//! # Waitroom Client
//!
//! The runtime half of the waitroom queue-position client: the session
//! store, the HTTP backend, the WebSocket transport and the reconnect
//! policy that ties them together.
//!
//! The crate is organized around a single [`Session`](session::Session)
//! handle per queue membership:
//!
//! - [`store::Store`] serializes every state transition through one
//!   reducer and publishes snapshots to observers.
//! - [`session`] holds the reducer that owns the queue-position state
//!   machine, plus the public `Session` facade.
//! - [`backend::HttpQueueBackend`] implements the REST seam over reqwest.
//! - [`transport::WebSocketConnector`] implements the real-time channel
//!   seam over tokio-tungstenite.
//! - [`reconnect::ReconnectPolicy`] computes capped exponential backoff
//!   with jitter for transient channel loss.
//!
//! ## Quick start
//!
//! ```no_run
//! use waitroom_client::config::WaitroomConfig;
//! use waitroom_client::session::Session;
//! use waitroom_core::channel::Credential;
//! use waitroom_core::types::ResourceId;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = WaitroomConfig::from_env();
//! let session = Session::from_config(&config, Some(Credential::new("token")))?;
//!
//! let position = session.join(ResourceId::new()).await?;
//! println!("rank {}, {} ahead", position.rank, position.ahead_count);
//!
//! let mut states = session.subscribe();
//! while states.changed().await.is_ok() {
//!     let state = states.borrow().clone();
//!     if let Some(countdown) = state.countdown {
//!         println!("authorized, {}", countdown.display());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod reconnect;
pub mod session;
pub mod store;
pub mod transport;

pub use error::QueueError;
pub use session::{Session, SessionState};
