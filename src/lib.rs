//! Signaling relay for classroom screen sharing.
//!
//! Browsers open one WebSocket each and exchange JSON control messages;
//! the relay keeps track of who is connected, which teacher is broadcasting
//! to which classes, and routes WebRTC negotiation payloads between peers.

pub mod app_state;
pub mod config;
pub mod error;
pub mod link;
pub mod registry;
pub mod relay;
pub mod server;
pub mod session;
pub mod signal;
pub mod ws;

pub use app_state::AppState;
pub use config::{Args, RelayConfig};
pub use error::{RelayError, Result};
pub use relay::Relay;
