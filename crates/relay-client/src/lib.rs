//! SimpleRelay session relay client.
//!
//! Connects to a relay server over WebSocket, joins or hosts a session, and
//! keeps the connection alive across network trouble:
//!
//! - **Connectivity probing**: every connection attempt is gated by an HTTPS
//!   ping of the relay
//! - **Heartbeats**: the link is marked unstable after 3 unanswered
//!   heartbeats and restarted after 6
//! - **Rejoin**: the connection record is persisted under the caller's local
//!   id so the session can be resumed after a restart
//!
//! # Usage
//!
//! ```ignore
//! use relay_client::{RelayConfig, RelayEvent, RelayHub};
//! use relay_storage::MemoryStore;
//! use std::sync::Arc;
//!
//! let hub = RelayHub::new(RelayConfig::default(), Arc::new(MemoryStore::new()))?;
//! let client = hub.join_random("duel", 2, "player-1")?;
//! let mut events = client.subscribe();
//!
//! while let Ok(event) = events.recv().await {
//!     if let RelayEvent::MessageReceived(message) = event {
//!         println!("member {} says {}", message.member_num, message.payload);
//!     }
//! }
//! ```

mod client;
mod config;
mod driver;
mod error;
mod messages;
mod persistence;
mod prober;
mod registry;
mod session;
mod state;
mod transport;

pub use client::{RelayClient, RelayEvent, RelayHub};
pub use config::{ConnectionConfig, RelayConfig};
pub use error::{RelayError, RelayResult};
pub use messages::{parse_frame, ClientAction, RelayMessage, ServerMessage, WaitingFor};
pub use persistence::ConfigStore;
pub use prober::{ConnectivityProbe, HttpProbe};
pub use registry::LiveIdRegistry;
pub use state::{ConnectionStatus, DisconnectReason, RelayState, Stage};
pub use transport::{
    FrameSink, FrameSource, SocketHalves, Transport, TungsteniteConnector, WsConnector,
};

#[cfg(test)]
mod tests;
