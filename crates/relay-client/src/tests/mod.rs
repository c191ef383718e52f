//! Integration tests for the relay client.
//!
//! Each test drives a real [`crate::RelayHub`] against an in-memory relay
//! under paused Tokio time:
//!
//! - `harness.rs`      - Mock probe, mock connector and the test harness
//! - `identity.rs`     - Local id ownership and saved-record lookup
//! - `heartbeat.rs`    - Heartbeat cadence, stability and forced reconnects
//! - `connectivity.rs` - Probing, fail-fast first attempts and handshake retries
//! - `disconnect.rs`   - Disconnect, end of session, pause and messaging
//! - `rejoin.rs`       - Rejoin URLs, share codes and instance destruction

mod connectivity;
pub(crate) mod harness;
