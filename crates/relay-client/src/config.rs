//! Relay client configuration and the persisted connection record.

use crate::RelayResult;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use url::Url;

/// Relay client configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Relay HTTPS base URL; `/ping` is appended for connectivity probes.
    pub https_url: String,
    /// Relay WebSocket URL; connection parameters are appended as a query.
    pub wss_url: String,
    /// Timeout of a single connectivity probe in seconds.
    pub probe_timeout_secs: u64,
    /// Pause between failed probes in seconds.
    pub probe_retry_delay_secs: u64,
    /// Timeout of the WebSocket handshake and of each send, in seconds.
    pub ws_timeout_secs: u64,
    /// Extra handshake attempts after the first one fails.
    pub ws_connect_retries: u32,
    /// Heartbeat interval while the connection is healthy.
    pub heartbeat_stable_secs: u64,
    /// Heartbeat interval while waiting on the relay or missing acks.
    pub heartbeat_unstable_secs: u64,
    /// Unacknowledged heartbeats before the link is reported unstable.
    pub heartbeats_until_unstable: u32,
    /// Unacknowledged heartbeats before the link is treated as dead.
    pub heartbeats_until_reconnect: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            https_url: "https://relay.simplerelay.dev".to_string(),
            wss_url: "wss://relay.simplerelay.dev/ws".to_string(),
            probe_timeout_secs: 3,
            probe_retry_delay_secs: 3,
            ws_timeout_secs: 3,
            ws_connect_retries: 2,
            heartbeat_stable_secs: 10,
            heartbeat_unstable_secs: 2,
            heartbeats_until_unstable: 3,
            heartbeats_until_reconnect: 6,
        }
    }
}

impl RelayConfig {
    /// `GET` target of the connectivity probe.
    pub fn ping_url(&self) -> RelayResult<Url> {
        Ok(Url::parse(&format!(
            "{}/ping",
            self.https_url.trim_end_matches('/')
        ))?)
    }

    /// Parsed WebSocket base URL.
    pub fn wss_base(&self) -> RelayResult<Url> {
        Ok(Url::parse(&self.wss_url)?)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn probe_retry_delay(&self) -> Duration {
        Duration::from_secs(self.probe_retry_delay_secs)
    }

    pub fn ws_timeout(&self) -> Duration {
        Duration::from_secs(self.ws_timeout_secs)
    }

    pub(crate) fn heartbeat_policy(&self) -> HeartbeatPolicy {
        HeartbeatPolicy {
            stable: Duration::from_secs(self.heartbeat_stable_secs),
            unstable: Duration::from_secs(self.heartbeat_unstable_secs),
            until_unstable: self.heartbeats_until_unstable,
            until_reconnect: self.heartbeats_until_reconnect,
        }
    }
}

/// Heartbeat timing and thresholds, as consumed by the session reducer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatPolicy {
    pub stable: Duration,
    pub unstable: Duration,
    pub until_unstable: u32,
    pub until_reconnect: u32,
}

impl Default for HeartbeatPolicy {
    fn default() -> Self {
        RelayConfig::default().heartbeat_policy()
    }
}

/// The reconnection record of one relay instance.
///
/// Persisted as camelCase JSON under the instance's local id. Empty strings
/// in stored data read back as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    pub local_id: String,
    #[serde(default)]
    pub session_type: String,
    /// Target session size; 0 when joining an existing session.
    #[serde(default)]
    pub num_members: u32,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub is_host: bool,
    #[serde(
        default,
        deserialize_with = "non_empty",
        skip_serializing_if = "Option::is_none"
    )]
    pub session_id: Option<String>,
    #[serde(
        default,
        deserialize_with = "non_empty",
        skip_serializing_if = "Option::is_none"
    )]
    pub member_id: Option<String>,
    #[serde(default)]
    pub session_started: bool,
    #[serde(default)]
    pub trying_to_end_session: bool,
}

fn non_empty<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

impl ConnectionConfig {
    /// Matchmaking into any public session of `session_type`.
    pub fn join_random(session_type: &str, target_num_members: u32, local_id: &str) -> Self {
        Self {
            local_id: local_id.to_string(),
            session_type: session_type.to_string(),
            num_members: target_num_members,
            ..Default::default()
        }
    }

    /// Creating a private session; the relay assigns its id.
    pub fn host_private(session_type: &str, target_num_members: u32, local_id: &str) -> Self {
        Self {
            local_id: local_id.to_string(),
            session_type: session_type.to_string(),
            num_members: target_num_members,
            is_private: true,
            is_host: true,
            ..Default::default()
        }
    }

    /// Joining a known private session.
    pub fn join_private(session_type: &str, session_id: &str, local_id: &str) -> Self {
        Self {
            local_id: local_id.to_string(),
            session_type: session_type.to_string(),
            is_private: true,
            session_id: Some(session_id.to_string()).filter(|s| !s.is_empty()),
            ..Default::default()
        }
    }

    /// A private session whose share code has not arrived yet.
    pub fn is_waiting_for_password(&self) -> bool {
        self.is_private && self.session_id.is_none()
    }

    /// WebSocket URL for the next connection attempt.
    ///
    /// A known member id is sent alone. Otherwise the session type goes with
    /// either the session id or the matchmaking parameters.
    pub fn connection_url(&self, base: &Url) -> Url {
        let mut url = base.clone();
        url.set_query(None);

        {
            let mut query = url.query_pairs_mut();
            if let Some(member_id) = &self.member_id {
                query.append_pair("memberId", member_id);
            } else {
                if !self.session_type.is_empty() {
                    query.append_pair("sessionType", &self.session_type);
                }
                match &self.session_id {
                    Some(session_id) => {
                        query.append_pair("sessionId", session_id);
                    }
                    None => {
                        if self.num_members != 0 {
                            query.append_pair("targetNumMembers", &self.num_members.to_string());
                        }
                        if self.is_private {
                            query.append_pair("private", "true");
                        }
                    }
                }
            }
        }

        if url.query() == Some("") {
            url.set_query(None);
        }
        url
    }
}
