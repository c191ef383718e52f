//! Session protocol state machine.
//!
//! [`Session`] owns the connection record and the caller-visible state of
//! one relay instance. It never performs I/O: inbound messages, heartbeat
//! ticks and caller requests are reduced to a list of [`Effect`]s that the
//! driver applies in order.

use crate::config::HeartbeatPolicy;
use crate::messages::{ClientAction, RelayMessage, ServerMessage, WaitingFor};
use crate::state::{ConnectionStatus, DisconnectReason, RelayState, Stage};
use crate::ConnectionConfig;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Largest member count accepted from SESSION_START. Presence is tracked per
/// slot, so the relay's figure bounds an allocation.
pub(crate) const MAX_SESSION_MEMBERS: u32 = 1024;

/// Side effect requested by the reducer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Effect {
    /// Queue an outbound frame.
    Send(ClientAction),
    /// Persist the connection record.
    SaveConfig,
    /// Publish the current state.
    StateChanged,
    /// Deliver an application message to subscribers.
    Message(RelayMessage),
    /// Drop the connection and start a new connection cycle.
    Reconnect,
    /// Close the instance.
    Teardown {
        reason: DisconnectReason,
        clear_config: bool,
    },
}

impl Effect {
    /// Effects after which the rest of the current frame is dropped.
    pub(crate) fn interrupts(&self) -> bool {
        matches!(self, Effect::Reconnect | Effect::Teardown { .. })
    }
}

pub(crate) struct Session {
    config: ConnectionConfig,
    state: RelayState,
    policy: HeartbeatPolicy,
    /// Time of the newest message seen, the heartbeat's resend cursor.
    last_message_time: i64,
    heartbeats_pending: u32,
}

impl Session {
    pub(crate) fn new(config: ConnectionConfig, policy: HeartbeatPolicy) -> Self {
        let mut state = RelayState {
            is_host: config.is_host,
            ..Default::default()
        };

        if config.session_started {
            state.stage = Stage::SessionInProgress;
        } else if config.is_host {
            state.password = config.session_id.clone();
        }

        Self {
            config,
            state,
            policy,
            last_message_time: 0,
            heartbeats_pending: 0,
        }
    }

    pub(crate) fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub(crate) fn state(&self) -> &RelayState {
        &self.state
    }

    pub(crate) fn status(&self) -> ConnectionStatus {
        self.state.connection_status
    }

    #[cfg(test)]
    pub(crate) fn heartbeats_pending(&self) -> u32 {
        self.heartbeats_pending
    }

    fn local_id(&self) -> &str {
        &self.config.local_id
    }

    /// Route one inbound message.
    pub(crate) fn handle(&mut self, message: ServerMessage) -> Vec<Effect> {
        match message {
            ServerMessage::Connection { member_id } => {
                debug!(local_id = %self.local_id(), member_id = %member_id, "Member id assigned");
                self.config.member_id = Some(member_id);
                vec![Effect::SaveConfig]
            }
            ServerMessage::ConnectionOverwrite => {
                info!(local_id = %self.local_id(), "CONNECTION_OVERWRITE received, tearing down and clearing config");
                vec![Effect::Teardown {
                    reason: DisconnectReason::ConnectionOverwritten,
                    clear_config: true,
                }]
            }
            ServerMessage::Heartbeat => self.on_heartbeat_ack(),
            ServerMessage::InvalidConnection => {
                info!(local_id = %self.local_id(), "INVALID_CONNECTION received, reconnecting");
                vec![Effect::Reconnect]
            }
            ServerMessage::MemberDisconnect { member_num } => self.set_presence(member_num, false),
            ServerMessage::MemberReconnect { member_num } => self.set_presence(member_num, true),
            ServerMessage::Message(message) => self.on_message(message),
            ServerMessage::PrivateSessionPending { session_id } => {
                // Heartbeats can make the relay repeat this.
                if self.state.ready {
                    return Vec::new();
                }
                self.config.session_id = Some(session_id.clone());
                self.state.password = Some(session_id);
                vec![Effect::SaveConfig, Effect::StateChanged]
            }
            ServerMessage::SessionEnd => {
                info!(local_id = %self.local_id(), "SESSION_END received, tearing down and clearing config");
                vec![Effect::Teardown {
                    reason: DisconnectReason::SessionEnded,
                    clear_config: true,
                }]
            }
            ServerMessage::SessionReconnect {
                member_num,
                members,
                pinned_message,
            } => {
                if self.state.ready {
                    return Vec::new();
                }
                let pinned_message = pinned_message.filter(RelayMessage::is_present);
                if let Some(pinned) = &pinned_message {
                    self.last_message_time = pinned.time;
                }

                self.config.session_started = true;
                self.state.member_num = Some(member_num);
                self.state.member_presence = members;
                self.state.pinned_message = pinned_message;
                self.state.ready = true;
                self.state.stage = Stage::SessionInProgress;
                info!(local_id = %self.local_id(), member_num, "Session rejoined");
                vec![Effect::SaveConfig, Effect::StateChanged]
            }
            ServerMessage::SessionStart {
                session_type,
                session_id,
                num_members,
                member_num,
            } => {
                if self.state.ready {
                    return Vec::new();
                }
                if num_members > MAX_SESSION_MEMBERS {
                    warn!(local_id = %self.local_id(), num_members, "SESSION_START with implausible member count, dropping");
                    return Vec::new();
                }
                self.config.session_type = session_type;
                self.config.session_id = Some(session_id);
                self.config.num_members = num_members;
                self.config.session_started = true;

                self.state.member_num = Some(member_num);
                self.state.ready = true;
                self.state.stage = Stage::SessionInProgress;
                self.state.password = None;
                self.state.member_presence = vec![true; num_members as usize];
                info!(local_id = %self.local_id(), member_num, num_members, "Session started");
                vec![Effect::SaveConfig, Effect::StateChanged]
            }
            ServerMessage::Unknown => Vec::new(),
        }
    }

    fn on_heartbeat_ack(&mut self) -> Vec<Effect> {
        self.heartbeats_pending = 0;
        if self.state.connection_is_stable {
            return Vec::new();
        }
        self.state.connection_is_stable = true;
        vec![Effect::StateChanged]
    }

    fn set_presence(&mut self, member_num: u32, present: bool) -> Vec<Effect> {
        match self.state.member_presence.get_mut(member_num as usize) {
            Some(slot) => {
                *slot = present;
                vec![Effect::StateChanged]
            }
            None => {
                warn!(
                    local_id = %self.local_id(),
                    member_num,
                    slots = self.state.member_presence.len(),
                    "Presence update for unknown member slot"
                );
                Vec::new()
            }
        }
    }

    fn on_message(&mut self, message: RelayMessage) -> Vec<Effect> {
        self.last_message_time = message.time;

        let mut effects = vec![Effect::Message(message.clone())];
        if message.pinned {
            self.state.pinned_message = Some(message).filter(RelayMessage::is_present);
            effects.push(Effect::StateChanged);
        }
        effects
    }

    /// Interval until the next heartbeat.
    pub(crate) fn heartbeat_delay(&self) -> Duration {
        let unstable = self.config.is_waiting_for_password()
            || (self.state.stage == Stage::SessionInProgress && !self.state.ready)
            || self.heartbeats_pending != 0;

        if unstable {
            self.policy.unstable
        } else {
            self.policy.stable
        }
    }

    /// Produce a heartbeat. No-op unless connected.
    ///
    /// Sends END_SESSION instead while an end of session was requested.
    pub(crate) fn heartbeat(&mut self) -> Vec<Effect> {
        if !self.state.is_connected() {
            return Vec::new();
        }

        let action = if self.config.trying_to_end_session {
            ClientAction::EndSession
        } else {
            ClientAction::Heartbeat {
                incl_messages_after: self.last_message_time,
                waiting_for: self.waiting_for(),
            }
        };

        let mut effects = vec![Effect::Send(action)];
        self.heartbeats_pending += 1;

        if self.heartbeats_pending >= self.policy.until_reconnect {
            info!(
                local_id = %self.local_id(),
                pending = self.heartbeats_pending,
                "Too many missed heartbeats, reconnecting"
            );
            effects.push(Effect::Reconnect);
            return effects;
        }

        if self.heartbeats_pending >= self.policy.until_unstable && self.state.connection_is_stable {
            debug!(local_id = %self.local_id(), pending = self.heartbeats_pending, "Connection unstable");
            self.state.connection_is_stable = false;
            effects.push(Effect::StateChanged);
        }

        effects
    }

    fn waiting_for(&self) -> Vec<WaitingFor> {
        if self.state.ready {
            return Vec::new();
        }

        let mut waiting_for = Vec::with_capacity(2);
        if self.config.is_waiting_for_password() {
            waiting_for.push(WaitingFor::PrivateSessionPending);
        }
        waiting_for.push(if self.config.member_id.is_none() {
            WaitingFor::SessionStart
        } else {
            WaitingFor::SessionReconnect
        });
        waiting_for
    }

    /// Switch heartbeats to END_SESSION for an in-progress session.
    ///
    /// Returns false when the session has not started, in which case the
    /// caller falls back to a plain disconnect.
    pub(crate) fn request_end_session(&mut self) -> bool {
        if self.state.stage != Stage::SessionInProgress {
            return false;
        }
        info!(local_id = %self.local_id(), "End session requested, sending end session instruction");
        self.config.trying_to_end_session = true;
        true
    }

    /// A socket is open: start a fresh heartbeat epoch.
    pub(crate) fn mark_connected(&mut self) {
        self.state.connection_status = ConnectionStatus::Connected;
        self.state.connection_is_stable = true;
        self.heartbeats_pending = 0;
    }

    /// The connection was lost or dropped on purpose; the handshake has to
    /// be repeated.
    pub(crate) fn mark_reconnecting(&mut self) {
        self.state.connection_status = ConnectionStatus::Reconnecting;
        self.state.ready = false;
    }

    pub(crate) fn mark_paused(&mut self) {
        self.state.connection_status = ConnectionStatus::Paused;
    }

    pub(crate) fn mark_disconnected(&mut self, reason: DisconnectReason) {
        self.state.connection_status = ConnectionStatus::Disconnected;
        self.state.disconnect_reason = Some(reason);
        if !reason.is_reconnectable() {
            self.state.stage = Stage::ConnectionClosed;
        }
    }

    /// Leave `Paused` or a reconnectable `Disconnected` for a new connection
    /// cycle.
    ///
    /// A first attempt that failed before any session started goes back to
    /// `Connecting`, keeping its fail-fast behavior.
    pub(crate) fn restart(&mut self) {
        let first_attempt = self.state.disconnect_reason
            == Some(DisconnectReason::InitialConnectionFailed)
            && self.state.stage == Stage::WaitingForMoreMembers;

        self.state.connection_status = if first_attempt {
            ConnectionStatus::Connecting
        } else {
            ConnectionStatus::Reconnecting
        };
        self.state.disconnect_reason = None;
        self.state.ready = false;
    }

    /// Whether a connection attempt that cannot reach the relay should give
    /// up immediately.
    pub(crate) fn fails_fast(&self) -> bool {
        self.state.stage == Stage::WaitingForMoreMembers
            && self.state.connection_status == ConnectionStatus::Connecting
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected(config: ConnectionConfig) -> Session {
        let mut session = Session::new(config, HeartbeatPolicy::default());
        session.mark_connected();
        session
    }

    fn session_start() -> ServerMessage {
        ServerMessage::SessionStart {
            session_type: "duel".to_string(),
            session_id: "abc".to_string(),
            num_members: 2,
            member_num: 0,
        }
    }

    fn sent(effects: &[Effect]) -> Vec<ClientAction> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Send(action) => Some(action.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_session_start_on_private_host() {
        let mut session = connected(ConnectionConfig::host_private("duel", 2, "p1"));

        let effects = session.handle(session_start());
        assert_eq!(effects, vec![Effect::SaveConfig, Effect::StateChanged]);

        let state = session.state();
        assert!(state.ready);
        assert_eq!(state.stage, Stage::SessionInProgress);
        assert_eq!(state.member_presence, vec![true, true]);
        assert_eq!(state.member_num, Some(0));
        assert!(state.is_host);
        assert!(state.password.is_none());
        assert_eq!(session.config().session_id.as_deref(), Some("abc"));
        assert!(session.config().session_started);
    }

    #[test]
    fn test_session_start_with_implausible_member_count_is_dropped() {
        let mut session = connected(ConnectionConfig::join_random("duel", 2, "p1"));
        let before = session.state().clone();

        let effects = session.handle(ServerMessage::SessionStart {
            session_type: "duel".to_string(),
            session_id: "abc".to_string(),
            num_members: u32::MAX,
            member_num: 0,
        });

        assert!(effects.is_empty());
        assert_eq!(session.state(), &before);
        assert!(session.config().session_id.is_none());

        let effects = session.handle(ServerMessage::SessionStart {
            session_type: "duel".to_string(),
            session_id: "abc".to_string(),
            num_members: MAX_SESSION_MEMBERS,
            member_num: 0,
        });
        assert_eq!(effects, vec![Effect::SaveConfig, Effect::StateChanged]);
        assert_eq!(session.state().member_presence.len(), MAX_SESSION_MEMBERS as usize);
    }

    #[test]
    fn test_session_start_is_idempotent() {
        let mut session = connected(ConnectionConfig::join_random("duel", 2, "p1"));
        session.handle(session_start());
        let state = session.state().clone();
        let config = session.config().clone();

        let effects = session.handle(ServerMessage::SessionStart {
            session_type: "other".to_string(),
            session_id: "zzz".to_string(),
            num_members: 5,
            member_num: 3,
        });

        assert!(effects.is_empty());
        assert_eq!(session.state(), &state);
        assert_eq!(session.config(), &config);
    }

    #[test]
    fn test_session_reconnect_is_idempotent() {
        let mut config = ConnectionConfig::join_random("duel", 2, "p1");
        config.member_id = Some("m-1".to_string());
        config.session_started = true;
        let mut session = connected(config);

        let pinned = RelayMessage {
            member_num: 1,
            payload: "board".to_string(),
            pinned: true,
            time: 77,
        };
        let reconnect = ServerMessage::SessionReconnect {
            member_num: 1,
            members: vec![true, false],
            pinned_message: Some(pinned.clone()),
        };

        assert_eq!(
            session.handle(reconnect.clone()),
            vec![Effect::SaveConfig, Effect::StateChanged]
        );
        let state = session.state().clone();
        assert_eq!(state.pinned_message, Some(pinned));
        assert_eq!(state.member_presence, vec![true, false]);
        assert_eq!(session.last_message_time, 77);

        assert!(session.handle(reconnect).is_empty());
        assert_eq!(session.state(), &state);
    }

    #[test]
    fn test_session_reconnect_placeholder_pin_is_absent() {
        let mut session = connected(ConnectionConfig::join_random("duel", 2, "p1"));
        session.handle(ServerMessage::SessionReconnect {
            member_num: 0,
            members: vec![true, true],
            pinned_message: Some(RelayMessage::default()),
        });
        assert!(session.state().pinned_message.is_none());
        assert_eq!(session.last_message_time, 0);
    }

    #[test]
    fn test_private_session_pending() {
        let mut session = connected(ConnectionConfig::host_private("duel", 2, "p1"));
        assert_eq!(session.heartbeat_delay(), Duration::from_secs(2));

        let effects = session.handle(ServerMessage::PrivateSessionPending {
            session_id: "code".to_string(),
        });
        assert_eq!(effects, vec![Effect::SaveConfig, Effect::StateChanged]);
        assert_eq!(session.state().password.as_deref(), Some("code"));
        assert_eq!(session.config().session_id.as_deref(), Some("code"));
        assert_eq!(session.heartbeat_delay(), Duration::from_secs(10));

        session.handle(session_start());
        assert!(session
            .handle(ServerMessage::PrivateSessionPending {
                session_id: "late".to_string()
            })
            .is_empty());
        assert!(session.state().password.is_none());
    }

    #[test]
    fn test_connection_saves_member_id() {
        let mut session = connected(ConnectionConfig::join_random("duel", 2, "p1"));
        let effects = session.handle(ServerMessage::Connection {
            member_id: "m-1".to_string(),
        });
        assert_eq!(effects, vec![Effect::SaveConfig]);
        assert_eq!(session.config().member_id.as_deref(), Some("m-1"));
    }

    #[test]
    fn test_messages_and_pins() {
        let mut session = connected(ConnectionConfig::join_random("duel", 2, "p1"));

        let plain = RelayMessage {
            member_num: 1,
            payload: "hi".to_string(),
            pinned: false,
            time: 10,
        };
        assert_eq!(
            session.handle(ServerMessage::Message(plain.clone())),
            vec![Effect::Message(plain)]
        );
        assert!(session.state().pinned_message.is_none());

        let pinned = RelayMessage {
            member_num: 0,
            payload: "board".to_string(),
            pinned: true,
            time: 20,
        };
        assert_eq!(
            session.handle(ServerMessage::Message(pinned.clone())),
            vec![Effect::Message(pinned.clone()), Effect::StateChanged]
        );
        assert_eq!(session.state().pinned_message, Some(pinned));
        assert_eq!(session.last_message_time, 20);
    }

    #[test]
    fn test_presence_updates() {
        let mut session = connected(ConnectionConfig::join_random("duel", 2, "p1"));
        session.handle(session_start());

        assert_eq!(
            session.handle(ServerMessage::MemberDisconnect { member_num: 1 }),
            vec![Effect::StateChanged]
        );
        assert_eq!(session.state().member_presence, vec![true, false]);

        session.handle(ServerMessage::MemberReconnect { member_num: 1 });
        assert_eq!(session.state().member_presence, vec![true, true]);

        assert!(session
            .handle(ServerMessage::MemberDisconnect { member_num: 9 })
            .is_empty());
        assert_eq!(session.state().member_presence, vec![true, true]);
    }

    #[test]
    fn test_terminal_messages() {
        let mut session = connected(ConnectionConfig::join_random("duel", 2, "p1"));
        assert_eq!(
            session.handle(ServerMessage::SessionEnd),
            vec![Effect::Teardown {
                reason: DisconnectReason::SessionEnded,
                clear_config: true
            }]
        );
        assert_eq!(
            session.handle(ServerMessage::ConnectionOverwrite),
            vec![Effect::Teardown {
                reason: DisconnectReason::ConnectionOverwritten,
                clear_config: true
            }]
        );
        assert_eq!(
            session.handle(ServerMessage::InvalidConnection),
            vec![Effect::Reconnect]
        );
        assert!(Effect::Reconnect.interrupts());
        assert!(!Effect::StateChanged.interrupts());
    }

    #[test]
    fn test_heartbeat_waiting_for() {
        let mut session = connected(ConnectionConfig::host_private("duel", 2, "p1"));
        assert_eq!(
            sent(&session.heartbeat()),
            vec![ClientAction::Heartbeat {
                incl_messages_after: 0,
                waiting_for: vec![WaitingFor::PrivateSessionPending, WaitingFor::SessionStart],
            }]
        );

        let mut config = ConnectionConfig::join_random("duel", 2, "p1");
        config.member_id = Some("m-1".to_string());
        let mut session = connected(config);
        assert_eq!(
            sent(&session.heartbeat()),
            vec![ClientAction::Heartbeat {
                incl_messages_after: 0,
                waiting_for: vec![WaitingFor::SessionReconnect],
            }]
        );

        session.handle(ServerMessage::SessionReconnect {
            member_num: 0,
            members: vec![true, true],
            pinned_message: None,
        });
        assert_eq!(
            sent(&session.heartbeat()),
            vec![ClientAction::Heartbeat {
                incl_messages_after: 0,
                waiting_for: vec![],
            }]
        );
    }

    #[test]
    fn test_heartbeat_only_while_connected() {
        let mut session = Session::new(
            ConnectionConfig::join_random("duel", 2, "p1"),
            HeartbeatPolicy::default(),
        );
        assert!(session.heartbeat().is_empty());
        assert_eq!(session.heartbeats_pending(), 0);
    }

    #[test]
    fn test_three_missed_heartbeats_mark_unstable_then_ack_restores() {
        let mut session = connected(ConnectionConfig::join_random("duel", 2, "p1"));
        session.handle(session_start());
        assert_eq!(session.heartbeat_delay(), Duration::from_secs(10));

        assert_eq!(session.heartbeat().len(), 1);
        assert_eq!(session.heartbeat_delay(), Duration::from_secs(2));
        assert_eq!(session.heartbeat().len(), 1);
        assert!(session.state().connection_is_stable);

        let effects = session.heartbeat();
        assert_eq!(effects.last(), Some(&Effect::StateChanged));
        assert!(!session.state().connection_is_stable);
        assert!(!effects.contains(&Effect::Reconnect));

        // Already unstable: no repeated state change.
        assert_eq!(session.heartbeat().len(), 1);

        assert_eq!(
            session.handle(ServerMessage::Heartbeat),
            vec![Effect::StateChanged]
        );
        assert!(session.state().connection_is_stable);
        assert_eq!(session.heartbeats_pending(), 0);
        assert_eq!(session.status(), ConnectionStatus::Connected);
        assert_eq!(session.heartbeat_delay(), Duration::from_secs(10));
    }

    #[test]
    fn test_six_missed_heartbeats_reconnect() {
        let mut session = connected(ConnectionConfig::join_random("duel", 2, "p1"));

        for _ in 0..5 {
            assert!(!session.heartbeat().contains(&Effect::Reconnect));
        }
        let effects = session.heartbeat();
        assert_eq!(effects.last(), Some(&Effect::Reconnect));
        assert_eq!(session.heartbeats_pending(), 6);
    }

    #[test]
    fn test_end_session_request() {
        let mut session = Session::new(
            ConnectionConfig::join_random("duel", 2, "p1"),
            HeartbeatPolicy::default(),
        );
        assert!(!session.request_end_session());
        assert!(!session.config().trying_to_end_session);

        session.mark_connected();
        session.handle(session_start());

        assert!(session.request_end_session());
        assert!(session.config().trying_to_end_session);
        assert_eq!(sent(&session.heartbeat()), vec![ClientAction::EndSession]);
        assert_eq!(session.status(), ConnectionStatus::Connected);
    }

    #[test]
    fn test_started_config_begins_in_progress() {
        let mut config = ConnectionConfig::join_random("duel", 2, "p1");
        config.member_id = Some("m-1".to_string());
        config.session_started = true;

        let session = Session::new(config, HeartbeatPolicy::default());
        assert_eq!(session.state().stage, Stage::SessionInProgress);
        assert!(!session.fails_fast());
    }

    #[test]
    fn test_status_transitions() {
        let mut session = Session::new(
            ConnectionConfig::join_random("duel", 2, "p1"),
            HeartbeatPolicy::default(),
        );
        assert!(session.fails_fast());

        session.mark_disconnected(DisconnectReason::InitialConnectionFailed);
        assert_eq!(session.state().stage, Stage::WaitingForMoreMembers);
        session.restart();
        assert_eq!(session.status(), ConnectionStatus::Connecting);
        assert!(session.state().disconnect_reason.is_none());

        session.mark_connected();
        session.handle(session_start());
        session.mark_reconnecting();
        assert!(!session.state().ready);
        assert!(!session.fails_fast());

        session.mark_disconnected(DisconnectReason::ConnectionDied);
        session.restart();
        assert_eq!(session.status(), ConnectionStatus::Reconnecting);

        session.mark_disconnected(DisconnectReason::SessionEnded);
        assert_eq!(session.state().stage, Stage::ConnectionClosed);
    }
}
