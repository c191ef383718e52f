//! Per-instance connection driver.
//!
//! One task per relay instance owns the [`Session`] and the socket. It
//! multiplexes caller commands, the connection attempt in flight, inbound
//! frames, the heartbeat timer and send failures in a single loop, so every
//! state mutation happens on this task.
//!
//! Each connection cycle runs under its own epoch token, a child of the
//! instance lifetime token. Killing the link cancels the epoch, which stops
//! probing, handshakes and the sender; only the best-effort close frame
//! outlives it.

use crate::messages::{parse_frame, ClientAction};
use crate::prober::{ProbeLoop, ProbeOutcome};
use crate::session::{Effect, Session};
use crate::transport::{SocketHalves, Transport};
use crate::{
    ConfigStore, ConnectionStatus, ConnectivityProbe, DisconnectReason, LiveIdRegistry,
    RelayConfig, RelayError, RelayEvent, RelayResult, RelayState, Stage, WsConnector,
};
use futures_util::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// Requests from a [`crate::RelayClient`] handle.
#[derive(Debug)]
pub(crate) enum Command {
    Send { payload: String, pinned: bool },
    Reconnect,
    Pause,
    Disconnect { end_session: bool },
}

/// Collaborators shared by every instance of one hub.
pub(crate) struct Services {
    pub settings: RelayConfig,
    pub ping_url: Url,
    pub wss_base: Url,
    pub prober: Arc<dyn ConnectivityProbe>,
    pub connector: Arc<dyn WsConnector>,
    pub configs: ConfigStore,
    pub registry: LiveIdRegistry,
}

/// How a connection attempt ended.
enum Established {
    Open(SocketHalves),
    /// Probing gave up.
    Unreachable,
    /// Every handshake attempt failed.
    Exhausted,
    Cancelled,
}

/// Probe, then handshake, re-probing before each retry.
struct ConnectAttempt {
    probe: ProbeLoop,
    connector: Arc<dyn WsConnector>,
    url: Url,
    timeout: Duration,
    retries: u32,
    cancel: CancellationToken,
}

impl ConnectAttempt {
    async fn run(self) -> Established {
        let mut retries_left = self.retries;
        loop {
            match self.probe.run().await {
                ProbeOutcome::Reachable => {}
                ProbeOutcome::Unreachable => return Established::Unreachable,
                ProbeOutcome::Cancelled => return Established::Cancelled,
            }

            debug!(url = %self.url, "WS attempting connection");
            let result = tokio::select! {
                _ = self.cancel.cancelled() => return Established::Cancelled,
                res = tokio::time::timeout(self.timeout, self.connector.connect(&self.url)) => {
                    res.unwrap_or(Err(RelayError::Timeout))
                }
            };

            match result {
                Ok(halves) => return Established::Open(halves),
                Err(e) if retries_left > 0 => {
                    retries_left -= 1;
                    info!(url = %self.url, error = %e, retries_left, "WS failed to connect, retrying");
                }
                Err(e) => {
                    warn!(url = %self.url, error = %e, "WS failed to connect");
                    return Established::Exhausted;
                }
            }
        }
    }
}

struct Connection {
    transport: Transport,
    last_heartbeat: Instant,
}

enum Link {
    Idle,
    Establishing(BoxFuture<'static, Established>),
    Connected(Connection),
}

enum Wake {
    Command(Option<Command>),
    Established(Established),
    Frame(Option<RelayResult<String>>),
    LinkDead,
    HeartbeatDue,
}

pub(crate) struct Driver {
    services: Arc<Services>,
    session: Session,
    commands: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<RelayState>,
    event_tx: broadcast::Sender<RelayEvent>,
    lifetime: CancellationToken,
    epoch: CancellationToken,
    /// Cancelled once a disconnect is pending, so probing stops retrying.
    stop_probing: CancellationToken,
    link: Link,
    holds_live_id: bool,
    waiting_to_disconnect: bool,
}

impl Driver {
    /// The caller must already hold the session's live id.
    pub(crate) fn new(
        services: Arc<Services>,
        session: Session,
        commands: mpsc::UnboundedReceiver<Command>,
        state_tx: watch::Sender<RelayState>,
        event_tx: broadcast::Sender<RelayEvent>,
    ) -> Self {
        let lifetime = CancellationToken::new();
        let epoch = lifetime.child_token();
        Self {
            services,
            session,
            commands,
            state_tx,
            event_tx,
            lifetime,
            epoch,
            stop_probing: CancellationToken::new(),
            link: Link::Idle,
            holds_live_id: true,
            waiting_to_disconnect: false,
        }
    }

    fn local_id(&self) -> &str {
        &self.session.config().local_id
    }

    /// Run until every handle is dropped.
    pub(crate) async fn run(mut self) {
        info!(local_id = %self.local_id(), "Relay instance started");
        self.start_connecting();

        loop {
            match self.next_wake().await {
                Wake::Command(Some(command)) => self.on_command(command),
                Wake::Command(None) => {
                    self.destroy();
                    return;
                }
                Wake::Established(outcome) => self.on_established(outcome),
                Wake::Frame(Some(Ok(text))) => self.on_frame(&text),
                Wake::Frame(Some(Err(e))) => {
                    info!(local_id = %self.local_id(), error = %e, "WS receive loop died, will retry");
                    self.reconnect_now();
                }
                Wake::Frame(None) => {
                    info!(local_id = %self.local_id(), "WS closed, will retry");
                    self.reconnect_now();
                }
                Wake::LinkDead => {
                    info!(local_id = %self.local_id(), "WS send stalled, will retry");
                    self.reconnect_now();
                }
                Wake::HeartbeatDue => self.send_heartbeat(),
            }
        }
    }

    async fn next_wake(&mut self) -> Wake {
        let heartbeat_delay = self.session.heartbeat_delay();
        let commands = &mut self.commands;
        let link = &mut self.link;

        tokio::select! {
            command = commands.recv() => Wake::Command(command),
            wake = link_wake(link, heartbeat_delay) => wake,
        }
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Send { payload, pinned } => {
                if self.session.status() != ConnectionStatus::Connected {
                    debug!(local_id = %self.local_id(), "Not connected, dropping outbound message");
                    return;
                }
                self.send_action(ClientAction::send_message(payload, pinned));
            }
            Command::Reconnect => self.reconnect(),
            Command::Pause => self.pause(),
            Command::Disconnect { end_session } => self.disconnect(end_session),
        }
    }

    fn on_established(&mut self, outcome: Established) {
        self.link = Link::Idle;

        match outcome {
            Established::Open(halves) => {
                let transport = Transport::start(
                    halves,
                    self.services.settings.ws_timeout(),
                    self.epoch.clone(),
                    self.lifetime.clone(),
                );

                if self.waiting_to_disconnect {
                    info!(local_id = %self.local_id(), "Disconnecting now that WS is properly connected");
                    drop(transport);
                    self.teardown(DisconnectReason::DisconnectRequested, false);
                    return;
                }

                info!(local_id = %self.local_id(), "WS connected, waiting for intro message");
                self.session.mark_connected();
                self.link = Link::Connected(Connection {
                    transport,
                    last_heartbeat: Instant::now(),
                });
                self.publish_state();
            }
            Established::Unreachable if self.waiting_to_disconnect => {
                self.teardown(DisconnectReason::DisconnectRequested, false);
            }
            Established::Unreachable => {
                info!(
                    local_id = %self.local_id(),
                    ping_url = %self.services.ping_url,
                    "Failed to ping, aborting initial connection"
                );
                self.teardown(DisconnectReason::InitialConnectionFailed, true);
            }
            Established::Exhausted if self.waiting_to_disconnect => {
                self.teardown(DisconnectReason::DisconnectRequested, false);
            }
            Established::Exhausted => {
                let reason = if self.session.status() == ConnectionStatus::Reconnecting {
                    DisconnectReason::ConnectionDied
                } else {
                    DisconnectReason::InitialConnectionFailed
                };
                // A started session stays rejoinable.
                let clear_config = reason == DisconnectReason::InitialConnectionFailed
                    && self.session.state().stage == Stage::WaitingForMoreMembers;
                self.teardown(reason, clear_config);
            }
            Established::Cancelled => {}
        }
    }

    fn on_frame(&mut self, text: &str) {
        if text != r#"[{"type":"HEARTBEAT"}]"# {
            debug!(local_id = %self.local_id(), frame = %text, "Received frame");
        }

        let messages = match parse_frame(text) {
            Ok(messages) => messages,
            Err(e) => {
                warn!(local_id = %self.local_id(), error = %e, "Failed to parse frame, dropping it");
                return;
            }
        };

        for message in messages {
            let effects = self.session.handle(message);
            if self.apply(effects) {
                break;
            }
        }
    }

    /// Apply effects in order. Returns true if the link was torn down or
    /// restarted, after which nothing else from the same frame applies.
    fn apply(&mut self, effects: Vec<Effect>) -> bool {
        for effect in effects {
            let interrupts = effect.interrupts();
            match effect {
                Effect::Send(action) => self.send_action(action),
                Effect::SaveConfig => self.save_config(),
                Effect::StateChanged => self.publish_state(),
                Effect::Message(message) => {
                    let _ = self.event_tx.send(RelayEvent::MessageReceived(message));
                }
                Effect::Reconnect => self.reconnect_now(),
                Effect::Teardown {
                    reason,
                    clear_config,
                } => self.teardown(reason, clear_config),
            }
            if interrupts {
                return true;
            }
        }
        false
    }

    fn send_action(&self, action: ClientAction) {
        let Link::Connected(conn) = &self.link else {
            return;
        };

        match action.to_json() {
            Ok(json) => {
                if let Err(e) = conn.transport.enqueue(json) {
                    debug!(local_id = %self.local_id(), error = %e, "Frame not queued");
                }
            }
            Err(e) => warn!(local_id = %self.local_id(), error = %e, "Failed to encode frame"),
        }
    }

    fn send_heartbeat(&mut self) {
        if let Link::Connected(conn) = &mut self.link {
            conn.last_heartbeat = Instant::now();
        }
        let effects = self.session.heartbeat();
        self.apply(effects);
    }

    /// Start a new connection cycle.
    fn start_connecting(&mut self) {
        self.kill_link();

        self.epoch = self.lifetime.child_token();
        self.stop_probing = CancellationToken::new();
        if self.waiting_to_disconnect {
            self.stop_probing.cancel();
        }

        let settings = &self.services.settings;
        let attempt = ConnectAttempt {
            probe: ProbeLoop {
                probe: self.services.prober.clone(),
                url: self.services.ping_url.clone(),
                timeout: settings.probe_timeout(),
                retry_delay: settings.probe_retry_delay(),
                fail_fast: self.session.fails_fast(),
                give_up: self.stop_probing.clone(),
                cancel: self.epoch.clone(),
            },
            connector: self.services.connector.clone(),
            url: self
                .session
                .config()
                .connection_url(&self.services.wss_base),
            timeout: settings.ws_timeout(),
            retries: settings.ws_connect_retries,
            cancel: self.epoch.clone(),
        };

        self.link = Link::Establishing(attempt.run().boxed());
    }

    fn kill_link(&mut self) {
        self.epoch.cancel();
        self.link = Link::Idle;
    }

    /// Drop the current link and start over, keeping the instance alive.
    fn reconnect_now(&mut self) {
        if matches!(
            self.session.status(),
            ConnectionStatus::Connecting | ConnectionStatus::Disconnected
        ) {
            return;
        }

        self.kill_link();
        self.session.mark_reconnecting();
        self.publish_state();
        self.start_connecting();
    }

    fn reconnect(&mut self) {
        if !self.session.state().can_reconnect() {
            debug!(
                local_id = %self.local_id(),
                status = ?self.session.status(),
                "Reconnect ignored"
            );
            return;
        }

        if !self.holds_live_id {
            if let Err(e) = self.services.registry.claim(self.local_id()) {
                warn!(local_id = %self.local_id(), error = %e, "Cannot reconnect");
                return;
            }
            self.holds_live_id = true;
        }

        info!(local_id = %self.local_id(), "Reconnecting");
        self.session.restart();
        self.publish_state();
        self.start_connecting();
    }

    fn pause(&mut self) {
        if matches!(
            self.session.status(),
            ConnectionStatus::Paused | ConnectionStatus::Disconnected
        ) {
            return;
        }

        info!(local_id = %self.local_id(), "Pausing");
        self.kill_link();
        self.session.mark_paused();
        self.publish_state();
    }

    fn disconnect(&mut self, end_session: bool) {
        if self.session.state().is_closed() {
            return;
        }

        if end_session && self.session.request_end_session() {
            self.save_config();
            self.send_heartbeat();
            return;
        }

        match self.session.status() {
            ConnectionStatus::Connecting | ConnectionStatus::Reconnecting => {
                info!(
                    local_id = %self.local_id(),
                    "Disconnection requested, waiting until connected for clean disconnection"
                );
                self.waiting_to_disconnect = true;
                self.stop_probing.cancel();
                self.clear_config();
                self.release_live_id();
            }
            _ => {
                info!(local_id = %self.local_id(), "Disconnection requested, tearing down and clearing config");
                self.teardown(DisconnectReason::DisconnectRequested, true);
            }
        }
    }

    fn teardown(&mut self, reason: DisconnectReason, clear_config: bool) {
        self.kill_link();
        if clear_config {
            self.clear_config();
        }
        self.release_live_id();

        self.session.mark_disconnected(reason);
        info!(local_id = %self.local_id(), reason = ?reason, clear_config, "Relay disconnected");
        self.publish_state();
    }

    /// Every handle is gone.
    fn destroy(&mut self) {
        if self.session.status() != ConnectionStatus::Disconnected {
            let reason = if self.waiting_to_disconnect {
                DisconnectReason::DisconnectRequested
            } else {
                DisconnectReason::ConnectionDied
            };
            // A pending disconnect already cleared the record and gave up the id.
            let clear_config = !self.waiting_to_disconnect
                && !self.session.config().is_private
                && self.session.state().stage == Stage::WaitingForMoreMembers;
            info!(local_id = %self.local_id(), clear_config, "Relay dropped, tearing down");
            self.teardown(reason, clear_config);
        }
        self.release_live_id();
        self.lifetime.cancel();
    }

    fn release_live_id(&mut self) {
        if self.holds_live_id {
            self.services.registry.release(self.local_id());
            self.holds_live_id = false;
        }
    }

    fn save_config(&self) {
        if self.waiting_to_disconnect {
            debug!(local_id = %self.local_id(), "Waiting to disconnect, not saving config");
            return;
        }
        if let Err(e) = self.services.configs.save(self.session.config()) {
            warn!(local_id = %self.local_id(), error = %e, "Failed to save config");
        }
    }

    /// The record is keyed by local id, so once the id is released it may
    /// belong to another live instance.
    fn clear_config(&self) {
        if !self.holds_live_id {
            debug!(local_id = %self.local_id(), "Local id released, not clearing config");
            return;
        }
        if let Err(e) = self.services.configs.clear(self.local_id()) {
            warn!(local_id = %self.local_id(), error = %e, "Failed to clear config");
        }
    }

    fn publish_state(&self) {
        let state = self.session.state().clone();
        self.state_tx.send_replace(state.clone());
        let _ = self.event_tx.send(RelayEvent::StateChanged(state));
    }
}

async fn link_wake(link: &mut Link, heartbeat_delay: Duration) -> Wake {
    match link {
        Link::Idle => std::future::pending().await,
        Link::Establishing(attempt) => Wake::Established(attempt.await),
        Link::Connected(conn) => {
            let due = conn.last_heartbeat + heartbeat_delay;
            let dead = conn.transport.dead().clone();
            tokio::select! {
                frame = conn.transport.recv() => Wake::Frame(frame),
                _ = dead.cancelled() => Wake::LinkDead,
                _ = tokio::time::sleep_until(due) => Wake::HeartbeatDue,
            }
        }
    }
}
