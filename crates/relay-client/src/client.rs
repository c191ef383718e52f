//! Public entry points: [`RelayHub`] creates relay instances and hands out
//! [`RelayClient`] handles to them.

use crate::driver::{Command, Driver, Services};
use crate::session::Session;
use crate::{
    ConfigStore, ConnectionConfig, ConnectivityProbe, HttpProbe, LiveIdRegistry, RelayConfig,
    RelayError, RelayMessage, RelayResult, RelayState, TungsteniteConnector, WsConnector,
};
use relay_storage::KeyValueStore;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info};

const EVENT_CAPACITY: usize = 256;

/// Events published by a relay instance, in the order they happened.
#[derive(Debug, Clone)]
pub enum RelayEvent {
    StateChanged(RelayState),
    MessageReceived(RelayMessage),
}

/// Handle to one running relay instance.
///
/// Dropping the handle destroys the instance.
pub struct RelayClient {
    local_id: String,
    commands: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<RelayState>,
    event_tx: broadcast::Sender<RelayEvent>,
}

impl RelayClient {
    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    /// Latest state snapshot.
    pub fn state(&self) -> RelayState {
        self.state_rx.borrow().clone()
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.event_tx.subscribe()
    }

    /// Receiver that always holds the latest state.
    pub fn watch_state(&self) -> watch::Receiver<RelayState> {
        self.state_rx.clone()
    }

    /// Wait until the state satisfies `predicate`.
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&RelayState) -> bool,
    ) -> RelayResult<RelayState> {
        let mut rx = self.state_rx.clone();
        let state = rx
            .wait_for(|state| predicate(state))
            .await
            .map_err(|_| RelayError::NotConnected)?;
        Ok(state.clone())
    }

    /// Send an application message. Dropped unless connected.
    pub fn send(&self, payload: impl Into<String>, pinned: bool) {
        self.command(Command::Send {
            payload: payload.into(),
            pinned,
        });
    }

    /// Restart the connection loop after a pause or a reconnectable
    /// disconnect.
    pub fn reconnect(&self) {
        self.command(Command::Reconnect);
    }

    /// Drop the socket and stop heartbeats until `reconnect()`.
    pub fn pause(&self) {
        self.command(Command::Pause);
    }

    /// Leave the session. With `end_session` and a session in progress the
    /// relay is asked to end it for every member first.
    pub fn disconnect(&self, end_session: bool) {
        self.command(Command::Disconnect { end_session });
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!(local_id = %self.local_id, "Relay instance already stopped");
        }
    }
}

impl std::fmt::Debug for RelayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayClient")
            .field("local_id", &self.local_id)
            .field("state", &*self.state_rx.borrow())
            .finish()
    }
}

/// Creates relay instances sharing one store, registry and transport.
#[derive(Clone)]
pub struct RelayHub {
    services: Arc<Services>,
}

impl RelayHub {
    /// Hub over HTTPS probing and `tokio-tungstenite`.
    pub fn new(settings: RelayConfig, store: Arc<dyn KeyValueStore>) -> RelayResult<Self> {
        let prober = Arc::new(HttpProbe::new(settings.probe_timeout())?);
        Self::with_transport(settings, store, prober, Arc::new(TungsteniteConnector))
    }

    pub fn with_transport(
        settings: RelayConfig,
        store: Arc<dyn KeyValueStore>,
        prober: Arc<dyn ConnectivityProbe>,
        connector: Arc<dyn WsConnector>,
    ) -> RelayResult<Self> {
        let ping_url = settings.ping_url()?;
        let wss_base = settings.wss_base()?;

        Ok(Self {
            services: Arc::new(Services {
                settings,
                ping_url,
                wss_base,
                prober,
                connector,
                configs: ConfigStore::new(store),
                registry: LiveIdRegistry::new(),
            }),
        })
    }

    pub fn registry(&self) -> &LiveIdRegistry {
        &self.services.registry
    }

    pub fn configs(&self) -> &ConfigStore {
        &self.services.configs
    }

    /// Join a public session matched by type and size.
    pub fn join_random(
        &self,
        session_type: &str,
        target_num_members: u32,
        local_id: &str,
    ) -> RelayResult<RelayClient> {
        self.spawn(ConnectionConfig::join_random(
            session_type,
            target_num_members,
            local_id,
        ))
    }

    /// Host a private session; its share code appears as `password`.
    pub fn host_private(
        &self,
        session_type: &str,
        target_num_members: u32,
        local_id: &str,
    ) -> RelayResult<RelayClient> {
        self.spawn(ConnectionConfig::host_private(
            session_type,
            target_num_members,
            local_id,
        ))
    }

    /// Join a private session by its share code.
    pub fn join_private(
        &self,
        session_type: &str,
        session_id: &str,
        local_id: &str,
    ) -> RelayResult<RelayClient> {
        self.spawn(ConnectionConfig::join_private(
            session_type,
            session_id,
            local_id,
        ))
    }

    /// Resume the session saved under `local_id`.
    pub fn rejoin(&self, local_id: &str) -> RelayResult<RelayClient> {
        if local_id.is_empty() {
            return Err(RelayError::InvalidLocalId(local_id.to_string()));
        }
        let config = self.services.configs.load(local_id)?;
        self.spawn(config)
    }

    /// Whether `rejoin(local_id)` has a saved record to work with.
    pub fn can_try_reconnecting(&self, local_id: &str) -> bool {
        self.services.configs.can_resume(local_id)
    }

    /// Must be called from within a Tokio runtime.
    fn spawn(&self, config: ConnectionConfig) -> RelayResult<RelayClient> {
        self.services.registry.claim(&config.local_id)?;

        let local_id = config.local_id.clone();
        let session = Session::new(config, self.services.settings.heartbeat_policy());

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(session.state().clone());
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);

        let driver = Driver::new(
            self.services.clone(),
            session,
            commands_rx,
            state_tx,
            event_tx.clone(),
        );
        tokio::spawn(driver.run());

        info!(local_id = %local_id, "Relay instance created");
        Ok(RelayClient {
            local_id,
            commands,
            state_rx,
            event_tx,
        })
    }
}
