//! Test harness for relay client integration tests.
//!
//! Provides:
//! - MockProbe: scripted connectivity probe
//! - MockConnector: in-memory WebSocket connector, handing each accepted
//!   connection to the test as a MockServerConn
//! - TestHarness: a RelayHub wired to both, over a MemoryStore

use crate::{
    ConnectivityProbe, FrameSink, FrameSource, RelayClient, RelayConfig, RelayError, RelayEvent,
    RelayHub, RelayResult, RelayState, SocketHalves, WsConnector,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use relay_storage::{KeyValueStore, MemoryStore, StorageKeys};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::time::timeout;
use url::Url;

/// Generous bound on any single wait; time is paused so it costs nothing.
pub const WAIT: Duration = Duration::from_secs(300);

/// Connectivity probe answering from a script, then from a default.
pub struct MockProbe {
    script: Mutex<VecDeque<bool>>,
    reachable: AtomicBool,
    calls: AtomicUsize,
}

impl MockProbe {
    pub fn new(reachable: bool) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            reachable: AtomicBool::new(reachable),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Answers for the next probes, before falling back to the default.
    #[allow(dead_code)]
    pub fn script(&self, results: &[bool]) {
        self.script.lock().extend(results.iter().copied());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectivityProbe for MockProbe {
    async fn probe(&self, _url: &Url) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().pop_front() {
            Some(result) => result,
            None => self.reachable.load(Ordering::SeqCst),
        }
    }
}

/// Server side of one accepted mock connection.
pub struct MockServerConn {
    pub url: Url,
    inbound: mpsc::UnboundedSender<String>,
    outbound: mpsc::UnboundedReceiver<String>,
    closed: Arc<AtomicBool>,
}

impl MockServerConn {
    /// Deliver a frame to the client.
    pub fn push(&self, frame: &str) {
        let _ = self.inbound.send(frame.to_string());
    }

    /// Next frame sent by the client, parsed.
    pub async fn next_frame(&mut self) -> Value {
        let text = timeout(WAIT, self.outbound.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client sink dropped");
        serde_json::from_str(&text).expect("client sent invalid JSON")
    }

    /// Next frame whose `action` is `action`, skipping others.
    pub async fn next_action(&mut self, action: &str) -> Value {
        loop {
            let frame = self.next_frame().await;
            if frame["action"] == action {
                return frame;
            }
        }
    }

    /// Frames sent so far and not yet read.
    pub fn drain(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(text) = self.outbound.try_recv() {
            frames.push(serde_json::from_str(&text).expect("client sent invalid JSON"));
        }
        frames
    }

    /// Whether the client sent a close frame.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Drop the socket from the server side.
    pub fn drop_connection(self) {}
}

struct MockSink {
    outbound: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl FrameSink for MockSink {
    async fn send_text(&mut self, text: String) -> RelayResult<()> {
        self.outbound
            .send(text)
            .map_err(|e| RelayError::Send(e.to_string()))
    }

    async fn close(&mut self) -> RelayResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct MockSource(mpsc::UnboundedReceiver<String>);

#[async_trait]
impl FrameSource for MockSource {
    async fn next_text(&mut self) -> Option<RelayResult<String>> {
        self.0.recv().await.map(Ok)
    }
}

/// In-memory connector.
pub struct MockConnector {
    urls: Mutex<Vec<Url>>,
    refusals: AtomicUsize,
    gate: Mutex<Option<Arc<Semaphore>>>,
    accepted: mpsc::UnboundedSender<MockServerConn>,
}

impl MockConnector {
    fn new(accepted: mpsc::UnboundedSender<MockServerConn>) -> Self {
        Self {
            urls: Mutex::new(Vec::new()),
            refusals: AtomicUsize::new(0),
            gate: Mutex::new(None),
            accepted,
        }
    }

    /// Fail the next `count` handshakes.
    pub fn refuse(&self, count: usize) {
        self.refusals.store(count, Ordering::SeqCst);
    }

    /// Hold every handshake until [`MockConnector::release`].
    pub fn hold(&self) {
        *self.gate.lock() = Some(Arc::new(Semaphore::new(0)));
    }

    /// Let new handshakes through while those already held stay held.
    pub fn stop_holding(&self) {
        self.gate.lock().take();
    }

    pub fn release(&self) {
        if let Some(gate) = self.gate.lock().take() {
            gate.add_permits(1024);
        }
    }

    /// URLs of every handshake attempt, in order.
    pub fn urls(&self) -> Vec<Url> {
        self.urls.lock().clone()
    }

    pub fn attempts(&self) -> usize {
        self.urls.lock().len()
    }
}

#[async_trait]
impl WsConnector for MockConnector {
    async fn connect(&self, url: &Url) -> RelayResult<SocketHalves> {
        self.urls.lock().push(url.clone());

        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            let _ = gate.acquire().await;
        }

        let refused = self
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(RelayError::Send("handshake refused".to_string()));
        }

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        let _ = self.accepted.send(MockServerConn {
            url: url.clone(),
            inbound: inbound_tx,
            outbound: outbound_rx,
            closed: closed.clone(),
        });

        Ok((
            Box::new(MockSink {
                outbound: outbound_tx,
                closed,
            }),
            Box::new(MockSource(inbound_rx)),
        ))
    }
}

/// A hub over the mocks.
pub struct TestHarness {
    pub hub: RelayHub,
    pub store: Arc<MemoryStore>,
    pub probe: Arc<MockProbe>,
    pub connector: Arc<MockConnector>,
    accepted: mpsc::UnboundedReceiver<MockServerConn>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_settings(test_settings())
    }

    pub fn with_settings(settings: RelayConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let probe = Arc::new(MockProbe::new(true));
        let (accepted_tx, accepted) = mpsc::unbounded_channel();
        let connector = Arc::new(MockConnector::new(accepted_tx));

        let hub = RelayHub::with_transport(settings, store.clone(), probe.clone(), connector.clone())
            .expect("valid test settings");

        Self {
            hub,
            store,
            probe,
            connector,
            accepted,
        }
    }

    /// Next connection the client opened.
    pub async fn next_conn(&mut self) -> MockServerConn {
        timeout(WAIT, self.accepted.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("connector dropped")
    }

    /// Raw saved record of `local_id`.
    pub fn saved(&self, local_id: &str) -> Option<Value> {
        self.store
            .get(&StorageKeys::saved_config(local_id))
            .unwrap()
            .map(|json| serde_json::from_str(&json).unwrap())
    }

    /// Join a public session and complete its start.
    pub async fn started_session(&mut self, local_id: &str) -> (RelayClient, MockServerConn) {
        let client = self.hub.join_random("duel", 2, local_id).unwrap();
        let conn = self.next_conn().await;
        wait_state(&client, RelayState::is_connected).await;

        conn.push(SESSION_START);
        wait_state(&client, |s| s.ready).await;
        (client, conn)
    }
}

pub fn test_settings() -> RelayConfig {
    RelayConfig {
        https_url: "https://relay.test".to_string(),
        wss_url: "wss://relay.test/ws".to_string(),
        ..Default::default()
    }
}

pub const SESSION_START: &str = r#"[{"type":"SESSION_START","sessionType":"duel","sessionId":"s1","numMembers":2,"memberNum":0}]"#;

pub async fn wait_state(
    client: &RelayClient,
    predicate: impl FnMut(&RelayState) -> bool,
) -> RelayState {
    timeout(WAIT, client.wait_for(predicate))
        .await
        .expect("timed out waiting for state")
        .expect("relay instance stopped")
}

/// Next event matching `predicate`.
pub async fn wait_event(
    events: &mut broadcast::Receiver<RelayEvent>,
    mut predicate: impl FnMut(&RelayEvent) -> bool,
) -> RelayEvent {
    timeout(WAIT, async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Poll `condition` until it holds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never held")
}
