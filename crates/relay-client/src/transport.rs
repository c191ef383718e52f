//! WebSocket transport.
//!
//! [`WsConnector`] opens a socket and splits it into a [`FrameSink`] and a
//! [`FrameSource`]. A [`Transport`] owns one open socket: outbound frames go
//! through a queue drained serially by a background sender, and inbound text
//! frames are read in order by the caller.

use crate::{RelayError, RelayResult};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

/// Both halves of an open socket.
pub type SocketHalves = (Box<dyn FrameSink>, Box<dyn FrameSource>);

/// Opens WebSocket connections.
#[async_trait]
pub trait WsConnector: Send + Sync {
    /// Perform the handshake. Callers bound this with their own timeout.
    async fn connect(&self, url: &Url) -> RelayResult<SocketHalves>;
}

/// Write half of a socket.
#[async_trait]
pub trait FrameSink: Send {
    async fn send_text(&mut self, text: String) -> RelayResult<()>;

    /// Send a close frame.
    async fn close(&mut self) -> RelayResult<()>;
}

/// Read half of a socket.
#[async_trait]
pub trait FrameSource: Send {
    /// Next complete text frame, or `None` once the socket is closed.
    async fn next_text(&mut self) -> Option<RelayResult<String>>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Production connector over `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl WsConnector for TungsteniteConnector {
    async fn connect(&self, url: &Url) -> RelayResult<SocketHalves> {
        let (ws_stream, _) = connect_async(url.as_str()).await?;
        let (write, read) = ws_stream.split();
        Ok((
            Box::new(TungsteniteSink(write)),
            Box::new(TungsteniteSource(read)),
        ))
    }
}

struct TungsteniteSink(SplitSink<WsStream, Message>);

#[async_trait]
impl FrameSink for TungsteniteSink {
    async fn send_text(&mut self, text: String) -> RelayResult<()> {
        self.0.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn close(&mut self) -> RelayResult<()> {
        self.0.close().await?;
        Ok(())
    }
}

struct TungsteniteSource(SplitStream<WsStream>);

#[async_trait]
impl FrameSource for TungsteniteSource {
    async fn next_text(&mut self) -> Option<RelayResult<String>> {
        while let Some(msg) = self.0.next().await {
            match msg {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Close(frame)) => {
                    debug!(frame = ?frame, "Relay connection closed");
                    return None;
                }
                // Pings are answered by tungstenite itself.
                Ok(_) => {}
                Err(e) => return Some(Err(e.into())),
            }
        }
        None
    }
}

/// One open socket with its send queue.
pub struct Transport {
    queue: mpsc::UnboundedSender<String>,
    source: Box<dyn FrameSource>,
    dead: CancellationToken,
}

impl Transport {
    /// Take ownership of an open socket and start its sender.
    ///
    /// The sender stops when `epoch` is cancelled or the transport is
    /// dropped, then sends a best-effort close frame unless `lifetime` is
    /// cancelled first. A send that fails or exceeds `send_timeout` cancels
    /// [`Transport::dead`].
    pub fn start(
        (sink, source): SocketHalves,
        send_timeout: Duration,
        epoch: CancellationToken,
        lifetime: CancellationToken,
    ) -> Self {
        let (queue, rx) = mpsc::unbounded_channel();
        let dead = CancellationToken::new();

        tokio::spawn(run_sender(
            sink,
            rx,
            send_timeout,
            epoch,
            lifetime,
            dead.clone(),
        ));

        Self {
            queue,
            source,
            dead,
        }
    }

    /// Queue a text frame.
    pub fn enqueue(&self, text: String) -> RelayResult<()> {
        if self.dead.is_cancelled() {
            return Err(RelayError::NotConnected);
        }
        self.queue
            .send(text)
            .map_err(|e| RelayError::Send(e.to_string()))
    }

    /// Next inbound text frame; `None` or an error ends the receive loop.
    pub async fn recv(&mut self) -> Option<RelayResult<String>> {
        self.source.next_text().await
    }

    /// Cancelled once a send has stalled or failed.
    pub fn dead(&self) -> &CancellationToken {
        &self.dead
    }
}

async fn run_sender(
    mut sink: Box<dyn FrameSink>,
    mut rx: mpsc::UnboundedReceiver<String>,
    send_timeout: Duration,
    epoch: CancellationToken,
    lifetime: CancellationToken,
    dead: CancellationToken,
) {
    loop {
        let text = tokio::select! {
            biased;
            _ = epoch.cancelled() => break,
            text = rx.recv() => match text {
                Some(text) => text,
                None => break,
            },
        };

        let result = tokio::select! {
            biased;
            _ = epoch.cancelled() => break,
            res = tokio::time::timeout(send_timeout, sink.send_text(text)) => {
                res.unwrap_or(Err(RelayError::Timeout))
            }
        };

        if let Err(e) = result {
            warn!(error = %e, "Send failed, abandoning connection");
            dead.cancel();
            return;
        }
    }

    // Anything still queued belongs to a torn-down epoch.
    rx.close();

    tokio::select! {
        _ = lifetime.cancelled() => {}
        res = tokio::time::timeout(send_timeout, sink.close()) => {
            if let Ok(Err(e)) = res {
                debug!(error = %e, "Close frame not delivered");
            }
        }
    }
}
