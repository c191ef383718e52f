//! Connectivity probing.
//!
//! Every connection attempt is gated by an HTTPS reachability check so a
//! client with no network path fails fast instead of waiting out WebSocket
//! handshake timeouts.

use crate::RelayResult;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

/// A single reachability check.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// Returns true iff the relay answered `200 OK`.
    async fn probe(&self, url: &Url) -> bool;
}

/// Probe over `reqwest`.
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> RelayResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn probe(&self, url: &Url) -> bool {
        match self.client.get(url.clone()).send().await {
            Ok(res) if res.status() == reqwest::StatusCode::OK => true,
            Ok(res) => {
                debug!(url = %url, status = %res.status(), "Ping returned non-OK status");
                false
            }
            Err(e) => {
                debug!(url = %url, error = %e, "Ping failed");
                false
            }
        }
    }
}

/// How probing ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProbeOutcome {
    Reachable,
    /// Gave up after a failure.
    Unreachable,
    Cancelled,
}

/// Probe repeatedly until the relay is reachable.
///
/// Gives up after the first failure when `give_up` is already cancelled or
/// `fail_fast` is set; otherwise waits `retry_delay` between attempts, giving
/// up if `give_up` fires during the wait.
pub(crate) struct ProbeLoop {
    pub probe: Arc<dyn ConnectivityProbe>,
    pub url: Url,
    pub timeout: Duration,
    pub retry_delay: Duration,
    pub fail_fast: bool,
    pub give_up: CancellationToken,
    pub cancel: CancellationToken,
}

impl ProbeLoop {
    pub(crate) async fn run(&self) -> ProbeOutcome {
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            debug!(url = %self.url, attempt, "Testing web connectivity via HTTPS ping");

            let reachable = tokio::select! {
                _ = self.cancel.cancelled() => return ProbeOutcome::Cancelled,
                res = tokio::time::timeout(self.timeout, self.probe.probe(&self.url)) => {
                    res.unwrap_or(false)
                }
            };

            if reachable {
                debug!(attempt, "Ping successful");
                return ProbeOutcome::Reachable;
            }

            if self.fail_fast || self.give_up.is_cancelled() {
                return ProbeOutcome::Unreachable;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return ProbeOutcome::Cancelled,
                _ = self.give_up.cancelled() => return ProbeOutcome::Unreachable,
                _ = tokio::time::sleep(self.retry_delay) => {}
            }
        }
    }
}
