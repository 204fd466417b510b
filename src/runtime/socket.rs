use std::future::Future;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{BackoffConfig, RuntimeConfig};
use crate::errors::{KilnError, Result};
use crate::runtime::dom::NodePatch;
use crate::runtime::{ClientRuntime, PatchSummary};

/// Messages pushed by the rendering server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ServerMessage {
    Patch { nodes: Vec<NodePatch> },
    Error { message: String },
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// A persistent message connection. `recv` yields `None` once the server
/// closes the connection.
pub trait Transport: Send {
    fn connect(&mut self, url: &Url) -> impl Future<Output = Result<()>> + Send;

    fn recv(&mut self) -> impl Future<Output = Option<Result<String>>> + Send;
}

/// Exponential retry delays, capped, optionally bounded in attempts
#[derive(Debug, Clone)]
pub struct Backoff {
    initial_ms: u64,
    max_ms: u64,
    multiplier: f64,
    max_attempts: Option<u32>,
    failures: u32,
}

impl Backoff {
    pub fn from_config(config: &BackoffConfig) -> Self {
        Self {
            initial_ms: config.initial_ms,
            max_ms: config.max_ms,
            multiplier: config.multiplier,
            max_attempts: config.max_attempts,
            failures: 0,
        }
    }

    /// Record a failure and return the delay before the next attempt, or
    /// `None` once the attempt budget is spent
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.failures = self.failures.saturating_add(1);
        if self.max_attempts.is_some_and(|max| self.failures >= max) {
            return None;
        }

        let exponent = i32::try_from(self.failures - 1).unwrap_or(i32::MAX);
        let delay = (self.initial_ms as f64 * self.multiplier.powi(exponent)).min(self.max_ms as f64);
        Some(Duration::from_millis(delay as u64))
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.failures
    }
}

/// Connection driver feeding server messages into a [`ClientRuntime`].
///
/// Holds at most one connection. Reconnects reuse the token given to
/// [`LiveSocket::connect`].
pub struct LiveSocket<T: Transport> {
    transport: T,
    runtime: ClientRuntime,
    base_url: String,
    endpoint: String,
    token_param: String,
    protocol_version: String,
    backoff: Backoff,
    token: Option<String>,
    state: watch::Sender<ConnectionState>,
}

impl<T: Transport> LiveSocket<T> {
    pub fn new(transport: T, config: &RuntimeConfig, runtime: ClientRuntime) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            transport,
            runtime,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            endpoint: config.endpoint.clone(),
            token_param: config.token_param.clone(),
            protocol_version: config.protocol_version.clone(),
            backoff: Backoff::from_config(&config.backoff),
            token: None,
            state,
        }
    }

    /// Socket address without credentials, used in logs and errors
    pub fn socket_address(&self) -> String {
        format!("{}{}/websocket", self.base_url, self.endpoint)
    }

    /// Full handshake URL carrying the token and protocol version
    pub fn endpoint_url(&self, token: &str) -> Result<Url> {
        let address = self.socket_address();
        let mut url = Url::parse(&address)
            .map_err(|e| KilnError::connection(&address, format!("invalid endpoint: {}", e)))?;
        url.query_pairs_mut()
            .append_pair(&self.token_param, token)
            .append_pair("vsn", &self.protocol_version);
        Ok(url)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch connection state changes
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn runtime(&self) -> &ClientRuntime {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut ClientRuntime {
        &mut self.runtime
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Connect with `token`, retrying with backoff until the attempt budget
    /// is spent
    pub async fn connect(&mut self, token: &str) -> Result<()> {
        self.token = Some(token.to_string());
        self.establish().await
    }

    /// Receive and apply messages until the connection can no longer be
    /// re-established. Dropped connections are retried with the stored token.
    pub async fn run(&mut self) -> Result<()> {
        if self.state() != ConnectionState::Connected {
            self.establish().await?;
        }

        loop {
            match self.transport.recv().await {
                Some(Ok(text)) => {
                    self.dispatch(&text);
                }
                Some(Err(e)) => {
                    warn!("Connection dropped: {}", e);
                    self.set_state(ConnectionState::Disconnected);
                    self.establish().await?;
                }
                None => {
                    info!("Server closed the connection");
                    self.set_state(ConnectionState::Disconnected);
                    self.establish().await?;
                }
            }
        }
    }

    /// Decode one frame and hand it to the runtime. Malformed frames are
    /// reported and skipped.
    pub fn dispatch(&mut self, text: &str) -> Option<PatchSummary> {
        match ServerMessage::parse(text) {
            Ok(message) => Some(self.runtime.handle(message)),
            Err(e) => {
                self.runtime.report(e);
                None
            }
        }
    }

    async fn establish(&mut self) -> Result<()> {
        let address = self.socket_address();
        let Some(token) = self.token.clone() else {
            return Err(KilnError::connection(address, "no authentication token supplied"));
        };
        let url = self.endpoint_url(&token)?;

        loop {
            self.set_state(ConnectionState::Connecting);
            debug!("Connecting to {} (attempt {})", address, self.backoff.attempts() + 1);

            match self.transport.connect(&url).await {
                Ok(()) => {
                    self.backoff.reset();
                    self.set_state(ConnectionState::Connected);
                    info!("Connected to {}", address);
                    return Ok(());
                }
                Err(e) => {
                    self.set_state(ConnectionState::Disconnected);
                    match self.backoff.next_delay() {
                        Some(delay) => {
                            warn!("Connection to {} failed: {}; retrying in {:?}", address, e, delay);
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            let attempts = self.backoff.attempts();
                            self.backoff.reset();
                            return Err(KilnError::connection(
                                address,
                                format!("gave up after {} attempts: {}", attempts, e),
                            ));
                        }
                    }
                }
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }
}

impl<T: Transport + std::fmt::Debug> std::fmt::Debug for LiveSocket<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveSocket")
            .field("transport", &self.transport)
            .field("address", &self.socket_address())
            .field("state", &self.state())
            .finish()
    }
}
