//! Outbound connection lifecycle: connect with retry, message pump, close

use crate::config::{AgentSettings, ConfigCell};
use crate::error::{AgentError, Result, TransportError};
use crate::executor::CommandExecutor;
use crate::heartbeat::HeartbeatScheduler;
use crate::transport::{Dialer, Link};
use async_trait::async_trait;
use fleetlink_proto::{Envelope, EnvelopeCodec, Message, Outgoing};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Connection state of the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session and no attempt in flight
    Disconnected,
    /// Handshake or acknowledgment in progress
    Connecting,
    /// Session acknowledged by the relay
    Connected,
}

/// Progress through one connection attempt sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    /// Attempts started so far
    pub attempt: u32,
    /// Attempts allowed
    pub max_retries: u32,
    /// Wait between failed attempts
    pub delay: Duration,
}

impl RetryState {
    /// Fresh sequence allowing at least one attempt
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self {
            attempt: 0,
            max_retries: max_retries.max(1),
            delay,
        }
    }

    /// Start the next attempt, or `None` once exhausted
    pub fn next_attempt(&mut self) -> Option<u32> {
        if self.attempt >= self.max_retries {
            return None;
        }
        self.attempt += 1;
        Some(self.attempt)
    }

    /// Whether another attempt remains after the current one
    pub fn has_remaining(&self) -> bool {
        self.attempt < self.max_retries
    }
}

/// What other components may do with the live session
#[async_trait]
pub trait SessionControl: Send + Sync {
    /// Whether a session is currently acknowledged
    fn is_connected(&self) -> bool;

    /// Queue an envelope on the session
    async fn send(&self, envelope: Envelope) -> Result<()>;

    /// Ask the transport to close the session
    async fn close(&self) -> Result<()>;
}

/// Owns the agent's connection to the relay
pub struct AgentConnector {
    settings: AgentSettings,
    dialer: Arc<dyn Dialer>,
    executor: Arc<CommandExecutor>,
    heartbeat: Arc<HeartbeatScheduler>,
    config: Arc<ConfigCell>,
    codec: EnvelopeCodec,
    active: AtomicBool,
    outbound: Mutex<Option<mpsc::Sender<Outgoing>>>,
    state: watch::Sender<ConnectionState>,
    transitions: broadcast::Sender<ConnectionState>,
}

impl AgentConnector {
    /// Create a disconnected connector
    pub fn new(
        settings: AgentSettings,
        dialer: Arc<dyn Dialer>,
        executor: Arc<CommandExecutor>,
        heartbeat: Arc<HeartbeatScheduler>,
        config: Arc<ConfigCell>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (transitions, _) = broadcast::channel(64);
        Self {
            settings,
            dialer,
            executor,
            heartbeat,
            config,
            codec: EnvelopeCodec::new(),
            active: AtomicBool::new(false),
            outbound: Mutex::new(None),
            state,
            transitions,
        }
    }

    /// Identity this connector registers under
    pub fn identity(&self) -> &str {
        &self.settings.identity
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch the current state
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Receive every state transition from now on
    pub fn subscribe_transitions(&self) -> broadcast::Receiver<ConnectionState> {
        self.transitions.subscribe()
    }

    /// Start a connection sequence on its own task.
    ///
    /// The handle resolves when the sequence gives up or the session it
    /// established ends.
    pub fn connect(self: &Arc<Self>) -> Result<JoinHandle<Result<()>>> {
        if self.active.swap(true, Ordering::AcqRel) {
            return Err(AgentError::AlreadyConnecting);
        }
        let connector = self.clone();
        Ok(tokio::spawn(async move {
            let outcome = connector.clone().run().await;
            connector.active.store(false, Ordering::Release);
            outcome
        }))
    }

    async fn run(self: Arc<Self>) -> Result<()> {
        let url = self.settings.websocket_url();
        let mut retry = RetryState::new(self.settings.max_retries, self.settings.retry_delay);

        while let Some(attempt) = retry.next_attempt() {
            self.transition(ConnectionState::Connecting);
            info!(
                "Connecting to {} (attempt {}/{})",
                url, attempt, retry.max_retries
            );

            match self.establish(&url).await {
                Ok(link) => {
                    self.run_session(link).await;
                    return Ok(());
                }
                Err(e) => {
                    warn!("Connection attempt {} failed: {}", attempt, e);
                    self.transition(ConnectionState::Disconnected);
                    if retry.has_remaining() {
                        tokio::time::sleep(retry.delay).await;
                    }
                }
            }
        }

        error!(
            "Giving up on {} after {} attempts",
            url, retry.max_retries
        );
        Err(AgentError::RetriesExhausted {
            attempts: retry.max_retries,
        })
    }

    /// Dial and wait for the acknowledgment under one deadline
    async fn establish(&self, url: &str) -> Result<Link> {
        let deadline = tokio::time::Instant::now() + self.settings.ack_timeout;
        let mut link = match tokio::time::timeout_at(deadline, self.dialer.dial(url)).await {
            Ok(link) => link?,
            Err(_) => return Err(AgentError::ConnectTimeout(self.settings.ack_timeout)),
        };
        let codec = self.codec;

        let ack = tokio::time::timeout_at(deadline, async {
            while let Some(text) = link.inbound.recv().await {
                match codec.decode(&text) {
                    Ok(Envelope { message: Message::Connected { agent_id }, .. }) => {
                        debug!("Relay acknowledged session for {}", agent_id);
                        return Ok(());
                    }
                    Ok(other) => debug!("Ignoring {} before acknowledgment", other.kind()),
                    Err(e) => warn!("Dropping malformed envelope: {}", e),
                }
            }
            Err(AgentError::Transport(TransportError::Closed))
        })
        .await;

        match ack {
            Ok(Ok(())) => Ok(link),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                let _ = link.outbound.try_send(Outgoing::Close);
                Err(AgentError::AckTimeout(self.settings.ack_timeout))
            }
        }
    }

    async fn run_session(self: &Arc<Self>, link: Link) {
        let Link { outbound, mut inbound } = link;
        let session = CancellationToken::new();

        self.set_outbound(Some(outbound));
        self.transition(ConnectionState::Connected);
        info!("Connected to relay as {}", self.settings.identity);

        self.heartbeat.start();
        self.spawn_config_query(session.clone());

        while let Some(text) = inbound.recv().await {
            let connector = self.clone();
            tokio::spawn(async move {
                connector.handle_text(&text).await;
            });
        }

        session.cancel();
        self.set_outbound(None);
        self.heartbeat.stop();
        self.transition(ConnectionState::Disconnected);
        info!("Disconnected from relay");
    }

    fn spawn_config_query(self: &Arc<Self>, session: CancellationToken) {
        let connector = self.clone();
        let delay = self.settings.config_query_delay;
        tokio::spawn(async move {
            tokio::select! {
                _ = session.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let query = Envelope::query_config(connector.settings.identity.clone());
                    if let Err(e) = connector.send(query).await {
                        warn!("Config query failed: {}", e);
                    }
                }
            }
        });
    }

    /// Dispatch one inbound text frame
    pub async fn handle_text(&self, text: &str) {
        let envelope = match self.codec.decode(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Dropping malformed envelope: {}", e);
                return;
            }
        };

        match envelope.message {
            Message::Command { command_id, command_type, command_content } => {
                let reply = self
                    .executor
                    .handle_command(command_id, &command_type, &command_content)
                    .await;
                if let Some(reply) = reply {
                    if let Err(e) = self.send(reply).await {
                        warn!("Failed to report result of command {:?}: {}", command_id, e);
                    }
                }
            }
            Message::ConfigResponse { sync_frequency } => {
                if let Err(e) = self.config.update(sync_frequency) {
                    warn!("Ignoring config response: {}", e);
                }
            }
            Message::Ping => {
                if let Err(e) = self.send(Envelope::heartbeat(self.settings.identity.clone())).await {
                    warn!("Failed to answer ping: {}", e);
                }
            }
            Message::Connected { .. } => {
                debug!("Duplicate acknowledgment ignored");
            }
            other => {
                debug!("Ignoring {} envelope", other.kind());
            }
        }
    }

    fn transition(&self, next: ConnectionState) {
        self.state.send_replace(next);
        let _ = self.transitions.send(next);
        debug!("Connection state -> {:?}", next);
    }

    fn set_outbound(&self, outbound: Option<mpsc::Sender<Outgoing>>) {
        match self.outbound.lock() {
            Ok(mut slot) => *slot = outbound,
            Err(poisoned) => *poisoned.into_inner() = outbound,
        }
    }

    fn current_outbound(&self) -> Option<mpsc::Sender<Outgoing>> {
        match self.outbound.lock() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl SessionControl for AgentConnector {
    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    async fn send(&self, envelope: Envelope) -> Result<()> {
        let outbound = self.current_outbound().ok_or(AgentError::NotConnected)?;
        let text = self.codec.encode(&envelope)?;
        outbound
            .send(Outgoing::Text(text))
            .await
            .map_err(|_| AgentError::Transport(TransportError::Closed))
    }

    async fn close(&self) -> Result<()> {
        let outbound = self.current_outbound().ok_or(AgentError::NotConnected)?;
        info!("Closing connection to relay");
        outbound
            .send(Outgoing::Close)
            .await
            .map_err(|_| AgentError::Transport(TransportError::Closed))
    }
}
