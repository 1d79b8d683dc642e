//! Connection registry mapping agent identities to live sessions

use crate::error::{RelayError, Result};
use fleetlink_proto::Outgoing;
use std::collections::HashMap;
use std::time::SystemTime;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Capacity of each session's outbound queue
pub const OUTBOUND_QUEUE_SIZE: usize = 64;

/// A live agent session as seen by the relay
#[derive(Debug, Clone)]
pub struct AgentSession {
    /// Identity the agent connected under
    pub identity: String,
    /// Unique id of this transport connection
    pub session_id: Uuid,
    /// When the handshake completed
    pub established_at: SystemTime,
    /// Queue drained by the session's writer task
    outbound: mpsc::Sender<Outgoing>,
    /// Cancelled when the relay drops the session
    shutdown: CancellationToken,
}

impl AgentSession {
    /// Create a session around an outbound queue
    pub fn new(identity: impl Into<String>, outbound: mpsc::Sender<Outgoing>) -> Self {
        Self {
            identity: identity.into(),
            session_id: Uuid::new_v4(),
            established_at: SystemTime::now(),
            outbound,
            shutdown: CancellationToken::new(),
        }
    }

    /// Whether the transport can still accept writes
    pub fn is_open(&self) -> bool {
        !self.outbound.is_closed() && !self.shutdown.is_cancelled()
    }

    /// Enqueue an encoded envelope without waiting
    pub fn send_text(&self, text: String) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(RelayError::SessionClosed(self.identity.clone()));
        }
        self.outbound
            .try_send(Outgoing::Text(text))
            .map_err(|e| RelayError::SessionClosed(format!("{}: {}", self.identity, e)))
    }

    /// Ask the writer to send a close frame and stop the reader
    pub fn close(&self) {
        let _ = self.outbound.try_send(Outgoing::Close);
        self.shutdown.cancel();
    }

    /// Token cancelled when the session is closed by the relay
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

/// Identity to session map; the single source of truth for "online"
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    sessions: RwLock<HashMap<String, AgentSession>>,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session, replacing and closing any previous one for the
    /// same identity. Returns the replaced session.
    pub async fn register(&self, session: AgentSession) -> Option<AgentSession> {
        let identity = session.identity.clone();
        let session_id = session.session_id;
        let replaced = self.sessions.write().await.insert(identity.clone(), session);

        if let Some(old) = &replaced {
            info!(
                "Agent {} reconnected, closing superseded session {}",
                identity, old.session_id
            );
            old.close();
        }
        info!("Registered agent {} (session {})", identity, session_id);
        replaced
    }

    /// Remove the session for `identity` if present
    pub async fn unregister(&self, identity: &str) -> Option<AgentSession> {
        let removed = self.sessions.write().await.remove(identity);
        if removed.is_some() {
            info!("Unregistered agent {}", identity);
        }
        removed
    }

    /// Remove the session only if it is still the one with `session_id`
    pub async fn unregister_session(&self, identity: &str, session_id: Uuid) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get(identity) {
            Some(current) if current.session_id == session_id => {
                sessions.remove(identity);
                info!("Agent {} disconnected (session {})", identity, session_id);
                true
            }
            _ => {
                debug!(
                    "Session {} of {} already superseded, leaving registry untouched",
                    session_id, identity
                );
                false
            }
        }
    }

    /// Whether `identity` has a session with an open transport
    pub async fn is_online(&self, identity: &str) -> bool {
        self.sessions
            .read()
            .await
            .get(identity)
            .map(AgentSession::is_open)
            .unwrap_or(false)
    }

    /// Session handle for `identity`, if registered
    pub async fn lookup(&self, identity: &str) -> Option<AgentSession> {
        self.sessions.read().await.get(identity).cloned()
    }

    /// Sorted snapshot of registered identities
    pub async fn list_online(&self) -> Vec<String> {
        let mut identities: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        identities.sort();
        identities
    }

    /// Number of registered sessions
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests;
