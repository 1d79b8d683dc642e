//! Command forwarding from the control plane to connected agents

use crate::commands::CommandLedger;
use crate::registry::ConnectionRegistry;
use fleetlink_proto::{CommandKind, Envelope, EnvelopeCodec};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Synchronous outcome of handing a command to an agent's transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// Handed to the transport
    Delivered,
    /// Agent not registered or its transport is closed
    NotFound,
    /// Transport looked open but the write failed
    TransportError(String),
}

/// Looks up agents in the registry and forwards envelopes to them
#[derive(Debug, Clone)]
pub struct CommandRelay {
    registry: Arc<ConnectionRegistry>,
    ledger: Arc<CommandLedger>,
    codec: EnvelopeCodec,
}

impl CommandRelay {
    /// Create a relay over a registry
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            ledger: Arc::new(CommandLedger::new()),
            codec: EnvelopeCodec::new(),
        }
    }

    /// Registry this relay forwards through
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Lifecycle records of correlated commands
    pub fn ledger(&self) -> &Arc<CommandLedger> {
        &self.ledger
    }

    /// Forward a command to `identity`.
    ///
    /// Commands with a positive id are tracked in the ledger.
    pub async fn forward(
        &self,
        identity: &str,
        command_id: Option<i64>,
        command_type: &str,
        command_content: &str,
    ) -> ForwardOutcome {
        if CommandKind::parse(command_type).is_none() {
            warn!(
                "Forwarding unrecognized command type {} to agent {}",
                command_type, identity
            );
        }
        let envelope = Envelope::command(command_id, command_type, command_content);
        let outcome = self.forward_envelope(identity, &envelope).await;
        if let Some(id) = command_id.filter(|id| *id > 0) {
            self.ledger
                .record(identity, id, command_type, command_content, &outcome)
                .await;
        }
        match &outcome {
            ForwardOutcome::Delivered => info!(
                "Forwarded {} command {:?} to agent {}",
                command_type, command_id, identity
            ),
            ForwardOutcome::NotFound => info!(
                "Agent {} not found or offline, dropping {} command",
                identity, command_type
            ),
            ForwardOutcome::TransportError(e) => {
                warn!("Failed to forward command to agent {}: {}", identity, e)
            }
        }
        outcome
    }

    /// Send a `ping` to `identity`
    pub async fn ping(&self, identity: &str) -> ForwardOutcome {
        self.forward_envelope(identity, &Envelope::ping()).await
    }

    /// Ping every registered agent; returns how many pings were delivered
    pub async fn ping_all(&self) -> usize {
        let mut delivered = 0;
        for identity in self.registry.list_online().await {
            if self.ping(&identity).await == ForwardOutcome::Delivered {
                delivered += 1;
            }
        }
        debug!("Ping sweep reached {} agents", delivered);
        delivered
    }

    /// Forward an arbitrary envelope, evicting stale sessions on failure
    pub async fn forward_envelope(&self, identity: &str, envelope: &Envelope) -> ForwardOutcome {
        let session = match self.registry.lookup(identity).await {
            Some(session) => session,
            None => return ForwardOutcome::NotFound,
        };

        if !session.is_open() {
            session.close();
            self.registry
                .unregister_session(identity, session.session_id)
                .await;
            return ForwardOutcome::NotFound;
        }

        let text = match self.codec.encode(envelope) {
            Ok(text) => text,
            Err(e) => return ForwardOutcome::TransportError(e.to_string()),
        };

        match session.send_text(text) {
            Ok(()) => ForwardOutcome::Delivered,
            Err(e) => {
                session.close();
                self.registry
                    .unregister_session(identity, session.session_id)
                    .await;
                ForwardOutcome::TransportError(e.to_string())
            }
        }
    }
}
