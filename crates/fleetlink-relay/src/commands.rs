//! Lifecycle tracking for forwarded commands

use crate::relay::ForwardOutcome;
use fleetlink_proto::{Command, CommandStatus};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Commands remembered before the oldest are forgotten
pub const LEDGER_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct Entries {
    commands: HashMap<i64, Command>,
    order: VecDeque<i64>,
}

/// Tracks every correlated command from forward to agent result
#[derive(Debug)]
pub struct CommandLedger {
    entries: RwLock<Entries>,
    capacity: usize,
}

impl Default for CommandLedger {
    fn default() -> Self {
        Self::with_capacity(LEDGER_CAPACITY)
    }
}

impl CommandLedger {
    /// Create a ledger with the default capacity
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a ledger remembering at most `capacity` commands
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
            capacity: capacity.max(1),
        }
    }

    /// Record a forward attempt and move the command past `Pending`
    pub async fn record(
        &self,
        identity: &str,
        command_id: i64,
        command_type: &str,
        command_content: &str,
        outcome: &ForwardOutcome,
    ) -> CommandStatus {
        let mut command = Command::new(command_id, identity, command_type, command_content);
        let moved = match outcome {
            ForwardOutcome::Delivered => command.transition(CommandStatus::Executing),
            ForwardOutcome::NotFound => command.complete(false, "Agent not found or offline"),
            ForwardOutcome::TransportError(e) => command.complete(false, e.as_str()),
        };
        if let Err(e) = moved {
            warn!("Command {} left pending: {}", command_id, e);
        }
        let status = command.status;

        let mut entries = self.entries.write().await;
        if entries.commands.insert(command_id, command).is_some() {
            warn!("Command id {} reused, previous record replaced", command_id);
            entries.order.retain(|id| *id != command_id);
        }
        entries.order.push_back(command_id);
        while entries.order.len() > self.capacity {
            if let Some(oldest) = entries.order.pop_front() {
                entries.commands.remove(&oldest);
            }
        }
        status
    }

    /// Apply a `command_result` reported by `identity`.
    ///
    /// Returns the new status, or `None` when the result does not match a
    /// command awaiting one.
    pub async fn resolve(
        &self,
        identity: &str,
        command_id: i64,
        success: bool,
        result: &str,
    ) -> Option<CommandStatus> {
        let mut entries = self.entries.write().await;
        let Some(command) = entries.commands.get_mut(&command_id) else {
            debug!("Result for untracked command {} from {}", command_id, identity);
            return None;
        };
        if command.target_identity != identity {
            warn!(
                "Agent {} reported on command {} addressed to {}",
                identity, command_id, command.target_identity
            );
            return None;
        }
        match command.complete(success, result) {
            Ok(()) => Some(command.status),
            Err(e) => {
                warn!("Ignoring result for command {}: {}", command_id, e);
                None
            }
        }
    }

    /// Current record of a command
    pub async fn get(&self, command_id: i64) -> Option<Command> {
        self.entries.read().await.commands.get(&command_id).cloned()
    }

    /// Number of remembered commands
    pub async fn len(&self) -> usize {
        self.entries.read().await.commands.len()
    }

    /// Whether nothing is remembered
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_delivered_then_completed() {
        let ledger = CommandLedger::new();
        let status = ledger
            .record("edge-01", 42, "config", "{}", &ForwardOutcome::Delivered)
            .await;
        assert_eq!(status, CommandStatus::Executing);

        assert_eq!(
            ledger.resolve("edge-01", 42, true, "applied").await,
            Some(CommandStatus::Completed)
        );
        let command = ledger.get(42).await.unwrap();
        assert_eq!(command.result.as_deref(), Some("applied"));
        assert!(command.executed_at.is_some());
    }

    #[tokio::test]
    async fn test_undeliverable_command_fails() {
        let ledger = CommandLedger::new();
        let status = ledger
            .record("ghost", 1, "restart", "", &ForwardOutcome::NotFound)
            .await;
        assert_eq!(status, CommandStatus::Failed);
        assert_eq!(
            ledger.get(1).await.unwrap().result.as_deref(),
            Some("Agent not found or offline")
        );
    }

    #[tokio::test]
    async fn test_terminal_result_is_final() {
        let ledger = CommandLedger::new();
        ledger
            .record("edge-01", 7, "offline", "", &ForwardOutcome::Delivered)
            .await;
        ledger.resolve("edge-01", 7, false, "boom").await;

        assert_eq!(ledger.resolve("edge-01", 7, true, "late").await, None);
        let command = ledger.get(7).await.unwrap();
        assert_eq!(command.status, CommandStatus::Failed);
        assert_eq!(command.result.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_result_from_wrong_agent_ignored() {
        let ledger = CommandLedger::new();
        ledger
            .record("edge-01", 3, "config", "{}", &ForwardOutcome::Delivered)
            .await;

        assert_eq!(ledger.resolve("edge-02", 3, true, "ok").await, None);
        assert_eq!(ledger.resolve("edge-01", 99, true, "ok").await, None);
        assert_eq!(ledger.get(3).await.unwrap().status, CommandStatus::Executing);
    }

    #[tokio::test]
    async fn test_oldest_commands_forgotten() {
        let ledger = CommandLedger::with_capacity(2);
        for id in 1..=3 {
            ledger
                .record("edge-01", id, "config", "{}", &ForwardOutcome::Delivered)
                .await;
        }

        assert_eq!(ledger.len().await, 2);
        assert!(ledger.get(1).await.is_none());
        assert!(ledger.get(3).await.is_some());
    }
}
