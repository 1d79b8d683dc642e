//! Command model and lifecycle

use crate::error::CommandError;
use crate::message::monotonic_millis;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Command types agents know how to execute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Close the connection and stop the process
    Offline,
    /// Apply a configuration change
    Config,
    /// Replace the running process
    Restart,
}

impl CommandKind {
    /// Parse a command type, ignoring case
    pub fn parse(command_type: &str) -> Option<Self> {
        match command_type.to_ascii_lowercase().as_str() {
            "offline" => Some(Self::Offline),
            "config" => Some(Self::Config),
            "restart" => Some(Self::Restart),
            _ => None,
        }
    }

    /// Lower-case wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Config => "config",
            Self::Restart => "restart",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    /// Created, not yet delivered
    Pending,
    /// Delivered, awaiting result
    Executing,
    /// Agent reported success
    Completed,
    /// Agent reported failure or delivery failed
    Failed,
    /// No result arrived in time
    Timeout,
    /// Withdrawn before completion
    Cancelled,
}

impl CommandStatus {
    /// Terminal statuses never change again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Timeout | Self::Cancelled
        )
    }

    /// Whether moving from `self` to `next` is allowed
    pub fn can_transition_to(&self, next: CommandStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Executing) => true,
            (Self::Pending, Self::Failed | Self::Cancelled | Self::Timeout) => true,
            (Self::Executing, n) => n.is_terminal(),
            _ => false,
        }
    }
}

/// A command tracked by the control plane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    /// Opaque id assigned by the control plane
    pub command_id: i64,
    /// Agent the command is addressed to
    pub target_identity: String,
    /// Command type as sent on the wire
    pub command_type: String,
    /// Free-form content
    pub command_content: String,
    /// Current lifecycle status
    pub status: CommandStatus,
    /// Result text reported by the agent
    pub result: Option<String>,
    /// Creation time, milliseconds since the Unix epoch
    pub created_at: u64,
    /// Time the command reached a terminal status
    pub executed_at: Option<u64>,
}

impl Command {
    /// Create a pending command
    pub fn new(
        command_id: i64,
        target_identity: impl Into<String>,
        command_type: impl Into<String>,
        command_content: impl Into<String>,
    ) -> Self {
        Self {
            command_id,
            target_identity: target_identity.into(),
            command_type: command_type.into(),
            command_content: command_content.into(),
            status: CommandStatus::Pending,
            result: None,
            created_at: monotonic_millis(),
            executed_at: None,
        }
    }

    /// Move to `next`, rejecting transitions out of terminal states
    pub fn transition(&mut self, next: CommandStatus) -> Result<(), CommandError> {
        if !self.status.can_transition_to(next) {
            return Err(CommandError::IllegalTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.executed_at = Some(monotonic_millis());
        }
        Ok(())
    }

    /// Record an agent-reported result
    pub fn complete(&mut self, success: bool, result: impl Into<String>) -> Result<(), CommandError> {
        let next = if success {
            CommandStatus::Completed
        } else {
            CommandStatus::Failed
        };
        self.transition(next)?;
        self.result = Some(result.into());
        Ok(())
    }
}

/// Configuration an agent keeps in its config cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSnapshot {
    /// Heartbeat interval in seconds
    pub sync_frequency_seconds: u64,
}

impl ConfigSnapshot {
    /// Default heartbeat interval in seconds
    pub const DEFAULT_SYNC_FREQUENCY: u64 = 30;
}

impl Default for ConfigSnapshot {
    fn default() -> Self {
        Self {
            sync_frequency_seconds: Self::DEFAULT_SYNC_FREQUENCY,
        }
    }
}
