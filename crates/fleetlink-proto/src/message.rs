//! Message types and enums

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Config type requested by agents when they query their sync frequency
pub const SYNC_FREQUENCY_CONFIG: &str = "syncFrequency";

static LAST_TIMESTAMP: AtomicU64 = AtomicU64::new(0);

/// Wall-clock milliseconds, never lower than a value previously returned
/// by this process.
pub fn monotonic_millis() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    let previous = LAST_TIMESTAMP.fetch_max(now, Ordering::AcqRel);
    previous.max(now)
}

/// One unit on the wire: a typed message plus the common header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message body, discriminated by `type`
    #[serde(flatten)]
    pub message: Message,
    /// Sender timestamp in milliseconds since the Unix epoch
    #[serde(default)]
    pub timestamp: u64,
}

impl Envelope {
    /// Wrap a message, stamping it with the current monotonic time
    pub fn new(message: Message) -> Self {
        Self {
            message,
            timestamp: monotonic_millis(),
        }
    }

    /// Liveness report from an agent
    pub fn heartbeat(agent_id: impl Into<String>) -> Self {
        Self::new(Message::Heartbeat {
            agent_id: agent_id.into(),
        })
    }

    /// Status report carrying an opaque payload
    pub fn status(agent_id: impl Into<String>, status: serde_json::Value) -> Self {
        Self::new(Message::Status {
            agent_id: agent_id.into(),
            status,
        })
    }

    /// Sync frequency query sent after (re)connecting
    pub fn query_config(agent_id: impl Into<String>) -> Self {
        Self::new(Message::QueryConfig {
            agent_id: agent_id.into(),
            config_type: SYNC_FREQUENCY_CONFIG.to_string(),
        })
    }

    /// Relay answer to `query_config`
    pub fn config_response(sync_frequency: i64) -> Self {
        Self::new(Message::ConfigResponse { sync_frequency })
    }

    /// Command pushed to an agent
    pub fn command(
        command_id: Option<i64>,
        command_type: impl Into<String>,
        command_content: impl Into<String>,
    ) -> Self {
        Self::new(Message::Command {
            command_id,
            command_type: command_type.into(),
            command_content: command_content.into(),
        })
    }

    /// Correlated result of a command
    pub fn command_result(command_id: i64, success: bool, result: impl Into<String>) -> Self {
        Self::new(Message::CommandResult {
            command_id,
            success,
            result: result.into(),
        })
    }

    /// Relay liveness check
    pub fn ping() -> Self {
        Self::new(Message::Ping)
    }

    /// Connection-accepted acknowledgment
    pub fn connected(agent_id: impl Into<String>) -> Self {
        Self::new(Message::Connected {
            agent_id: agent_id.into(),
        })
    }

    /// Wire name of the message type
    pub fn kind(&self) -> &'static str {
        self.message.kind()
    }
}

/// Message bodies exchanged between agents and the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Agent liveness report
    #[serde(rename_all = "camelCase")]
    Heartbeat {
        /// Reporting agent
        agent_id: String,
    },

    /// Agent status report
    #[serde(rename_all = "camelCase")]
    Status {
        /// Reporting agent
        agent_id: String,
        /// Opaque status payload
        status: serde_json::Value,
    },

    /// Agent asks for its stored configuration
    #[serde(rename_all = "camelCase")]
    QueryConfig {
        /// Requesting agent
        agent_id: String,
        /// Which configuration value is requested
        config_type: String,
    },

    /// Relay answer to a config query
    #[serde(rename_all = "camelCase")]
    ConfigResponse {
        /// Heartbeat interval in seconds
        sync_frequency: i64,
    },

    /// Command for an agent to execute
    #[serde(rename_all = "camelCase")]
    Command {
        /// Correlation id; absent means no result is expected
        #[serde(default, skip_serializing_if = "Option::is_none")]
        command_id: Option<i64>,
        /// Command type, matched case-insensitively
        command_type: String,
        /// Free-form content, JSON text for `config`
        #[serde(default)]
        command_content: String,
    },

    /// Agent answer to a correlated command
    #[serde(rename_all = "camelCase")]
    CommandResult {
        /// Correlation id copied from the command
        command_id: i64,
        /// Whether execution succeeded
        success: bool,
        /// Human-readable outcome
        result: String,
    },

    /// Liveness check from the relay, answered with a heartbeat
    Ping,

    /// Relay acknowledgment that the session is registered
    #[serde(rename_all = "camelCase")]
    Connected {
        /// Identity the session was registered under
        agent_id: String,
    },

    /// Any `type` this build does not know about
    #[serde(other)]
    Unknown,
}

impl Message {
    /// Wire name of the message type
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Heartbeat { .. } => "heartbeat",
            Self::Status { .. } => "status",
            Self::QueryConfig { .. } => "query_config",
            Self::ConfigResponse { .. } => "config_response",
            Self::Command { .. } => "command",
            Self::CommandResult { .. } => "command_result",
            Self::Ping => "ping",
            Self::Connected { .. } => "connected",
            Self::Unknown => "unknown",
        }
    }

    /// Whether this message is expected to flow from an agent to the relay
    pub fn is_agent_originated(&self) -> bool {
        matches!(
            self,
            Self::Heartbeat { .. }
                | Self::Status { .. }
                | Self::QueryConfig { .. }
                | Self::CommandResult { .. }
        )
    }
}
