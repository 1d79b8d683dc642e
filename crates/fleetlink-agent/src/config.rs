//! Agent settings and the live config cell

use crate::error::{AgentError, Result};
use fleetlink_proto::ConfigSnapshot;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::info;

/// Holds the current heartbeat interval; swapped by writers, loaded by readers
#[derive(Debug)]
pub struct ConfigCell {
    sync_frequency: AtomicU64,
}

impl Default for ConfigCell {
    fn default() -> Self {
        Self::new(ConfigSnapshot::DEFAULT_SYNC_FREQUENCY)
    }
}

impl ConfigCell {
    /// Create a cell with an initial interval in seconds
    pub fn new(sync_frequency: u64) -> Self {
        Self {
            sync_frequency: AtomicU64::new(sync_frequency.max(1)),
        }
    }

    /// Current interval in seconds
    pub fn sync_frequency(&self) -> u64 {
        self.sync_frequency.load(Ordering::Acquire)
    }

    /// Current interval as a duration
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.sync_frequency())
    }

    /// Replace the interval; values of zero or below are rejected
    pub fn update(&self, seconds: i64) -> Result<u64> {
        if seconds <= 0 {
            return Err(AgentError::InvalidSyncFrequency(seconds));
        }
        let seconds = seconds as u64;
        let previous = self.sync_frequency.swap(seconds, Ordering::AcqRel);
        if previous != seconds {
            info!("Sync frequency changed from {}s to {}s", previous, seconds);
        }
        Ok(previous)
    }
}

/// Everything an agent needs to reach the relay and behave on commands
#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// Stable name the relay addresses this agent by
    pub identity: String,
    /// Relay base URL, `http(s)://` or `ws(s)://`
    pub endpoint: String,
    /// Connection attempts per sequence
    pub max_retries: u32,
    /// Wait between failed attempts
    pub retry_delay: Duration,
    /// How long to wait for the relay's `connected` acknowledgment
    pub ack_timeout: Duration,
    /// Delay before the post-connect config query
    pub config_query_delay: Duration,
    /// Initial heartbeat interval in seconds
    pub sync_frequency: u64,
    /// Delay before offline/restart take effect
    pub grace_period: Duration,
    /// Delay between spawning a replacement and exiting
    pub exit_delay: Duration,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            identity: String::new(),
            endpoint: "http://localhost:8081".to_string(),
            max_retries: 5,
            retry_delay: Duration::from_millis(3000),
            ack_timeout: Duration::from_secs(5),
            config_query_delay: Duration::from_millis(500),
            sync_frequency: ConfigSnapshot::DEFAULT_SYNC_FREQUENCY,
            grace_period: Duration::from_secs(2),
            exit_delay: Duration::from_millis(200),
        }
    }
}

impl AgentSettings {
    /// Settings for `identity` at `endpoint` with defaults elsewhere
    pub fn new(identity: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Set retry policy
    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    /// Set acknowledgment timeout
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Set delay before the post-connect config query
    pub fn with_config_query_delay(mut self, delay: Duration) -> Self {
        self.config_query_delay = delay;
        self
    }

    /// Set initial heartbeat interval in seconds
    pub fn with_sync_frequency(mut self, seconds: u64) -> Self {
        self.sync_frequency = seconds;
        self
    }

    /// Set offline/restart timing
    pub fn with_shutdown_timing(mut self, grace_period: Duration, exit_delay: Duration) -> Self {
        self.grace_period = grace_period;
        self.exit_delay = exit_delay;
        self
    }

    /// Attempts per sequence, never fewer than one
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// WebSocket URL of this agent's session endpoint
    pub fn websocket_url(&self) -> String {
        let base = self.endpoint.trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };
        format!("{}/ws/agent/{}", base, self.identity)
    }
}
