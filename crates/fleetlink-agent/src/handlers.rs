//! Handlers for the built-in command types

use crate::config::ConfigCell;
use crate::executor::CommandHandler;
use crate::orchestrator::Orchestrator;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use fleetlink_proto::SYNC_FREQUENCY_CONFIG;
use std::sync::Arc;
use tracing::debug;

/// Handler for `offline`: close the session and stop the process
pub struct OfflineHandler {
    orchestrator: Arc<Orchestrator>,
}

impl OfflineHandler {
    /// Create a handler driving `orchestrator`
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl CommandHandler for OfflineHandler {
    async fn handle(&self, _content: &str) -> Result<String> {
        if self.orchestrator.schedule_offline().is_none() {
            debug!("Offline requested while already terminating");
        }
        Ok("Agent going offline".to_string())
    }
}

/// Handler for `restart`: replace the running process
pub struct RestartHandler {
    orchestrator: Arc<Orchestrator>,
}

impl RestartHandler {
    /// Create a handler driving `orchestrator`
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl CommandHandler for RestartHandler {
    async fn handle(&self, _content: &str) -> Result<String> {
        if self.orchestrator.schedule_restart().is_none() {
            debug!("Restart requested while already terminating");
        }
        Ok("Agent restarting".to_string())
    }
}

/// Handler for `config`: apply `{"syncFrequency": <seconds>}`
pub struct ConfigHandler {
    config: Arc<ConfigCell>,
}

impl ConfigHandler {
    /// Create a handler updating `config`
    pub fn new(config: Arc<ConfigCell>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl CommandHandler for ConfigHandler {
    async fn handle(&self, content: &str) -> Result<String> {
        let value: serde_json::Value =
            serde_json::from_str(content).context("Config content is not valid JSON")?;
        let field = value
            .get(SYNC_FREQUENCY_CONFIG)
            .ok_or_else(|| anyhow!("Missing {}", SYNC_FREQUENCY_CONFIG))?;
        let seconds = field
            .as_i64()
            .ok_or_else(|| anyhow!("{} must be an integer, got {}", SYNC_FREQUENCY_CONFIG, field))?;

        self.config.update(seconds)?;
        Ok(format!("Sync frequency set to {}s", seconds))
    }
}
