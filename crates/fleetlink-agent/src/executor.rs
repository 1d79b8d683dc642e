//! Command dispatch by type and result correlation

use async_trait::async_trait;
use fleetlink_proto::Envelope;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Handler trait for executing one command type
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Execute the command and describe the outcome
    async fn handle(&self, content: &str) -> anyhow::Result<String>;
}

/// Result of executing a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    /// Whether execution succeeded
    pub success: bool,
    /// Human-readable outcome
    pub result: String,
}

/// Dispatch table keyed by lower-cased command type
#[derive(Default)]
pub struct CommandExecutor {
    handlers: RwLock<HashMap<String, Arc<dyn CommandHandler>>>,
}

impl CommandExecutor {
    /// Create an executor with no handlers
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a command type
    pub async fn register_handler(&self, command_type: &str, handler: Arc<dyn CommandHandler>) {
        let command_type = command_type.to_ascii_lowercase();
        debug!("Registered handler for command type: {}", command_type);
        self.handlers.write().await.insert(command_type, handler);
    }

    /// Execute a command; handler errors become failed outcomes
    pub async fn execute(&self, command_type: &str, content: &str) -> CommandOutcome {
        let key = command_type.to_ascii_lowercase();
        let handler = self.handlers.read().await.get(&key).cloned();

        let Some(handler) = handler else {
            warn!("Unknown command type: {}", command_type);
            return CommandOutcome {
                success: false,
                result: format!("Unknown command type: {}", command_type),
            };
        };

        match handler.handle(content).await {
            Ok(result) => {
                info!("Command {} succeeded: {}", key, result);
                CommandOutcome {
                    success: true,
                    result,
                }
            }
            Err(e) => {
                warn!("Command {} failed: {:#}", key, e);
                CommandOutcome {
                    success: false,
                    result: format!("Command failed: {:#}", e),
                }
            }
        }
    }

    /// Execute a command and build its `command_result`, if one is owed.
    ///
    /// Only positive ids are correlated; anything else executes silently.
    pub async fn handle_command(
        &self,
        command_id: Option<i64>,
        command_type: &str,
        content: &str,
    ) -> Option<Envelope> {
        info!("Received command {:?} of type {}", command_id, command_type);
        let outcome = self.execute(command_type, content).await;
        command_id
            .filter(|id| *id > 0)
            .map(|id| Envelope::command_result(id, outcome.success, outcome.result))
    }
}
