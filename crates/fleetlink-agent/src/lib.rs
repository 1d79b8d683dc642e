//! # Fleetlink Agent
//!
//! Keeps a session with the Fleetlink relay, reports status on a schedule the
//! relay can change at runtime, and executes the commands it forwards.

#![warn(missing_docs)]

/// Error types for the agent
pub mod error;

/// Agent settings and the live config cell
pub mod config;

/// WebSocket transport to the relay
pub mod transport;

/// Outbound connection lifecycle
pub mod connector;

/// Periodic status reporting
pub mod heartbeat;

/// Command dispatch by type and result correlation
pub mod executor;

/// Handlers for the built-in command types
pub mod handlers;

/// Graceful restart and forced shutdown
pub mod orchestrator;

pub use config::{AgentSettings, ConfigCell};
pub use connector::{AgentConnector, ConnectionState, RetryState, SessionControl};
pub use error::{AgentError, Result, TransportError};
pub use executor::{CommandExecutor, CommandHandler, CommandOutcome};
pub use heartbeat::{HeartbeatScheduler, StatusProvider, SystemStatusProvider};
pub use orchestrator::{capture_boot_args, Orchestrator, ProcessControl, SystemProcess};
pub use transport::{Dialer, Link, WsDialer};

use fleetlink_proto::CommandKind;
use handlers::{ConfigHandler, OfflineHandler, RestartHandler};
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

/// A fully wired agent
pub struct Agent {
    /// Live configuration
    pub config: Arc<ConfigCell>,
    /// Status reporting
    pub heartbeat: Arc<HeartbeatScheduler>,
    /// Restart and offline sequences
    pub orchestrator: Arc<Orchestrator>,
    /// Command dispatch
    pub executor: Arc<CommandExecutor>,
    /// Relay connection
    pub connector: Arc<AgentConnector>,
}

impl Agent {
    /// Connect and keep the agent alive until `shutdown` resolves.
    ///
    /// Exhausted retries are returned as an error. A session the relay ends
    /// leaves the agent disconnected until `shutdown`. Once a restart or
    /// offline sequence has started this never returns; the orchestrator
    /// ends the process.
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let session = self.connector.connect()?;

        let ended = tokio::select! {
            outcome = session => Some(outcome),
            _ = shutdown.as_mut() => None,
        };

        if self.orchestrator.is_terminating() {
            std::future::pending::<()>().await;
        }

        match ended {
            None => {
                info!("Shutdown requested, closing connection");
                if let Err(e) = self.connector.close().await {
                    warn!("Failed to close connection: {}", e);
                }
            }
            Some(Ok(Ok(()))) => {
                info!("Session with relay ended, staying disconnected until restarted");
                shutdown.as_mut().await;
            }
            Some(Ok(Err(e))) => return Err(e),
            Some(Err(e)) => return Err(AgentError::Task(e)),
        }

        self.heartbeat.stop();
        Ok(())
    }
}

/// Builder for [`Agent`] with replaceable collaborators
pub struct AgentBuilder {
    settings: AgentSettings,
    dialer: Arc<dyn Dialer>,
    process: Arc<dyn ProcessControl>,
    status: Arc<dyn StatusProvider>,
    boot_args: Vec<String>,
}

impl AgentBuilder {
    /// Builder with the real transport, process control and status provider
    pub fn new(settings: AgentSettings) -> Self {
        Self {
            settings,
            dialer: Arc::new(WsDialer),
            process: Arc::new(SystemProcess),
            status: Arc::new(SystemStatusProvider::default()),
            boot_args: capture_boot_args().to_vec(),
        }
    }

    /// Use a custom dialer
    pub fn with_dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = dialer;
        self
    }

    /// Use custom process control
    pub fn with_process(mut self, process: Arc<dyn ProcessControl>) -> Self {
        self.process = process;
        self
    }

    /// Use a custom status provider
    pub fn with_status_provider(mut self, status: Arc<dyn StatusProvider>) -> Self {
        self.status = status;
        self
    }

    /// Respawn with these arguments instead of the captured ones
    pub fn with_boot_args(mut self, boot_args: Vec<String>) -> Self {
        self.boot_args = boot_args;
        self
    }

    /// Build every component and bind the back-references once
    pub async fn build(self) -> Result<Agent> {
        let settings = self.settings;
        let config = Arc::new(ConfigCell::new(settings.sync_frequency));
        let heartbeat = Arc::new(HeartbeatScheduler::new(
            settings.identity.clone(),
            config.clone(),
            self.status,
        ));
        let orchestrator = Arc::new(Orchestrator::new(
            self.process,
            self.boot_args,
            settings.grace_period,
            settings.exit_delay,
        ));

        let executor = Arc::new(CommandExecutor::new());
        executor
            .register_handler(
                CommandKind::Offline.as_str(),
                Arc::new(OfflineHandler::new(orchestrator.clone())),
            )
            .await;
        executor
            .register_handler(
                CommandKind::Config.as_str(),
                Arc::new(ConfigHandler::new(config.clone())),
            )
            .await;
        executor
            .register_handler(
                CommandKind::Restart.as_str(),
                Arc::new(RestartHandler::new(orchestrator.clone())),
            )
            .await;

        let connector = Arc::new(AgentConnector::new(
            settings,
            self.dialer,
            executor.clone(),
            heartbeat.clone(),
            config.clone(),
        ));

        let session = Arc::downgrade(&connector);
        heartbeat.bind(session.clone())?;
        orchestrator.bind(session)?;

        Ok(Agent {
            config,
            heartbeat,
            orchestrator,
            executor,
            connector,
        })
    }
}

/// Wire an agent with the real transport and process control
pub async fn wire(settings: AgentSettings) -> Result<Agent> {
    AgentBuilder::new(settings).build().await
}
