//! # Fleetlink Relay
//!
//! The relay tier of Fleetlink. Agents keep a WebSocket session open to the
//! relay; the control plane forwards commands to them over HTTP and monitors
//! watch their status reports.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub use fleetlink_proto as proto;

/// Error types for the relay
pub mod error;

/// Connection registry mapping agent identities to live sessions
pub mod registry;

/// Command forwarding from the control plane to connected agents
pub mod relay;

/// Lifecycle tracking for forwarded commands
pub mod commands;

/// Durable configuration boundary used to answer `query_config`
pub mod config_store;

/// Fan-out of agent reports to monitor clients
pub mod monitor;

/// HTTP and WebSocket boundary of the relay
pub mod server;

pub use commands::CommandLedger;
pub use config_store::{ConfigStore, InMemoryConfigStore};
pub use error::{RelayError, Result};
pub use monitor::{DeviceEvent, MonitorHub};
pub use registry::{AgentSession, ConnectionRegistry};
pub use relay::{CommandRelay, ForwardOutcome};
pub use server::{router, serve, serve_listener, spawn_ping_sweep, AppState};
