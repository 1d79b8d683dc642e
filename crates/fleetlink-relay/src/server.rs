//! HTTP and WebSocket boundary of the relay

use crate::config_store::ConfigStore;
use crate::error::{RelayError, Result};
use crate::monitor::{DeviceEvent, MonitorHub};
use crate::registry::{AgentSession, ConnectionRegistry, OUTBOUND_QUEUE_SIZE};
use crate::relay::{CommandRelay, ForwardOutcome};
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use fleetlink_proto::{Envelope, EnvelopeCodec, Message, Outgoing};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shared state behind every route
#[derive(Clone)]
pub struct AppState {
    /// Live agent sessions
    pub registry: Arc<ConnectionRegistry>,
    /// Command forwarding
    pub relay: CommandRelay,
    /// Configuration answers for `query_config`
    pub config_store: Arc<dyn ConfigStore>,
    /// Monitor fan-out
    pub monitors: MonitorHub,
    codec: EnvelopeCodec,
}

impl AppState {
    /// Build state around a config store
    pub fn new(config_store: Arc<dyn ConfigStore>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        Self {
            relay: CommandRelay::new(registry.clone()),
            registry,
            config_store,
            monitors: MonitorHub::new(),
            codec: EnvelopeCodec::new(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AgentStatusBody {
    agent_id: String,
    online: bool,
}

#[derive(Debug, Serialize)]
struct OnlineAgentsBody {
    agents: Vec<String>,
    count: usize,
}

#[derive(Debug, Serialize)]
struct ConnectionsBody {
    clients: usize,
    agents: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceStatusPush {
    #[serde(default)]
    device_id: Option<i64>,
    #[serde(default)]
    ip_address: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    payload: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceParams {
    device_id: i64,
    ip_address: String,
}

/// Build the relay's router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/command/forward/{identity}", post(forward_command))
        .route("/command/{command_id}", get(command_record))
        .route("/agent/{identity}/status", get(agent_status))
        .route("/agents/online", get(online_agents))
        .route("/connections", get(connections))
        .route("/push/device-status", post(push_device_status))
        .route("/push/heartbeat", post(push_heartbeat))
        .route("/push/device-offline", post(push_device_offline))
        .route("/ws/agent/{identity}", get(agent_ws))
        .route("/ws/monitor", get(monitor_ws))
        .with_state(state)
}

/// Bind `addr` and serve until `shutdown` is cancelled
pub async fn serve(addr: &str, state: AppState, shutdown: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(addr).await.map_err(|source| RelayError::Bind {
        addr: addr.to_string(),
        source,
    })?;
    info!("Relay listening on {}", listener.local_addr()?);
    serve_listener(listener, state, shutdown).await
}

/// Serve on an already bound listener
pub async fn serve_listener(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

/// Periodically ping every agent until `shutdown` is cancelled
pub fn spawn_ping_sweep(
    relay: CommandRelay,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    relay.ping_all().await;
                }
            }
        }
    })
}

async fn forward_command(
    Path(identity): Path<String>,
    State(state): State<AppState>,
    body: String,
) -> Response {
    let envelope = match state.codec.decode(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("Rejected forward request for {}: {}", identity, e);
            return (StatusCode::BAD_REQUEST, format!("Invalid command envelope: {}", e))
                .into_response();
        }
    };

    let (command_id, command_type, command_content) = match envelope.message {
        Message::Command { command_id, command_type, command_content } => {
            (command_id, command_type, command_content)
        }
        other => {
            return (
                StatusCode::BAD_REQUEST,
                format!("Expected a command envelope, got {}", other.kind()),
            )
                .into_response();
        }
    };

    match state
        .relay
        .forward(&identity, command_id, &command_type, &command_content)
        .await
    {
        ForwardOutcome::Delivered => (
            StatusCode::OK,
            format!("Command forwarded to agent: {}", identity),
        )
            .into_response(),
        ForwardOutcome::NotFound => (
            StatusCode::NOT_FOUND,
            format!("Agent not found or offline: {}", identity),
        )
            .into_response(),
        ForwardOutcome::TransportError(e) => (
            StatusCode::BAD_GATEWAY,
            format!("Failed to forward command to agent {}: {}", identity, e),
        )
            .into_response(),
    }
}

async fn command_record(
    Path(command_id): Path<i64>,
    State(state): State<AppState>,
) -> Response {
    match state.relay.ledger().get(command_id).await {
        Some(command) => Json(command).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            format!("Command not tracked: {}", command_id),
        )
            .into_response(),
    }
}

async fn agent_status(
    Path(identity): Path<String>,
    State(state): State<AppState>,
) -> Json<AgentStatusBody> {
    let online = state.registry.is_online(&identity).await;
    Json(AgentStatusBody {
        agent_id: identity,
        online,
    })
}

async fn online_agents(State(state): State<AppState>) -> Json<OnlineAgentsBody> {
    let agents = state.registry.list_online().await;
    Json(OnlineAgentsBody {
        count: agents.len(),
        agents,
    })
}

async fn connections(State(state): State<AppState>) -> Json<ConnectionsBody> {
    Json(ConnectionsBody {
        clients: state.monitors.client_count(),
        agents: state.registry.count().await,
    })
}

async fn push_device_status(
    State(state): State<AppState>,
    Json(push): Json<DeviceStatusPush>,
) -> &'static str {
    info!(
        "Broadcasting device status change: {} - {}",
        push.ip_address, push.status
    );
    state.monitors.push(&DeviceEvent::status_change(
        push.device_id,
        push.ip_address,
        push.status,
        push.payload,
    ));
    "Message pushed"
}

async fn push_heartbeat(
    State(state): State<AppState>,
    Query(params): Query<DeviceParams>,
) -> &'static str {
    debug!("Broadcasting heartbeat from {}", params.ip_address);
    state
        .monitors
        .push(&DeviceEvent::heartbeat(params.device_id, params.ip_address));
    "Heartbeat pushed"
}

async fn push_device_offline(
    State(state): State<AppState>,
    Query(params): Query<DeviceParams>,
) -> &'static str {
    info!("Broadcasting device offline: {}", params.ip_address);
    state
        .monitors
        .push(&DeviceEvent::offline(params.device_id, params.ip_address));
    "Offline message pushed"
}

async fn agent_ws(
    ws: WebSocketUpgrade,
    Path(identity): Path<String>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_agent_socket(socket, identity, state))
}

async fn monitor_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_monitor_socket(socket, state))
}

async fn handle_agent_socket(socket: WebSocket, identity: String, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Outgoing>(OUTBOUND_QUEUE_SIZE);

    let writer = tokio::spawn(async move {
        while let Some(item) = rx.recv().await {
            match item {
                Outgoing::Text(text) => {
                    if sink.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Outgoing::Close => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    break;
                }
            }
        }
    });

    let session = open_session(&state, &identity, tx).await;
    let session_id = session.session_id;
    let shutdown = session.shutdown_token();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    handle_agent_text(&state, &session, text.as_str()).await;
                }
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Transport error from agent {}: {}", identity, e);
                    break;
                }
            }
        }
    }

    state.registry.unregister_session(&identity, session_id).await;
    drop(session);
    if tokio::time::timeout(Duration::from_secs(1), writer).await.is_err() {
        debug!("Writer for {} did not drain in time", identity);
    }
}

/// Queue the `connected` acknowledgment, then make the session reachable.
///
/// Anything forwarded afterwards lands behind the acknowledgment.
async fn open_session(state: &AppState, identity: &str, tx: mpsc::Sender<Outgoing>) -> AgentSession {
    let session = AgentSession::new(identity, tx);

    match state.codec.encode(&Envelope::connected(identity)) {
        Ok(ack) => {
            if let Err(e) = session.send_text(ack) {
                warn!("Failed to acknowledge agent {}: {}", identity, e);
            }
        }
        Err(e) => warn!("Failed to encode acknowledgment for {}: {}", identity, e),
    }

    state.registry.register(session.clone()).await;
    session
}

async fn handle_agent_text(state: &AppState, session: &AgentSession, text: &str) {
    let identity = &session.identity;
    let envelope = match state.codec.decode(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("Dropping malformed envelope from {}: {}", identity, e);
            return;
        }
    };

    match &envelope.message {
        Message::Heartbeat { .. } => {
            debug!("Heartbeat from {}", identity);
        }
        Message::Status { .. } => {
            info!("Status report from {}", identity);
            state.monitors.broadcast(text);
        }
        Message::CommandResult { command_id, success, result } => {
            info!(
                "Command {} on {} finished: success={} result={}",
                command_id, identity, success, result
            );
            state
                .relay
                .ledger()
                .resolve(identity, *command_id, *success, result)
                .await;
            state.monitors.broadcast(text);
        }
        Message::QueryConfig { config_type, .. } => {
            let frequency = state.config_store.resolve_sync_frequency(identity).await;
            debug!(
                "Answering {} query from {} with syncFrequency={}",
                config_type, identity, frequency
            );
            let reply = state.codec.encode(&Envelope::config_response(frequency));
            match reply {
                Ok(reply) => {
                    if let Err(e) = session.send_text(reply) {
                        warn!("Failed to send config to {}: {}", identity, e);
                    }
                }
                Err(e) => warn!("Failed to encode config for {}: {}", identity, e),
            }
        }
        other if !other.is_agent_originated() => {
            warn!("Agent {} sent relay-only {} envelope", identity, other.kind());
        }
        other => {
            debug!("Ignoring {} envelope from {}", other.kind(), identity);
        }
    }
}

async fn handle_monitor_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let mut subscription = state.monitors.subscribe();
    info!("Monitor connected ({} total)", state.monitors.client_count());

    loop {
        tokio::select! {
            payload = subscription.receiver.recv() => match payload {
                Ok(payload) => {
                    if sink.send(WsMessage::Text(payload.into())).await.is_err() {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Monitor lagged, skipped {} payloads", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            }
        }
    }

    drop(subscription);
    info!("Monitor disconnected ({} remaining)", state.monitors.client_count());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_store::InMemoryConfigStore;

    fn state() -> AppState {
        AppState::new(Arc::new(InMemoryConfigStore::default()))
    }

    #[tokio::test]
    async fn test_forward_rejects_non_command() {
        let response = forward_command(
            Path("edge-01".to_string()),
            State(state()),
            r#"{"type":"heartbeat","agentId":"x","timestamp":1}"#.to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = forward_command(
            Path("edge-01".to_string()),
            State(state()),
            "garbage".to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_forward_not_found() {
        let response = forward_command(
            Path("edge-01".to_string()),
            State(state()),
            r#"{"type":"command","commandId":1,"commandType":"restart","commandContent":"","timestamp":1}"#
                .to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_forward_delivered() {
        let state = state();
        let (tx, mut rx) = mpsc::channel(OUTBOUND_QUEUE_SIZE);
        state.registry.register(AgentSession::new("edge-01", tx)).await;

        let response = forward_command(
            Path("edge-01".to_string()),
            State(state.clone()),
            r#"{"type":"command","commandType":"offline","timestamp":1}"#.to_string(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(matches!(rx.recv().await, Some(Outgoing::Text(_))));
    }

    #[tokio::test]
    async fn test_query_config_answered_from_store() {
        let store = Arc::new(InMemoryConfigStore::default());
        store.set("edge-01", 90).await;
        let state = AppState::new(store);
        let (tx, mut rx) = mpsc::channel(OUTBOUND_QUEUE_SIZE);
        let session = AgentSession::new("edge-01", tx);

        let query = EnvelopeCodec::new()
            .encode(&Envelope::query_config("edge-01"))
            .unwrap();
        handle_agent_text(&state, &session, &query).await;

        let Some(Outgoing::Text(reply)) = rx.recv().await else {
            panic!("Expected config response");
        };
        let envelope = EnvelopeCodec::new().decode(&reply).unwrap();
        assert_eq!(envelope.message, Message::ConfigResponse { sync_frequency: 90 });
    }

    #[tokio::test]
    async fn test_acknowledgment_precedes_forwarded_commands() {
        let state = state();
        let (tx, mut rx) = mpsc::channel(OUTBOUND_QUEUE_SIZE);

        let session = open_session(&state, "edge-01", tx).await;
        assert_eq!(
            state.registry.lookup("edge-01").await.unwrap().session_id,
            session.session_id
        );
        assert_eq!(
            state.relay.forward("edge-01", Some(1), "offline", "").await,
            ForwardOutcome::Delivered
        );

        let codec = EnvelopeCodec::new();
        let Some(Outgoing::Text(first)) = rx.recv().await else {
            panic!("Expected acknowledgment");
        };
        assert_eq!(
            codec.decode(&first).unwrap().message,
            Message::Connected { agent_id: "edge-01".to_string() }
        );
        let Some(Outgoing::Text(second)) = rx.recv().await else {
            panic!("Expected command");
        };
        assert_eq!(codec.decode(&second).unwrap().kind(), "command");
    }

    #[tokio::test]
    async fn test_command_result_resolves_ledger() {
        let state = state();
        let (tx, _rx) = mpsc::channel(OUTBOUND_QUEUE_SIZE);
        let session = open_session(&state, "edge-01", tx).await;
        state.relay.forward("edge-01", Some(12), "config", "{}").await;

        let report = EnvelopeCodec::new()
            .encode(&Envelope::command_result(12, true, "Sync frequency set to 60"))
            .unwrap();
        handle_agent_text(&state, &session, &report).await;

        let response = command_record(Path(12), State(state.clone())).await;
        assert_eq!(response.status(), StatusCode::OK);
        let command = state.relay.ledger().get(12).await.unwrap();
        assert_eq!(command.status, fleetlink_proto::CommandStatus::Completed);

        let response = command_record(Path(13), State(state)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_status_is_broadcast_to_monitors() {
        let state = state();
        let mut monitor = state.monitors.subscribe();
        let (tx, _rx) = mpsc::channel(OUTBOUND_QUEUE_SIZE);
        let session = AgentSession::new("edge-01", tx);

        let status = EnvelopeCodec::new()
            .encode(&Envelope::status("edge-01", serde_json::json!({"cpu": 1})))
            .unwrap();
        handle_agent_text(&state, &session, &status).await;
        handle_agent_text(&state, &session, "not json").await;

        assert_eq!(monitor.receiver.recv().await.unwrap(), status);
        assert!(monitor.receiver.try_recv().is_err());
    }
}
