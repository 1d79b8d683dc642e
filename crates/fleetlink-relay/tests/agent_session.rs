//! End-to-end tests: a real relay server and real agent connectors

use axum::body::Body;
use axum::http::{Request, StatusCode};
use fleetlink_agent::{
    Agent, AgentBuilder, AgentSettings, ConnectionState, ProcessControl, SessionControl,
};
use fleetlink_relay::{serve_listener, AppState, ForwardOutcome, InMemoryConfigStore};
use futures_util::StreamExt;
use http_body_util::BodyExt;
use serde_json::Value;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

#[derive(Default)]
struct RecordingProcess {
    spawned: Mutex<Vec<Vec<String>>>,
    exits: Mutex<Vec<i32>>,
}

impl ProcessControl for RecordingProcess {
    fn current_exe(&self) -> io::Result<PathBuf> {
        Ok(PathBuf::from("/usr/local/bin/fleetlink-agent"))
    }

    fn spawn(&self, _exe: &Path, args: &[String]) -> io::Result<()> {
        self.spawned.lock().unwrap().push(args.to_vec());
        Ok(())
    }

    fn exit(&self, code: i32) {
        self.exits.lock().unwrap().push(code);
    }
}

struct Relay {
    base_url: String,
    state: AppState,
    shutdown: CancellationToken,
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn start_relay() -> Relay {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let store = Arc::new(InMemoryConfigStore::new(30));
    store.set("edge-01", 20).await;
    let state = AppState::new(store);
    let shutdown = CancellationToken::new();

    tokio::spawn(serve_listener(listener, state.clone(), shutdown.clone()));

    Relay {
        base_url: format!("http://{}", addr),
        state,
        shutdown,
    }
}

async fn start_agent(relay: &Relay, identity: &str, process: Arc<RecordingProcess>) -> Agent {
    let settings = AgentSettings::new(identity, relay.base_url.clone())
        .with_retries(3, Duration::from_millis(100))
        .with_config_query_delay(Duration::from_millis(50))
        .with_shutdown_timing(Duration::from_millis(300), Duration::from_millis(10));

    let agent = AgentBuilder::new(settings)
        .with_process(process)
        .with_boot_args(vec!["--name".to_string(), identity.to_string()])
        .build()
        .await
        .unwrap();

    let _session = agent.connector.connect().unwrap();
    let mut state = agent.connector.watch_state();
    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == ConnectionState::Connected),
    )
    .await
    .expect("agent did not connect")
    .unwrap();
    agent
}

async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("Condition not met: {}", what);
}

async fn get_json(state: &AppState, uri: &str) -> Value {
    let response = fleetlink_relay::router(state.clone())
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn post(state: &AppState, uri: &str, body: &str) -> (StatusCode, String) {
    let response = fleetlink_relay::router(state.clone())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

#[tokio::test]
async fn test_restart_takes_agent_offline() {
    let relay = start_relay().await;
    let process = Arc::new(RecordingProcess::default());
    let agent = start_agent(&relay, "edge-01", process.clone()).await;
    let registry = relay.state.registry.clone();

    assert!(registry.is_online("edge-01").await);

    let config = agent.config.clone();
    eventually("stored config applied", || {
        let config = config.clone();
        async move { config.sync_frequency() == 20 }
    })
    .await;

    let outcome = relay
        .state
        .relay
        .forward("edge-01", Some(7), "restart", "")
        .await;
    assert_eq!(outcome, ForwardOutcome::Delivered);

    let r = registry.clone();
    eventually("agent offline", || {
        let r = r.clone();
        async move { !r.is_online("edge-01").await }
    })
    .await;

    let p = process.clone();
    eventually("process replaced", || {
        let p = p.clone();
        async move { !p.exits.lock().unwrap().is_empty() }
    })
    .await;

    assert_eq!(*process.exits.lock().unwrap(), vec![0]);
    assert_eq!(
        *process.spawned.lock().unwrap(),
        vec![vec!["--name".to_string(), "edge-01".to_string()]]
    );

    let connector = agent.connector.clone();
    eventually("agent disconnected", || {
        let connector = connector.clone();
        async move { connector.state() == ConnectionState::Disconnected }
    })
    .await;
}

#[tokio::test]
async fn test_http_surface() {
    let relay = start_relay().await;
    let agent = start_agent(&relay, "edge-02", Arc::new(RecordingProcess::default())).await;

    let status = get_json(&relay.state, "/agent/edge-02/status").await;
    assert_eq!(status["agentId"], "edge-02");
    assert_eq!(status["online"], true);

    let status = get_json(&relay.state, "/agent/ghost/status").await;
    assert_eq!(status["online"], false);

    let online = get_json(&relay.state, "/agents/online").await;
    assert_eq!(online["agents"], serde_json::json!(["edge-02"]));
    assert_eq!(online["count"], 1);

    let connections = get_json(&relay.state, "/connections").await;
    assert_eq!(connections["agents"], 1);
    assert_eq!(connections["clients"], 0);

    let command = r#"{"type":"command","commandId":11,"commandType":"CONFIG","commandContent":"{\"syncFrequency\":60}","timestamp":1700000000000}"#;

    let (code, body) = post(&relay.state, "/command/forward/ghost", command).await;
    assert_eq!(code, StatusCode::NOT_FOUND);
    assert_eq!(body, "Agent not found or offline: ghost");

    let (code, body) = post(&relay.state, "/command/forward/edge-02", command).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body, "Command forwarded to agent: edge-02");

    let config = agent.config.clone();
    eventually("config command applied", || {
        let config = config.clone();
        async move { config.sync_frequency() == 60 }
    })
    .await;

    let (code, _) = post(&relay.state, "/command/forward/edge-02", r#"{"type":"ping"}"#).await;
    assert_eq!(code, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_monitor_receives_command_results() {
    let relay = start_relay().await;
    let _agent = start_agent(&relay, "edge-03", Arc::new(RecordingProcess::default())).await;

    let monitor_url = format!("{}/ws/monitor", relay.base_url.replacen("http", "ws", 1));
    let (mut monitor, _) = connect_async(monitor_url).await.unwrap();

    let monitors = relay.state.monitors.clone();
    eventually("monitor registered", || {
        let monitors = monitors.clone();
        async move { monitors.client_count() == 1 }
    })
    .await;

    let outcome = relay
        .state
        .relay
        .forward("edge-03", Some(5), "reboot", "")
        .await;
    assert_eq!(outcome, ForwardOutcome::Delivered);

    let frame = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match monitor.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    let value: Value = serde_json::from_str(&text).unwrap();
                    if value["type"] == "command_result" {
                        return value;
                    }
                }
                Some(Ok(_)) => {}
                other => panic!("Monitor stream ended: {:?}", other),
            }
        }
    })
    .await
    .expect("no command result broadcast");

    assert_eq!(frame["commandId"], 5);
    assert_eq!(frame["success"], false);
    assert_eq!(frame["result"], "Unknown command type: reboot");

    drop(monitor);
    eventually("monitor removed", || {
        let monitors = monitors.clone();
        async move { monitors.client_count() == 0 }
    })
    .await;
}

#[tokio::test]
async fn test_reconnect_under_same_identity_replaces_session() {
    let relay = start_relay().await;
    let first = start_agent(&relay, "edge-04", Arc::new(RecordingProcess::default())).await;
    let second = start_agent(&relay, "edge-04", Arc::new(RecordingProcess::default())).await;

    let connector = first.connector.clone();
    eventually("superseded agent disconnected", || {
        let connector = connector.clone();
        async move { connector.state() == ConnectionState::Disconnected }
    })
    .await;

    assert!(relay.state.registry.is_online("edge-04").await);
    assert_eq!(relay.state.registry.count().await, 1);
    assert!(second.connector.is_connected());
}

#[tokio::test]
async fn test_control_plane_pushes_reach_monitors() {
    let relay = start_relay().await;
    let mut monitor = relay.state.monitors.subscribe();

    let (code, body) = post(
        &relay.state,
        "/push/device-status",
        r#"{"deviceId":9,"ipAddress":"10.0.0.9","status":"degraded","payload":{"disk":97}}"#,
    )
    .await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body, "Message pushed");

    let (code, body) = post(&relay.state, "/push/heartbeat?deviceId=9&ipAddress=10.0.0.9", "").await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body, "Heartbeat pushed");

    let (code, body) = post(
        &relay.state,
        "/push/device-offline?deviceId=9&ipAddress=10.0.0.9",
        "",
    )
    .await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body, "Offline message pushed");

    let mut events = Vec::new();
    for _ in 0..3 {
        let payload = monitor.receiver.recv().await.unwrap();
        events.push(serde_json::from_str::<Value>(&payload).unwrap());
    }

    assert_eq!(events[0]["type"], "device_status_change");
    assert_eq!(events[0]["status"], "degraded");
    assert_eq!(events[0]["payload"]["disk"], 97);
    assert_eq!(events[1]["type"], "device_heartbeat");
    assert_eq!(events[1]["status"], "online");
    assert_eq!(events[2]["type"], "device_offline");
    assert_eq!(events[2]["status"], "offline");
    for event in &events {
        assert_eq!(event["deviceId"], 9);
        assert_eq!(event["ipAddress"], "10.0.0.9");
    }

    let (code, _) = post(&relay.state, "/push/heartbeat?ipAddress=10.0.0.9", "").await;
    assert_eq!(code, StatusCode::BAD_REQUEST);
}
