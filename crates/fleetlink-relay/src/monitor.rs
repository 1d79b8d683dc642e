//! Fan-out of agent reports to monitor clients

use fleetlink_proto::monotonic_millis;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

const MONITOR_BUFFER: usize = 256;

/// Device event pushed by the control plane to every monitor
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEvent {
    /// `device_status_change`, `device_heartbeat` or `device_offline`
    #[serde(rename = "type")]
    pub kind: String,
    /// Control-plane device id
    pub device_id: Option<i64>,
    /// Address the device reported from
    pub ip_address: String,
    /// New status label
    pub status: String,
    /// Opaque detail attached by the control plane
    pub payload: Option<Value>,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
}

impl DeviceEvent {
    fn new(
        kind: &str,
        device_id: Option<i64>,
        ip_address: impl Into<String>,
        status: impl Into<String>,
        payload: Option<Value>,
    ) -> Self {
        Self {
            kind: kind.to_string(),
            device_id,
            ip_address: ip_address.into(),
            status: status.into(),
            payload,
            timestamp: monotonic_millis(),
        }
    }

    /// A device changed status
    pub fn status_change(
        device_id: Option<i64>,
        ip_address: impl Into<String>,
        status: impl Into<String>,
        payload: Option<Value>,
    ) -> Self {
        Self::new("device_status_change", device_id, ip_address, status, payload)
    }

    /// A device is alive
    pub fn heartbeat(device_id: i64, ip_address: impl Into<String>) -> Self {
        Self::new("device_heartbeat", Some(device_id), ip_address, "online", None)
    }

    /// A device went offline
    pub fn offline(device_id: i64, ip_address: impl Into<String>) -> Self {
        Self::new("device_offline", Some(device_id), ip_address, "offline", None)
    }
}

/// Broadcasts raw `status` and `command_result` payloads to monitors
#[derive(Debug, Clone)]
pub struct MonitorHub {
    sender: broadcast::Sender<String>,
    clients: Arc<AtomicUsize>,
}

impl Default for MonitorHub {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorHub {
    /// Create a hub with no subscribers
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(MONITOR_BUFFER);
        Self {
            sender,
            clients: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Send a payload to every connected monitor; returns receiver count
    pub fn broadcast(&self, payload: &str) -> usize {
        match self.sender.send(payload.to_string()) {
            Ok(n) => n,
            Err(_) => {
                debug!("No monitors connected, dropping payload");
                0
            }
        }
    }

    /// Serialize a device event and broadcast it; returns receiver count
    pub fn push(&self, event: &DeviceEvent) -> usize {
        match serde_json::to_string(event) {
            Ok(payload) => {
                debug!("Pushing {} for {}", event.kind, event.ip_address);
                self.broadcast(&payload)
            }
            Err(e) => {
                warn!("Failed to encode {} event: {}", event.kind, e);
                0
            }
        }
    }

    /// Attach a monitor; the guard keeps it counted until dropped
    pub fn subscribe(&self) -> MonitorSubscription {
        self.clients.fetch_add(1, Ordering::SeqCst);
        MonitorSubscription {
            receiver: self.sender.subscribe(),
            clients: self.clients.clone(),
        }
    }

    /// Number of connected monitors
    pub fn client_count(&self) -> usize {
        self.clients.load(Ordering::SeqCst)
    }
}

/// A monitor's receiver, counted while alive
#[derive(Debug)]
pub struct MonitorSubscription {
    /// Broadcast payloads
    pub receiver: broadcast::Receiver<String>,
    clients: Arc<AtomicUsize>,
}

impl Drop for MonitorSubscription {
    fn drop(&mut self) {
        self.clients.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_reaches_subscribers() {
        let hub = MonitorHub::new();
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        assert_eq!(hub.client_count(), 2);
        assert_eq!(hub.broadcast(r#"{"type":"status"}"#), 2);
        assert_eq!(a.receiver.recv().await.unwrap(), r#"{"type":"status"}"#);
        assert_eq!(b.receiver.recv().await.unwrap(), r#"{"type":"status"}"#);

        drop(a);
        assert_eq!(hub.client_count(), 1);
    }

    #[tokio::test]
    async fn test_push_device_event() {
        let hub = MonitorHub::new();
        let mut monitor = hub.subscribe();

        assert_eq!(hub.push(&DeviceEvent::offline(7, "10.0.0.7")), 1);

        let value: Value = serde_json::from_str(&monitor.receiver.recv().await.unwrap()).unwrap();
        assert_eq!(value["type"], "device_offline");
        assert_eq!(value["deviceId"], 7);
        assert_eq!(value["ipAddress"], "10.0.0.7");
        assert_eq!(value["status"], "offline");
        assert!(value["payload"].is_null());
        assert!(value["timestamp"].as_u64().unwrap() > 0);
    }

    #[test]
    fn test_broadcast_without_monitors() {
        let hub = MonitorHub::new();
        assert_eq!(hub.broadcast("x"), 0);
        assert_eq!(hub.client_count(), 0);
    }
}
