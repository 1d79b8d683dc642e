//! Durable configuration boundary used to answer `query_config`

use async_trait::async_trait;
use fleetlink_proto::ConfigSnapshot;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Source of per-agent configuration
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Stored heartbeat interval in seconds for `identity`, if any
    async fn sync_frequency(&self, identity: &str) -> Option<i64>;

    /// Interval returned to agents with no stored value
    fn default_sync_frequency(&self) -> i64 {
        ConfigSnapshot::DEFAULT_SYNC_FREQUENCY as i64
    }

    /// Stored interval or the default
    async fn resolve_sync_frequency(&self, identity: &str) -> i64 {
        self.sync_frequency(identity)
            .await
            .unwrap_or_else(|| self.default_sync_frequency())
    }
}

/// In-process config store
#[derive(Debug)]
pub struct InMemoryConfigStore {
    default_frequency: i64,
    frequencies: RwLock<HashMap<String, i64>>,
}

impl Default for InMemoryConfigStore {
    fn default() -> Self {
        Self::new(ConfigSnapshot::DEFAULT_SYNC_FREQUENCY as i64)
    }
}

impl InMemoryConfigStore {
    /// Create a store answering `default_frequency` for unknown agents
    pub fn new(default_frequency: i64) -> Self {
        Self {
            default_frequency,
            frequencies: RwLock::new(HashMap::new()),
        }
    }

    /// Store an interval for `identity`
    pub async fn set(&self, identity: impl Into<String>, seconds: i64) {
        self.frequencies.write().await.insert(identity.into(), seconds);
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn sync_frequency(&self, identity: &str) -> Option<i64> {
        self.frequencies.read().await.get(identity).copied()
    }

    fn default_sync_frequency(&self) -> i64 {
        self.default_frequency
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_for_unknown_agent() {
        let store = InMemoryConfigStore::default();
        assert_eq!(store.sync_frequency("edge-01").await, None);
        assert_eq!(store.resolve_sync_frequency("edge-01").await, 30);
    }

    #[tokio::test]
    async fn test_stored_value_wins() {
        let store = InMemoryConfigStore::new(45);
        store.set("edge-01", 10).await;

        assert_eq!(store.resolve_sync_frequency("edge-01").await, 10);
        assert_eq!(store.resolve_sync_frequency("edge-02").await, 45);
    }
}
