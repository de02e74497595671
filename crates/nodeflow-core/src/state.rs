use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

/// Run-wide key/value bag shared by every executor of one run.
///
/// Clones share the same map. Access is guarded, but concurrent parallel
/// branches still race at the application level: the last write wins.
#[derive(Debug, Clone, Default)]
pub struct SharedState {
    inner: Arc<RwLock<HashMap<String, serde_json::Value>>>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a bag pre-populated with initial values.
    pub fn from_map(data: HashMap<String, serde_json::Value>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(data)),
        }
    }

    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.inner.read().await.get(key).cloned()
    }

    /// Get a value as a string. Non-string values are rendered as JSON.
    pub async fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).await.map(|v| match v {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        })
    }

    /// Set a value, returning the previous one.
    pub async fn set(
        &self,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Option<serde_json::Value> {
        self.inner.write().await.insert(key.into(), value)
    }

    pub async fn remove(&self, key: &str) -> Option<serde_json::Value> {
        self.inner.write().await.remove(key)
    }

    pub async fn snapshot(&self) -> HashMap<String, serde_json::Value> {
        self.inner.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_clones_share_data() {
        let state = SharedState::new();
        let other = state.clone();
        state.set("count", serde_json::json!(1)).await;

        assert_eq!(other.get("count").await, Some(serde_json::json!(1)));
        assert_eq!(other.get_string("count").await.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let state = SharedState::from_map(HashMap::from([(
            "k".to_string(),
            serde_json::json!("first"),
        )]));
        let prev = state.set("k", serde_json::json!("second")).await;

        assert_eq!(prev, Some(serde_json::json!("first")));
        assert_eq!(state.get_string("k").await.as_deref(), Some("second"));
        assert_eq!(state.remove("k").await, Some(serde_json::json!("second")));
        assert!(state.snapshot().await.is_empty());
    }
}
