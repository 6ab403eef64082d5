//! Test harness for the connector.
//!
//! Provides a scripted [`Transport`] implementation, a collecting
//! [`ApplicationSink`], and builders for configs, mappings, and raw provider
//! payloads used across unit and integration tests.

use crate::config::ConnectorConfig;
use crate::error::{ConnectorError, ConnectorResult};
use crate::http::{ApiResponse, Method, Transport};
use crate::model::{Application, GroupRef};
use crate::risk::{RiskBand, RiskMapping};
use crate::sync::{ApplicationSink, SyncCursor};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;

/// Connector config pointing at a placeholder host, retries disabled.
pub fn test_config() -> ConnectorConfig {
    let mut config = ConnectorConfig::new("test", "https://provider.example.com", "test-token");
    config.max_retries = 0;
    config
}

/// Three-band mapping: low [0,40), medium [40,70), high [70,100].
pub fn test_mapping() -> RiskMapping {
    RiskMapping::new(vec![
        RiskBand {
            name: "low".into(),
            floor: 0.0,
            ceiling: 40.0,
            group: GroupRef::new("G-LOW", "Risk Low"),
        },
        RiskBand {
            name: "medium".into(),
            floor: 40.0,
            ceiling: 70.0,
            group: GroupRef::new("G-MED", "Risk Medium"),
        },
        RiskBand {
            name: "high".into(),
            floor: 70.0,
            ceiling: 100.0,
            group: GroupRef::new("G-HIGH", "Risk High"),
        },
    ])
    .expect("test mapping is contiguous")
}

/// Raw application payload in the provider's wire shape.
pub fn raw_app(id: &str, name: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "name": name,
        "label": name.to_lowercase().replace(' ', "-"),
        "status": "ACTIVE",
        "assignedGroups": [{"id": "G1", "name": "Everyone"}],
        "lastUpdated": "2024-03-01T10:00:00Z",
    })
}

/// List response envelope wrapping `items` with an optional next token.
pub fn page_of(items: Vec<serde_json::Value>, next: Option<&str>) -> serde_json::Value {
    serde_json::json!({ "items": items, "next": next })
}

/// Transport that answers from per-route queues of scripted responses.
///
/// Responses for a `(method, path)` route are consumed in order; every call is
/// recorded for assertions. An unscripted call fails loudly.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<String, VecDeque<ConnectorResult<serde_json::Value>>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

/// One observed transport call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn route_key(method: &Method, path: &str) -> String {
        format!("{} {}", method, path)
    }

    /// Queues the next response for `(method, path)`.
    pub async fn enqueue(
        &self,
        method: Method,
        path: &str,
        response: ConnectorResult<serde_json::Value>,
    ) {
        self.routes
            .lock()
            .await
            .entry(Self::route_key(&method, path))
            .or_default()
            .push_back(response);
    }

    /// All calls seen so far, rendered as "METHOD /path".
    pub async fn recorded_calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .await
            .iter()
            .map(|c| format!("{} {}", c.method, c.path))
            .collect()
    }

    /// Full call records including query parameters.
    pub async fn call_details(&self) -> Vec<RecordedCall> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        _body: Option<&serde_json::Value>,
    ) -> ConnectorResult<ApiResponse> {
        self.calls.lock().await.push(RecordedCall {
            method: method.clone(),
            path: path.to_string(),
            query: query.to_vec(),
        });

        let key = Self::route_key(&method, path);
        let next = self.routes.lock().await.get_mut(&key).and_then(|q| q.pop_front());
        match next {
            Some(Ok(body)) => Ok(ApiResponse { status: 200, body }),
            Some(Err(e)) => Err(e),
            None => Err(ConnectorError::RequestFailed(format!(
                "No scripted response for {}",
                key
            ))),
        }
    }
}

/// Sink that collects persisted pages and checkpoints in memory.
///
/// `fail_persist_on_page` injects a persist failure on the given 1-based page
/// number, for resumability tests.
#[derive(Default)]
pub struct CollectingSink {
    pub applications: Mutex<Vec<Application>>,
    pub checkpoints: Mutex<Vec<SyncCursor>>,
    fail_persist_on_page: Option<usize>,
    pages_seen: Mutex<usize>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on_page(page: usize) -> Self {
        Self {
            fail_persist_on_page: Some(page),
            ..Self::default()
        }
    }

    pub async fn application_ids(&self) -> Vec<String> {
        self.applications
            .lock()
            .await
            .iter()
            .map(|a| a.id.clone())
            .collect()
    }

    pub async fn last_checkpoint(&self) -> Option<SyncCursor> {
        self.checkpoints.lock().await.last().cloned()
    }
}

#[async_trait]
impl ApplicationSink for CollectingSink {
    async fn persist(&self, applications: &[Application]) -> ConnectorResult<()> {
        let mut pages = self.pages_seen.lock().await;
        *pages += 1;
        if self.fail_persist_on_page == Some(*pages) {
            return Err(ConnectorError::RequestFailed("storage unavailable".into()));
        }
        self.applications
            .lock()
            .await
            .extend(applications.iter().cloned());
        Ok(())
    }

    async fn checkpoint(&self, cursor: &SyncCursor) -> ConnectorResult<()> {
        self.checkpoints.lock().await.push(cursor.clone());
        Ok(())
    }
}
