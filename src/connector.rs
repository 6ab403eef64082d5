//! Host-facing connector surface.
//!
//! The host framework constructs a [`Connector`] from immutable configuration
//! and drives it on its own schedule: inventory sync on a polling interval,
//! risk pushes as score events arrive. The connector runs no background
//! scheduler of its own.

use crate::config::ConnectorConfig;
use crate::dispatch::GroupActionDispatcher;
use crate::error::{ConnectorError, ConnectorResult};
use crate::http::{HttpTransport, Method, Transport, APPS_PATH};
use crate::model::{Ack, ActionRequest};
use crate::risk::{PushReceipt, RiskMapping, RiskScoreEvent, RiskScorePusher};
use crate::sync::{ApplicationSink, InventorySynchronizer, SyncCursor, SyncReport};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// Identity-provider connector for a risk-exchange platform.
pub struct Connector<T: Transport = HttpTransport> {
    name: String,
    transport: Arc<T>,
    synchronizer: InventorySynchronizer<T>,
    dispatcher: Arc<GroupActionDispatcher<T>>,
    pusher: RiskScorePusher<T>,
}

impl Connector<HttpTransport> {
    /// Builds a connector over the real HTTP transport.
    pub fn new(config: ConnectorConfig, mapping: RiskMapping) -> ConnectorResult<Self> {
        config.validate()?;
        let transport = Arc::new(HttpTransport::new(config.clone())?);
        info!(name = %config.name, base_url = %config.base_url, "Connector initialized");
        Ok(Self::with_transport(transport, &config, mapping))
    }
}

impl<T: Transport + 'static> Connector<T> {
    /// Builds a connector over an injected transport.
    pub fn with_transport(transport: Arc<T>, config: &ConnectorConfig, mapping: RiskMapping) -> Self {
        let dispatcher = Arc::new(GroupActionDispatcher::new(Arc::clone(&transport)));
        Self {
            name: config.name.clone(),
            synchronizer: InventorySynchronizer::new(
                Arc::clone(&transport),
                config.page_size,
                config.max_pages_per_cycle,
            ),
            pusher: RiskScorePusher::new(mapping, Arc::clone(&dispatcher)),
            dispatcher,
            transport,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs one inventory sync cycle from `previous`, streaming normalized
    /// applications into the host's sink.
    #[instrument(skip(self, sink, cancel), fields(connector = %self.name))]
    pub async fn sync(
        &self,
        previous: SyncCursor,
        sink: &dyn ApplicationSink,
        cancel: &CancellationToken,
    ) -> ConnectorResult<SyncReport> {
        self.synchronizer.sync(previous, sink, cancel).await
    }

    /// Adds a user to a group, idempotently.
    #[instrument(skip(self), fields(connector = %self.name))]
    pub async fn add_to_group(&self, user_id: &str, group_id: &str) -> ConnectorResult<Ack> {
        self.dispatcher
            .apply(ActionRequest::add(user_id, group_id))
            .await
    }

    /// Removes a user from a group, idempotently.
    #[instrument(skip(self), fields(connector = %self.name))]
    pub async fn remove_from_group(&self, user_id: &str, group_id: &str) -> ConnectorResult<Ack> {
        self.dispatcher
            .apply(ActionRequest::remove(user_id, group_id))
            .await
    }

    /// Pushes a risk score for a user, transitioning their risk-tier group
    /// membership.
    pub async fn push_risk_score(&self, user_id: &str, score: f64) -> ConnectorResult<PushReceipt> {
        self.pusher.push(user_id, score).await
    }

    /// Drains the host's risk-score event channel until it closes or `cancel`
    /// fires. Returns the number of events processed.
    pub async fn process_events(
        &self,
        events: &mut mpsc::Receiver<RiskScoreEvent>,
        cancel: &CancellationToken,
    ) -> usize {
        self.pusher.run(events, cancel).await
    }

    /// Cheap authenticated probe used by host-side configuration validation.
    /// `Ok(false)` means the endpoint answered but rejected the credential.
    pub async fn test_connection(&self) -> ConnectorResult<bool> {
        let query = [("limit".to_string(), "1".to_string())];
        match self.transport.send(Method::GET, APPS_PATH, &query, None).await {
            Ok(_) => Ok(true),
            Err(ConnectorError::Auth(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_config, test_mapping, ScriptedTransport};
    use serde_json::json;

    fn connector(transport: Arc<ScriptedTransport>) -> Connector<ScriptedTransport> {
        Connector::with_transport(transport, &test_config(), test_mapping())
    }

    #[tokio::test]
    async fn test_connection_ok() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .enqueue(Method::GET, APPS_PATH, Ok(json!({"items": [], "next": null})))
            .await;
        assert!(connector(Arc::clone(&transport))
            .test_connection()
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_connection_reports_bad_credential() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .enqueue(
                Method::GET,
                APPS_PATH,
                Err(ConnectorError::Auth("Unauthorized".into())),
            )
            .await;
        assert!(!connector(Arc::clone(&transport))
            .test_connection()
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_connection_propagates_transport_failures() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .enqueue(
                Method::GET,
                APPS_PATH,
                Err(ConnectorError::ConnectionFailed("refused".into())),
            )
            .await;
        assert!(connector(Arc::clone(&transport))
            .test_connection()
            .await
            .is_err());
    }
}
