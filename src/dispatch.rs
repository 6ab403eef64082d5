//! Idempotent group membership actions.
//!
//! Providers disagree on what a duplicate membership change does: some error,
//! some silently no-op. The dispatcher normalizes both to success — adding a
//! user already in a group or removing one not in it is a no-op ack, not an
//! error. Missing users or groups surface immediately as typed errors;
//! transient failures are absorbed by the transport's retry policy and only
//! surface here, after exhaustion, as `ActionFailed`.

use crate::error::{ConnectorError, ConnectorResult};
use crate::http::{group_path, membership_path, user_path, Method, Transport};
use crate::model::{Ack, ActionRequest, GroupOp};
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Applies membership actions against the provider.
pub struct GroupActionDispatcher<T: Transport> {
    transport: Arc<T>,
    /// Acks replayed by idempotency key within the retry window.
    acked: Cache<String, Ack>,
}

impl<T: Transport + 'static> GroupActionDispatcher<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            acked: Cache::builder()
                .time_to_live(Duration::from_secs(600))
                .max_capacity(10_000)
                .build(),
        }
    }

    /// Applies one membership action, idempotently.
    ///
    /// A request whose idempotency key already completed replays the original
    /// ack without touching the provider.
    #[instrument(skip(self, request), fields(user = %request.user_id, group = %request.group_id, op = %request.operation))]
    pub async fn apply(&self, request: ActionRequest) -> ConnectorResult<Ack> {
        if let Some(ack) = self.acked.get(&request.idempotency_key).await {
            debug!("Replaying ack for repeated idempotency key");
            return Ok(ack);
        }

        let ack = self.apply_once(&request).await?;
        self.acked
            .insert(request.idempotency_key.clone(), ack.clone())
            .await;
        Ok(ack)
    }

    async fn apply_once(&self, request: &ActionRequest) -> ConnectorResult<Ack> {
        let path = membership_path(&request.group_id, &request.user_id);
        let method = match request.operation {
            GroupOp::Add => Method::PUT,
            GroupOp::Remove => Method::DELETE,
        };

        match self.transport.send(method, &path, &[], None).await {
            Ok(_) => Ok(Ack::for_request(request, false)),
            Err(ConnectorError::Conflict(_)) if request.operation == GroupOp::Add => {
                // Already a member; normalize to success.
                Ok(Ack::for_request(request, true))
            }
            Err(ConnectorError::NotFound(_)) => self.classify_not_found(request).await,
            Err(e) if e.is_transient() => Err(ConnectorError::ActionFailed {
                user_id: request.user_id.clone(),
                group_id: request.group_id.clone(),
                operation: request.operation,
                source: Box::new(e),
            }),
            Err(e) => Err(e),
        }
    }

    /// A 404 from the membership endpoint is ambiguous: the group, the user,
    /// or just the membership may be missing. Probe the group and the user to
    /// decide which.
    async fn classify_not_found(&self, request: &ActionRequest) -> ConnectorResult<Ack> {
        if !self.exists(&group_path(&request.group_id)).await? {
            return Err(ConnectorError::GroupNotFound(request.group_id.clone()));
        }
        if !self.exists(&user_path(&request.user_id)).await? {
            return Err(ConnectorError::UserNotFound(request.user_id.clone()));
        }
        match request.operation {
            // Removing a membership that does not exist is the desired state.
            GroupOp::Remove => Ok(Ack::for_request(request, true)),
            GroupOp::Add => Err(ConnectorError::ActionFailed {
                user_id: request.user_id.clone(),
                group_id: request.group_id.clone(),
                operation: request.operation,
                source: Box::new(ConnectorError::InvalidResponse(
                    "Provider reported the membership missing on an add".into(),
                )),
            }),
        }
    }

    async fn exists(&self, path: &str) -> ConnectorResult<bool> {
        match self.transport.send(Method::GET, path, &[], None).await {
            Ok(_) => Ok(true),
            Err(ConnectorError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTransport;
    use serde_json::json;

    #[tokio::test]
    async fn test_add_applies_put() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .enqueue(Method::PUT, "/api/v1/groups/G1/users/42", Ok(json!(null)))
            .await;
        let dispatcher = GroupActionDispatcher::new(Arc::clone(&transport));

        let ack = dispatcher.apply(ActionRequest::add("42", "G1")).await.unwrap();
        assert!(!ack.no_op);
        assert_eq!(ack.operation, GroupOp::Add);
        assert_eq!(
            transport.recorded_calls().await,
            vec!["PUT /api/v1/groups/G1/users/42"]
        );
    }

    #[tokio::test]
    async fn test_repeated_idempotency_key_replays_ack() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .enqueue(Method::PUT, "/api/v1/groups/G1/users/42", Ok(json!(null)))
            .await;
        let dispatcher = GroupActionDispatcher::new(Arc::clone(&transport));

        let request = ActionRequest::add("42", "G1").with_key("key-1");
        let first = dispatcher.apply(request.clone()).await.unwrap();
        let second = dispatcher.apply(request).await.unwrap();
        assert_eq!(first.action_id, second.action_id);
        // Only one write reached the provider.
        assert_eq!(transport.recorded_calls().await.len(), 1);
    }

    #[tokio::test]
    async fn test_add_conflict_is_a_no_op_success() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .enqueue(
                Method::PUT,
                "/api/v1/groups/G1/users/42",
                Err(ConnectorError::Conflict("already a member".into())),
            )
            .await;
        let dispatcher = GroupActionDispatcher::new(Arc::clone(&transport));

        let ack = dispatcher.apply(ActionRequest::add("42", "G1")).await.unwrap();
        assert!(ack.no_op);
    }

    #[tokio::test]
    async fn test_remove_non_member_is_a_no_op_success() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .enqueue(
                Method::DELETE,
                "/api/v1/groups/G1/users/42",
                Err(ConnectorError::NotFound("no such membership".into())),
            )
            .await;
        // Both the group and the user exist, so only the membership was missing.
        transport
            .enqueue(Method::GET, "/api/v1/groups/G1", Ok(json!({"id": "G1"})))
            .await;
        transport
            .enqueue(Method::GET, "/api/v1/users/42", Ok(json!({"id": "42"})))
            .await;
        let dispatcher = GroupActionDispatcher::new(Arc::clone(&transport));

        let ack = dispatcher
            .apply(ActionRequest::remove("42", "G1"))
            .await
            .unwrap();
        assert!(ack.no_op);
    }

    #[tokio::test]
    async fn test_missing_group_surfaces_group_not_found() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .enqueue(
                Method::PUT,
                "/api/v1/groups/GX/users/42",
                Err(ConnectorError::NotFound("not found".into())),
            )
            .await;
        transport
            .enqueue(
                Method::GET,
                "/api/v1/groups/GX",
                Err(ConnectorError::NotFound("not found".into())),
            )
            .await;
        let dispatcher = GroupActionDispatcher::new(Arc::clone(&transport));

        let err = dispatcher
            .apply(ActionRequest::add("42", "GX"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::GroupNotFound(g) if g == "GX"));
    }

    #[tokio::test]
    async fn test_missing_user_surfaces_user_not_found() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .enqueue(
                Method::DELETE,
                "/api/v1/groups/G1/users/ghost",
                Err(ConnectorError::NotFound("not found".into())),
            )
            .await;
        transport
            .enqueue(Method::GET, "/api/v1/groups/G1", Ok(json!({"id": "G1"})))
            .await;
        transport
            .enqueue(
                Method::GET,
                "/api/v1/users/ghost",
                Err(ConnectorError::NotFound("not found".into())),
            )
            .await;
        let dispatcher = GroupActionDispatcher::new(Arc::clone(&transport));

        let err = dispatcher
            .apply(ActionRequest::remove("ghost", "G1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::UserNotFound(u) if u == "ghost"));
    }

    #[tokio::test]
    async fn test_transient_exhaustion_wraps_as_action_failed() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .enqueue(
                Method::PUT,
                "/api/v1/groups/G1/users/42",
                Err(ConnectorError::Timeout("deadline exceeded".into())),
            )
            .await;
        let dispatcher = GroupActionDispatcher::new(Arc::clone(&transport));

        let err = dispatcher
            .apply(ActionRequest::add("42", "G1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::ActionFailed { .. }));
    }

    #[tokio::test]
    async fn test_failed_action_is_not_cached() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .enqueue(
                Method::PUT,
                "/api/v1/groups/G1/users/42",
                Err(ConnectorError::Timeout("deadline exceeded".into())),
            )
            .await;
        transport
            .enqueue(Method::PUT, "/api/v1/groups/G1/users/42", Ok(json!(null)))
            .await;
        let dispatcher = GroupActionDispatcher::new(Arc::clone(&transport));

        let request = ActionRequest::add("42", "G1").with_key("key-retry");
        assert!(dispatcher.apply(request.clone()).await.is_err());
        // The retry with the same key reaches the provider and succeeds.
        let ack = dispatcher.apply(request).await.unwrap();
        assert!(!ack.no_op);
        assert_eq!(transport.recorded_calls().await.len(), 2);
    }
}
