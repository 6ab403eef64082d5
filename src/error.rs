//! Error taxonomy for the connector.
//!
//! Transient conditions (rate limiting, timeouts, connection resets, server
//! errors) are absorbed by the transport's retry policy and only surface after
//! the retry budget is exhausted, wrapped as [`ConnectorError::SyncFailed`] or
//! [`ConnectorError::ActionFailed`]. Structural and identity conditions
//! (authentication, missing users/groups, malformed configuration) surface
//! immediately and are never retried.

use crate::model::GroupOp;
use crate::sync::SyncCursor;
use thiserror::Error;

/// Errors that can occur in the connector.
#[derive(Error, Debug, Clone)]
pub enum ConnectorError {
    /// Bad or expired credential. Retrying cannot succeed.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Provider rate limit exceeded and the retry budget ran out.
    #[error("Rate limited: retry after {retry_after} seconds")]
    RateLimited { retry_after: u64 },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// A single inventory record that could not be normalized. Logged and
    /// skipped by the synchronizer; never aborts a page.
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Group not found: {0}")]
    GroupNotFound(String),

    /// The server kept returning pages past the per-cycle safety cap.
    #[error("Pagination overran the page budget after {pages} pages")]
    PaginationOverrun { pages: u32 },

    /// The server repeated a cursor instead of advancing or terminating.
    #[error("Pagination stalled: server repeated cursor {cursor:?}")]
    CursorStalled { cursor: String },

    /// A sync cycle aborted. Carries the last durably-committed cursor so the
    /// next scheduled run resumes instead of restarting from scratch.
    #[error("Sync aborted at {cursor:?}: {source}")]
    SyncFailed {
        cursor: SyncCursor,
        #[source]
        source: Box<ConnectorError>,
    },

    /// A group membership action failed after retries were exhausted.
    #[error("Action {operation} on group {group_id} for user {user_id} failed: {source}")]
    ActionFailed {
        user_id: String,
        group_id: String,
        operation: GroupOp,
        #[source]
        source: Box<ConnectorError>,
    },

    /// A risk push applied one half of the membership transition but not the
    /// other. Names the failed side so the caller retries only that half.
    #[error("Risk push for user {user_id} partially applied: {side} of group {group_id} failed: {source}")]
    PartialPush {
        user_id: String,
        side: GroupOp,
        group_id: String,
        #[source]
        source: Box<ConnectorError>,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ConnectorError {
    /// Whether this error belongs to the transient family that the transport
    /// retries. Anything else is structural and must surface to the caller.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ConnectorError::RateLimited { .. }
                | ConnectorError::Timeout(_)
                | ConnectorError::ConnectionFailed(_)
                | ConnectorError::RequestFailed(_)
        )
    }
}

/// Result type for connector operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ConnectorError::Timeout("t".into()).is_transient());
        assert!(ConnectorError::ConnectionFailed("c".into()).is_transient());
        assert!(ConnectorError::RateLimited { retry_after: 5 }.is_transient());
        assert!(!ConnectorError::Auth("denied".into()).is_transient());
        assert!(!ConnectorError::UserNotFound("42".into()).is_transient());
        assert!(!ConnectorError::GroupNotFound("G1".into()).is_transient());
    }

    #[test]
    fn test_partial_push_names_failed_side() {
        let err = ConnectorError::PartialPush {
            user_id: "42".into(),
            side: GroupOp::Add,
            group_id: "G-HIGH".into(),
            source: Box::new(ConnectorError::Timeout("deadline".into())),
        };
        let text = err.to_string();
        assert!(text.contains("add"));
        assert!(text.contains("G-HIGH"));
        assert!(text.contains("42"));
    }

    #[test]
    fn test_sync_failed_retains_cursor() {
        let cursor = SyncCursor {
            page_token: Some("tok-3".into()),
            watermark: None,
        };
        let err = ConnectorError::SyncFailed {
            cursor: cursor.clone(),
            source: Box::new(ConnectorError::RequestFailed("boom".into())),
        };
        match err {
            ConnectorError::SyncFailed { cursor: c, .. } => assert_eq!(c, cursor),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
