//! # riskgate
//!
//! Connector between an identity-provider platform and a risk-exchange
//! system. It syncs the provider's application inventory, applies idempotent
//! group membership actions, and pushes externally computed risk scores into
//! the provider as risk-tier group memberships so policy engines there can
//! react to risk signals.
//!
//! The host framework owns scheduling, credential supply, record storage, and
//! checkpoint persistence; this crate owns everything between that contract
//! and the provider's REST API: rate-limited authenticated transport, cursor
//! pagination, record normalization, and idempotent write dispatch.

pub mod config;
pub mod connector;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod model;
pub mod pagination;
pub mod risk;
pub mod secret;
pub mod sync;
pub mod testing;

pub use config::{ConnectorConfig, RateLimitConfig};
pub use connector::Connector;
pub use dispatch::GroupActionDispatcher;
pub use error::{ConnectorError, ConnectorResult};
pub use http::{ApiResponse, HttpTransport, Method, Transport};
pub use model::{Ack, ActionRequest, Application, ApplicationStatus, GroupOp, GroupRef};
pub use pagination::{PageEnvelope, PageWalker};
pub use risk::{PushReceipt, RiskBand, RiskMapping, RiskScoreEvent, RiskScorePusher};
pub use secret::Secret;
pub use sync::{ApplicationSink, InventorySynchronizer, SyncCursor, SyncReport};
