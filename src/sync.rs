//! Application inventory synchronization.
//!
//! One sync cycle drives the pagination walker over the application list
//! endpoint, normalizes each raw record, and streams pages to the host's
//! storage sink. The cursor advances only after a page is durably processed
//! (persisted and checkpointed), so an aborted cycle resumes from the last
//! committed page. At-least-once page redelivery is expected; records are
//! keyed by id downstream, so re-ingestion overwrites.

use crate::error::{ConnectorError, ConnectorResult};
use crate::http::{Method, Transport, APPS_PATH};
use crate::model::{Application, ApplicationStatus, GroupRef};
use crate::pagination::{PageEnvelope, PageWalker};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Resumable sync checkpoint: the opaque page token plus a logical watermark.
///
/// Owned by the synchronizer; mutated only after a page has been durably
/// processed by the sink.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncCursor {
    /// Token of the next page to fetch; `None` means start (or, at the end of
    /// a completed cycle, that the provider reported no further pages).
    pub page_token: Option<String>,
    /// Highest `last_modified` observed across committed pages.
    pub watermark: Option<DateTime<Utc>>,
}

/// Outcome of one sync cycle.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    /// The cursor to persist for the next cycle.
    pub cursor: SyncCursor,
    /// Applications emitted to the sink.
    pub emitted: usize,
    /// Records skipped as malformed.
    pub skipped: usize,
    /// Pages committed.
    pub pages: u32,
    /// False when the cycle stopped at a cancellation point before reaching
    /// the terminal page.
    pub completed: bool,
}

/// Host-provided storage for normalized applications.
///
/// `persist` receives one page at a time so storage can begin before the
/// cycle completes; `checkpoint` is called after each page is persisted and
/// must make the cursor durable before returning.
#[async_trait]
pub trait ApplicationSink: Send + Sync {
    async fn persist(&self, applications: &[Application]) -> ConnectorResult<()>;
    async fn checkpoint(&self, cursor: &SyncCursor) -> ConnectorResult<()>;
}

/// Fetches and normalizes the provider's application inventory.
pub struct InventorySynchronizer<T: Transport> {
    transport: Arc<T>,
    page_size: u32,
    max_pages: u32,
}

impl<T: Transport + 'static> InventorySynchronizer<T> {
    pub fn new(transport: Arc<T>, page_size: u32, max_pages: u32) -> Self {
        Self {
            transport,
            page_size,
            max_pages,
        }
    }

    /// Runs one sync cycle from `previous`, streaming pages into `sink`.
    ///
    /// Cancellation is observed between pages only; a cancelled cycle returns
    /// `Ok` with `completed = false` and the last committed cursor. Any
    /// unrecoverable failure aborts with [`ConnectorError::SyncFailed`]
    /// carrying that same cursor, so the next run resumes rather than
    /// restarts.
    pub async fn sync(
        &self,
        previous: SyncCursor,
        sink: &dyn ApplicationSink,
        cancel: &CancellationToken,
    ) -> ConnectorResult<SyncReport> {
        let transport = Arc::clone(&self.transport);
        let page_size = self.page_size;
        let mut walker = PageWalker::new(previous.page_token.clone(), self.max_pages, move |token| {
            let transport = Arc::clone(&transport);
            async move {
                let mut query = vec![("limit".to_string(), page_size.to_string())];
                if let Some(token) = token {
                    query.push(("after".to_string(), token));
                }
                let response = transport.send(Method::GET, APPS_PATH, &query, None).await?;
                response.json::<PageEnvelope<RawApplication>>()
            }
        });

        let mut committed = previous;
        let mut emitted = 0usize;
        let mut skipped = 0usize;
        let mut pages = 0u32;

        loop {
            if cancel.is_cancelled() {
                info!(pages, emitted, "Sync cancelled between pages");
                return Ok(SyncReport {
                    cursor: committed,
                    emitted,
                    skipped,
                    pages,
                    completed: false,
                });
            }

            let Some(result) = walker.next_page().await else {
                break;
            };
            let envelope = match result {
                Ok(envelope) => envelope,
                Err(e) => {
                    return Err(ConnectorError::SyncFailed {
                        cursor: committed,
                        source: Box::new(e),
                    })
                }
            };

            let PageEnvelope { items, next } = envelope;
            let mut applications = Vec::with_capacity(items.len());
            let mut watermark = committed.watermark;
            for raw in items {
                match normalize(raw) {
                    Ok(app) => {
                        if app.last_modified > watermark {
                            watermark = app.last_modified;
                        }
                        applications.push(app);
                    }
                    Err(e) => {
                        warn!(error = %e, "Skipping malformed inventory record");
                        skipped += 1;
                    }
                }
            }

            let next_cursor = SyncCursor {
                page_token: next,
                watermark,
            };
            if let Err(e) = sink.persist(&applications).await {
                return Err(ConnectorError::SyncFailed {
                    cursor: committed,
                    source: Box::new(e),
                });
            }
            if let Err(e) = sink.checkpoint(&next_cursor).await {
                return Err(ConnectorError::SyncFailed {
                    cursor: committed,
                    source: Box::new(e),
                });
            }

            emitted += applications.len();
            pages += 1;
            committed = next_cursor;
            debug!(pages, emitted, "Committed inventory page");
        }

        info!(pages, emitted, skipped, "Sync cycle completed");
        Ok(SyncReport {
            cursor: committed,
            emitted,
            skipped,
            pages,
            completed: true,
        })
    }
}

/// Raw application record as the provider returns it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawApplication {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    assigned_groups: Vec<RawGroupRef>,
    #[serde(default)]
    last_updated: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawGroupRef {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

/// Maps a raw record to the canonical shape. Missing optional fields default;
/// a record with no id cannot be keyed and is rejected.
fn normalize(raw: RawApplication) -> ConnectorResult<Application> {
    let id = match raw.id {
        Some(id) if !id.is_empty() => id,
        _ => {
            return Err(ConnectorError::MalformedRecord(format!(
                "application record missing id (name: {:?})",
                raw.name
            )))
        }
    };
    let label = raw.label.unwrap_or_default();
    let name = raw
        .name
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| if label.is_empty() { id.clone() } else { label.clone() });
    let assigned_groups = raw
        .assigned_groups
        .into_iter()
        .filter_map(|g| {
            g.id.filter(|id| !id.is_empty())
                .map(|id| GroupRef::new(id, g.name.unwrap_or_default()))
        })
        .collect();
    let last_modified = raw
        .last_updated
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    Ok(Application {
        id,
        name,
        label,
        status: ApplicationStatus::parse(raw.status.as_deref()),
        assigned_groups,
        last_modified,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(id: Option<&str>) -> RawApplication {
        RawApplication {
            id: id.map(String::from),
            name: Some("HR Portal".into()),
            label: Some("hr-portal".into()),
            status: Some("ACTIVE".into()),
            assigned_groups: vec![RawGroupRef {
                id: Some("G1".into()),
                name: Some("Everyone".into()),
            }],
            last_updated: Some("2024-03-01T10:00:00Z".into()),
        }
    }

    #[test]
    fn test_normalize_maps_fields() {
        let app = normalize(raw(Some("app-1"))).unwrap();
        assert_eq!(app.id, "app-1");
        assert_eq!(app.name, "HR Portal");
        assert_eq!(app.label, "hr-portal");
        assert_eq!(app.status, ApplicationStatus::Active);
        assert_eq!(app.assigned_groups.len(), 1);
        assert!(app.last_modified.is_some());
    }

    #[test]
    fn test_normalize_rejects_missing_id() {
        let err = normalize(raw(None)).unwrap_err();
        assert!(matches!(err, ConnectorError::MalformedRecord(_)));
    }

    #[test]
    fn test_normalize_defaults_optional_fields() {
        let app = normalize(RawApplication {
            id: Some("app-2".into()),
            name: None,
            label: None,
            status: None,
            assigned_groups: vec![],
            last_updated: None,
        })
        .unwrap();
        // Name falls back to the id when both name and label are absent.
        assert_eq!(app.name, "app-2");
        assert_eq!(app.status, ApplicationStatus::Unknown);
        assert!(app.assigned_groups.is_empty());
        assert!(app.last_modified.is_none());
    }

    #[test]
    fn test_normalize_drops_groups_without_ids() {
        let mut record = raw(Some("app-3"));
        record.assigned_groups.push(RawGroupRef {
            id: None,
            name: Some("ghost".into()),
        });
        let app = normalize(record).unwrap();
        assert_eq!(app.assigned_groups.len(), 1);
        assert_eq!(app.assigned_groups[0].id, "G1");
    }

    #[test]
    fn test_bad_timestamp_defaults_to_none() {
        let mut record = raw(Some("app-4"));
        record.last_updated = Some("not-a-date".into());
        let app = normalize(record).unwrap();
        assert!(app.last_modified.is_none());
    }
}
