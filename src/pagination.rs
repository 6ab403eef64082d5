//! Cursor-based pagination over list endpoints.
//!
//! List endpoints return a [`PageEnvelope`]: a batch of items plus an opaque
//! `next` token. [`PageWalker`] turns a page-fetch function into a lazy,
//! finite sequence of pages: it terminates exactly when `next` is absent,
//! errors if the server repeats a cursor instead of advancing, and enforces a
//! per-cycle page cap as a safety valve against runaway responses.

use crate::error::{ConnectorError, ConnectorResult};
use serde::Deserialize;
use std::future::Future;

/// The provider's list response envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct PageEnvelope<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    /// Opaque token for the next page; absent on the terminal page.
    #[serde(default)]
    pub next: Option<String>,
}

/// Lazy page iterator.
///
/// Not restartable mid-page: after an error the caller restarts a new walker
/// from its last fully-consumed cursor.
pub struct PageWalker<F> {
    fetch: F,
    cursor: Option<String>,
    pages_seen: u32,
    max_pages: u32,
    finished: bool,
}

impl<F, Fut, T> PageWalker<F>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = ConnectorResult<PageEnvelope<T>>>,
{
    /// Creates a walker starting at `start` (None = first page), capped at
    /// `max_pages` pages per cycle.
    pub fn new(start: Option<String>, max_pages: u32, fetch: F) -> Self {
        Self {
            fetch,
            cursor: start,
            pages_seen: 0,
            max_pages,
            finished: false,
        }
    }

    /// Fetches the next page, or `None` once the sequence has terminated.
    ///
    /// Any error ends the sequence; the walker does not resume past it.
    pub async fn next_page(&mut self) -> Option<ConnectorResult<PageEnvelope<T>>> {
        if self.finished {
            return None;
        }
        if self.pages_seen >= self.max_pages {
            self.finished = true;
            return Some(Err(ConnectorError::PaginationOverrun {
                pages: self.pages_seen,
            }));
        }

        let token = self.cursor.clone();
        match (self.fetch)(token.clone()).await {
            Ok(page) => {
                self.pages_seen += 1;
                match &page.next {
                    Some(next) if token.as_deref() == Some(next.as_str()) => {
                        self.finished = true;
                        Some(Err(ConnectorError::CursorStalled {
                            cursor: next.clone(),
                        }))
                    }
                    Some(next) => {
                        self.cursor = Some(next.clone());
                        Some(Ok(page))
                    }
                    None => {
                        self.finished = true;
                        Some(Ok(page))
                    }
                }
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }

    pub fn pages_seen(&self) -> u32 {
        self.pages_seen
    }
}
