//! Risk score to group membership mapping.
//!
//! A [`RiskMapping`] discretizes the score domain into contiguous bands, each
//! tied to a provider group representing that risk tier. A push resolves the
//! score to exactly one band and transitions the user's membership so that, on
//! full success, the user belongs to exactly one risk-tier group. The
//! per-user [`TierLedger`] remembers what was last applied — including a
//! failed removal — so a retried push converges without re-issuing the half
//! that already succeeded.

use crate::dispatch::GroupActionDispatcher;
use crate::error::{ConnectorError, ConnectorResult};
use crate::http::Transport;
use crate::model::{Ack, ActionRequest, GroupOp, GroupRef};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// One band of the score domain and the group that represents it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskBand {
    pub name: String,
    /// Inclusive lower bound.
    pub floor: f64,
    /// Exclusive upper bound, except for the last band where it is inclusive.
    pub ceiling: f64,
    pub group: GroupRef,
}

/// Validated, immutable mapping from scores to risk-tier groups.
///
/// Bands partition the declared domain: sorted, no gaps, no overlaps, so any
/// in-domain score resolves to exactly one band.
#[derive(Debug, Clone)]
pub struct RiskMapping {
    bands: Vec<RiskBand>,
}

impl RiskMapping {
    pub fn new(mut bands: Vec<RiskBand>) -> ConnectorResult<Self> {
        if bands.is_empty() {
            return Err(ConnectorError::Config(
                "risk mapping requires at least one band".into(),
            ));
        }
        for band in &bands {
            if !band.floor.is_finite() || !band.ceiling.is_finite() {
                return Err(ConnectorError::Config(format!(
                    "band '{}' has a non-finite bound",
                    band.name
                )));
            }
            if band.floor >= band.ceiling {
                return Err(ConnectorError::Config(format!(
                    "band '{}' floor {} must be below ceiling {}",
                    band.name, band.floor, band.ceiling
                )));
            }
        }
        bands.sort_by(|a, b| a.floor.total_cmp(&b.floor));
        for pair in bands.windows(2) {
            if pair[0].ceiling > pair[1].floor {
                return Err(ConnectorError::Config(format!(
                    "bands '{}' and '{}' overlap",
                    pair[0].name, pair[1].name
                )));
            }
            if pair[0].ceiling < pair[1].floor {
                return Err(ConnectorError::Config(format!(
                    "gap between bands '{}' and '{}'",
                    pair[0].name, pair[1].name
                )));
            }
        }
        Ok(Self { bands })
    }

    /// Resolves a score to its unique band.
    pub fn resolve(&self, score: f64) -> ConnectorResult<&RiskBand> {
        let last = self.bands.len() - 1;
        for (i, band) in self.bands.iter().enumerate() {
            let inside = score >= band.floor
                && (score < band.ceiling || (i == last && score <= band.ceiling));
            if inside {
                return Ok(band);
            }
        }
        Err(ConnectorError::Validation(format!(
            "score {} is outside the mapped domain [{}, {}]",
            score,
            self.bands[0].floor,
            self.bands[last].ceiling
        )))
    }

    pub fn bands(&self) -> &[RiskBand] {
        &self.bands
    }
}

/// Last-known risk-tier state for one user.
#[derive(Debug, Clone, Default)]
struct TierState {
    /// The tier group the user was last successfully added to.
    current: Option<GroupRef>,
    /// A tier group whose removal failed and is still owed.
    pending_removal: Option<GroupRef>,
}

/// A risk-score event from the host's inbound channel.
#[derive(Debug, Clone, Deserialize)]
pub struct RiskScoreEvent {
    pub user_id: String,
    pub score: f64,
}

/// Outcome of one push: the resolved band and the acks it produced.
#[derive(Debug, Clone)]
pub struct PushReceipt {
    pub user_id: String,
    pub band: String,
    pub removed: Vec<Ack>,
    pub added: Option<Ack>,
}

/// Maps risk scores to membership transitions and dispatches them.
pub struct RiskScorePusher<T: Transport> {
    mapping: RiskMapping,
    dispatcher: Arc<GroupActionDispatcher<T>>,
    ledger: RwLock<HashMap<String, TierState>>,
}

impl<T: Transport + 'static> RiskScorePusher<T> {
    pub fn new(mapping: RiskMapping, dispatcher: Arc<GroupActionDispatcher<T>>) -> Self {
        Self {
            mapping,
            dispatcher,
            ledger: RwLock::new(HashMap::new()),
        }
    }

    pub fn mapping(&self) -> &RiskMapping {
        &self.mapping
    }

    /// Pushes a score for a user: removes any other tier group the ledger
    /// knows about, adds the resolved tier's group. A first push (unknown
    /// state) issues only the add.
    #[instrument(skip(self), fields(user = %user_id, score))]
    pub async fn push(&self, user_id: &str, score: f64) -> ConnectorResult<PushReceipt> {
        let band = self.mapping.resolve(score)?.clone();
        let target = band.group.clone();

        let state = {
            let ledger = self.ledger.read().await;
            ledger.get(user_id).cloned().unwrap_or_default()
        };

        let mut removals: Vec<GroupRef> = Vec::new();
        if let Some(pending) = &state.pending_removal {
            if !pending.same_group(&target) {
                removals.push(pending.clone());
            } else {
                // Re-entering a tier we still owed a removal for; the add
                // below re-asserts the membership instead.
                self.update(user_id, |s| s.pending_removal = None).await;
            }
        }
        if let Some(current) = &state.current {
            if !current.same_group(&target) && !removals.iter().any(|g| g.same_group(current)) {
                removals.push(current.clone());
            }
        }
        let need_add = !state
            .current
            .as_ref()
            .is_some_and(|c| c.same_group(&target));

        let mut removed = Vec::new();
        let mut remove_failure: Option<(GroupRef, ConnectorError)> = None;
        for group in removals {
            match self
                .dispatcher
                .apply(ActionRequest::remove(user_id, &group.id))
                .await
            {
                Ok(ack) => {
                    let cleared = group.clone();
                    self.update(user_id, move |s| {
                        if s.pending_removal
                            .as_ref()
                            .is_some_and(|p| p.same_group(&cleared))
                        {
                            s.pending_removal = None;
                        }
                        if s.current.as_ref().is_some_and(|c| c.same_group(&cleared)) {
                            s.current = None;
                        }
                    })
                    .await;
                    removed.push(ack);
                }
                Err(e) => {
                    warn!(group = %group.id, error = %e, "Tier removal failed, parking for retry");
                    let parked = group.clone();
                    self.update(user_id, move |s| {
                        if s.current.as_ref().is_some_and(|c| c.same_group(&parked)) {
                            s.current = None;
                        }
                        s.pending_removal = Some(parked);
                    })
                    .await;
                    remove_failure = Some((group, e));
                }
            }
        }

        let mut added = None;
        let mut add_failure: Option<ConnectorError> = None;
        if need_add {
            match self
                .dispatcher
                .apply(ActionRequest::add(user_id, &target.id))
                .await
            {
                Ok(ack) => {
                    let entered = target.clone();
                    self.update(user_id, move |s| s.current = Some(entered)).await;
                    added = Some(ack);
                }
                Err(e) => {
                    self.update(user_id, |s| s.current = None).await;
                    add_failure = Some(e);
                }
            }
        }

        match (remove_failure, add_failure) {
            (None, None) => {
                info!(band = %band.name, "Risk push applied");
                Ok(PushReceipt {
                    user_id: user_id.to_string(),
                    band: band.name,
                    removed,
                    added,
                })
            }
            (Some((group, e)), None) => Err(ConnectorError::PartialPush {
                user_id: user_id.to_string(),
                side: GroupOp::Remove,
                group_id: group.id,
                source: Box::new(e),
            }),
            (None, Some(e)) => {
                if removed.is_empty() {
                    // Nothing succeeded; no partial state to report.
                    Err(e)
                } else {
                    Err(ConnectorError::PartialPush {
                        user_id: user_id.to_string(),
                        side: GroupOp::Add,
                        group_id: target.id,
                        source: Box::new(e),
                    })
                }
            }
            (Some((group, remove_err)), Some(add_err)) => {
                warn!(group = %group.id, error = %remove_err, "Both push halves failed");
                Err(add_err)
            }
        }
    }

    /// Drains the host's event channel until it closes or `cancel` fires.
    /// Per-event failures are logged and do not stop the loop.
    pub async fn run(
        &self,
        events: &mut mpsc::Receiver<RiskScoreEvent>,
        cancel: &CancellationToken,
    ) -> usize {
        let mut processed = 0usize;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => {
                        if let Err(e) = self.push(&event.user_id, event.score).await {
                            warn!(user = %event.user_id, error = %e, "Risk push failed");
                        }
                        processed += 1;
                    }
                    None => break,
                },
            }
        }
        processed
    }

    async fn update<F: FnOnce(&mut TierState)>(&self, user_id: &str, apply: F) {
        let mut ledger = self.ledger.write().await;
        apply(ledger.entry(user_id.to_string()).or_default());
    }
}
