//! Monitoring engine: periodic probe cycles, status transitions, alert
//! gating, and the secondary stats job.
//!
//! One cycle snapshots the registered targets, probes them concurrently under
//! a bounded pool (at most one outstanding probe per target), persists each
//! outcome, evaluates the cooldown gate, and appends to history. The run loop
//! sleeps only after a cycle finishes and the cycle itself is capped by a
//! deadline, so cycles for the same target set never overlap.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::alert::{self, Alert};
use crate::config::EngineConfig;
use crate::cooldown::CooldownGate;
use crate::history::HistoryStore;
use crate::probe::Probe;
use crate::store::{NotificationRecord, StatusUpdate, StoreError, TargetStore};
use crate::target::{ProbeOutcome, Target, TargetStats, TargetStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Idle,
    Active,
    Stopping,
    Stopped,
}

impl EngineState {
    pub fn can_transition_to(self, target: EngineState) -> bool {
        matches!(
            (self, target),
            (EngineState::Idle, EngineState::Active)
                | (EngineState::Active, EngineState::Stopping)
                | (EngineState::Stopping, EngineState::Stopped)
                | (EngineState::Stopped, EngineState::Active)
        )
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Active => write!(f, "active"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

pub struct Engine {
    config: EngineConfig,
    store: Arc<dyn TargetStore>,
    prober: Arc<dyn Probe>,
    history: Arc<HistoryStore>,
    cooldown: CooldownGate,
    state: Arc<RwLock<EngineState>>,
    last_cycle: Arc<RwLock<Option<DateTime<Utc>>>>,
    downtime_start: DashMap<i64, DateTime<Utc>>,
    alert_tx: Option<UnboundedSender<Alert>>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn TargetStore>,
        prober: Arc<dyn Probe>,
        alert_tx: Option<UnboundedSender<Alert>>,
    ) -> Self {
        let history = HistoryStore::new(config.history_retention, config.history_limit);
        let cooldown = CooldownGate::new(config.cooldown_window);
        Self {
            config,
            store,
            prober,
            history: Arc::new(history),
            cooldown,
            state: Arc::new(RwLock::new(EngineState::Idle)),
            last_cycle: Arc::new(RwLock::new(None)),
            downtime_start: DashMap::new(),
            alert_tx,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn state(&self) -> EngineState {
        *self.state.read().await
    }

    pub async fn last_cycle(&self) -> Option<DateTime<Utc>> {
        *self.last_cycle.read().await
    }

    /// Aggregate stats over the retained history window for one target.
    pub fn stats(&self, target_id: i64) -> TargetStats {
        self.history.stats(target_id)
    }

    /// Forgets engine-side state for an unregistered target.
    pub fn forget_target(&self, target_id: i64) {
        self.cooldown.clear(target_id);
        self.history.forget(target_id);
        self.downtime_start.remove(&target_id);
    }

    /// Starts the periodic probe loop and the stats job. Idempotent while
    /// active.
    pub async fn start(self: &Arc<Self>) -> Result<(), String> {
        {
            let mut state = self.state.write().await;
            if *state == EngineState::Active {
                return Ok(());
            }
            *state = EngineState::Active;
        }

        info!(
            interval_secs = self.config.probe_interval.as_secs(),
            "Starting monitoring engine"
        );

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                {
                    let current = *engine.state.read().await;
                    if current != EngineState::Active {
                        let mut s = engine.state.write().await;
                        *s = EngineState::Stopped;
                        info!("Engine stopped");
                        break;
                    }
                }

                engine.run_cycle_with_deadline().await;
                tokio::time::sleep(engine.config.probe_interval).await;
            }
        });

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(engine.config.stats_interval).await;
                if *engine.state.read().await != EngineState::Active {
                    break;
                }
                engine.recompute_stats().await;
            }
        });

        Ok(())
    }

    pub async fn stop(&self) {
        let mut state = self.state.write().await;
        if *state == EngineState::Active {
            *state = EngineState::Stopping;
            info!("Stopping monitoring engine");
        }
    }

    /// Runs exactly one probe cycle, without the deadline cap.
    pub async fn poll_once(&self) {
        self.run_cycle().await;
    }

    /// On-demand check of a single registered target. Applies the same
    /// persistence, gating, and history path as a scheduled probe.
    pub async fn check_now(&self, target_id: i64) -> Result<ProbeOutcome, StoreError> {
        let target = self.store.get_target(target_id).await?;
        let outcome = self.prober.probe(&target).await;
        self.apply_outcome(&target, outcome.clone()).await;
        Ok(outcome)
    }

    async fn run_cycle_with_deadline(&self) {
        if tokio::time::timeout(self.config.cycle_deadline, self.run_cycle())
            .await
            .is_err()
        {
            warn!(
                deadline_secs = self.config.cycle_deadline.as_secs(),
                "Probe cycle exceeded deadline, abandoning in-flight probes"
            );
        }
    }

    async fn run_cycle(&self) {
        let targets = match self.store.list_targets().await {
            Ok(targets) => targets,
            Err(e) => {
                error!(error = %e, "Failed to list targets, skipping cycle");
                return;
            }
        };

        *self.last_cycle.write().await = Some(Utc::now());
        debug!(targets = targets.len(), "Probe cycle started");

        stream::iter(targets)
            .map(|target| self.check_target(target))
            .buffer_unordered(self.config.max_concurrent_probes)
            .collect::<Vec<_>>()
            .await;
    }

    /// Probes one target with panic isolation: a broken probe marks the
    /// target offline instead of aborting the cycle for everyone else.
    async fn check_target(&self, target: Target) {
        let outcome = match AssertUnwindSafe(self.prober.probe(&target))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => {
                let detail = panic_message(panic);
                error!(
                    target_id = target.id,
                    target = %target.name,
                    detail,
                    "Probe panicked"
                );
                ProbeOutcome::offline(format!("Unexpected error: {}", detail))
            }
        };

        self.apply_outcome(&target, outcome).await;
    }

    async fn apply_outcome(&self, target: &Target, outcome: ProbeOutcome) {
        let new_status = outcome.status();
        let previous = target.status;
        let status_changed = new_status != previous;

        let downtime_start = match new_status {
            TargetStatus::Offline => {
                if status_changed {
                    self.downtime_start.insert(target.id, outcome.timestamp);
                }
                self.downtime_start.get(&target.id).map(|e| *e)
            }
            _ => self.downtime_start.remove(&target.id).map(|(_, t)| t),
        };

        if status_changed {
            if previous == TargetStatus::Unknown {
                info!(
                    target_id = target.id,
                    target = %target.name,
                    status = %new_status,
                    "Initial status confirmed"
                );
            } else {
                info!(
                    target_id = target.id,
                    target = %target.name,
                    from = %previous,
                    to = %new_status,
                    error = outcome.error.as_deref().unwrap_or(""),
                    "Status changed"
                );
                debug_assert!(previous.can_transition_to(new_status));
            }
        }

        let update = StatusUpdate {
            status: new_status,
            checked_at: outcome.timestamp,
            latency: outcome.online.then_some(outcome.latency),
            error: outcome.error.clone(),
            services: outcome.services.clone(),
        };
        if let Err(e) = self.store.update_status(target.id, update).await {
            // History is best-effort telemetry; a persistence failure never
            // rolls back the in-memory bookkeeping below.
            warn!(target_id = target.id, error = %e, "Failed to persist status");
        }

        // The first verdict after Unknown is initial-state confirmation, not
        // a transition worth waking an operator for.
        let transition = status_changed && previous != TargetStatus::Unknown;
        if self.cooldown.should_alert(target.id, transition) {
            let message = alert::format_alert(target, new_status, &outcome, downtime_start);
            let record = NotificationRecord::new(
                target.id,
                target.user_id,
                new_status,
                serde_json::json!({
                    "latency_ms": outcome.online.then(|| outcome.latency.as_millis() as u64),
                    "error": outcome.error,
                    "services": outcome.services,
                }),
            );

            // Persist the record, then dispatch: the two failure modes stay
            // distinguishable in logs and tests.
            if let Err(e) = self.store.record_notification(record).await {
                warn!(target_id = target.id, error = %e, "Failed to persist notification");
            }
            if let Some(tx) = &self.alert_tx {
                let _ = tx.send(Alert {
                    target_id: target.id,
                    user_id: target.user_id,
                    status: new_status,
                    message,
                });
            }
        }

        self.history.record(target.id, outcome);
    }

    /// Secondary job: recompute aggregate stats from history and persist
    /// them. Independent cadence from the probe cycle.
    async fn recompute_stats(&self) {
        let targets = match self.store.list_targets().await {
            Ok(targets) => targets,
            Err(e) => {
                error!(error = %e, "Failed to list targets for stats run");
                return;
            }
        };

        let mut updated = 0usize;
        for target in &targets {
            let stats = self.history.stats(target.id);
            if stats.total == 0 {
                continue;
            }
            match self.store.update_stats(target.id, stats).await {
                Ok(()) => updated += 1,
                Err(e) => {
                    warn!(target_id = target.id, error = %e, "Failed to persist stats")
                }
            }
        }
        info!(targets = targets.len(), updated, "Aggregate stats recomputed");
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "probe panicked".to_string()
    }
}
