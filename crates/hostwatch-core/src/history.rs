//! In-memory, per-target bounded history of probe outcomes.
//!
//! The window is telemetry for uptime statistics, not an audit log: entries
//! expire by age (and a hard count cap) and are evicted both on record and
//! before every aggregation, so memory per target stays bounded regardless of
//! check frequency.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;

use crate::target::{ProbeOutcome, TargetStats};

pub struct HistoryStore {
    windows: DashMap<i64, VecDeque<ProbeOutcome>>,
    retention: Duration,
    max_entries: usize,
}

impl HistoryStore {
    pub fn new(retention: Duration, max_entries: usize) -> Self {
        Self {
            windows: DashMap::new(),
            retention,
            max_entries: max_entries.max(1),
        }
    }

    /// Appends an outcome, evicting expired entries first. Outcomes arrive in
    /// probe order per target, so the window stays time-ordered.
    pub fn record(&self, target_id: i64, outcome: ProbeOutcome) {
        let mut window = self.windows.entry(target_id).or_default();
        Self::evict_expired(&mut window, self.retention);
        while window.len() >= self.max_entries {
            window.pop_front();
        }
        window.push_back(outcome);
    }

    /// Aggregates the retained window. Returns zeroed stats for targets with
    /// no (remaining) history.
    pub fn stats(&self, target_id: i64) -> TargetStats {
        let mut window = match self.windows.get_mut(&target_id) {
            Some(w) => w,
            None => return TargetStats::default(),
        };
        Self::evict_expired(&mut window, self.retention);

        let total = window.len();
        if total == 0 {
            return TargetStats::default();
        }

        let successful = window.iter().filter(|o| o.online).count();
        let latency_sum: Duration = window
            .iter()
            .filter(|o| o.online)
            .map(|o| o.latency)
            .sum();
        let avg_latency = if successful > 0 {
            latency_sum / successful as u32
        } else {
            Duration::ZERO
        };

        TargetStats {
            uptime_pct: successful as f64 / total as f64 * 100.0,
            avg_latency,
            total,
            successful,
        }
    }

    /// Drops all history for a target, e.g. when it is unregistered.
    pub fn forget(&self, target_id: i64) {
        self.windows.remove(&target_id);
    }

    fn evict_expired(window: &mut VecDeque<ProbeOutcome>, retention: Duration) {
        // A retention too large for chrono means nothing ever expires.
        let Ok(retention) = chrono::Duration::from_std(retention) else {
            return;
        };
        let Some(horizon) = Utc::now().checked_sub_signed(retention) else {
            return;
        };
        while window.front().is_some_and(|o| o.timestamp < horizon) {
            window.pop_front();
        }
    }
}
