//! Per-target alert suppression.
//!
//! The gate arms a timer on the first alerted transition and swallows every
//! further transition until the window elapses, flapping included. Suppression
//! over completeness: for a target flipping back and forth inside one window
//! the operator sees exactly one alert.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

pub struct CooldownGate {
    armed: DashMap<i64, Instant>,
    window: Duration,
}

impl CooldownGate {
    pub fn new(window: Duration) -> Self {
        Self {
            armed: DashMap::new(),
            window,
        }
    }

    /// Decides whether a state transition may produce an alert and (re)arms
    /// the timer when it does. `status_changed = false` never alerts and
    /// never touches the timer.
    pub fn should_alert(&self, target_id: i64, status_changed: bool) -> bool {
        if !status_changed {
            return false;
        }

        let now = Instant::now();
        match self.armed.entry(target_id) {
            Entry::Occupied(mut entry) => {
                if now.duration_since(*entry.get()) < self.window {
                    // Swallowed; the timer keeps its original arming instant.
                    false
                } else {
                    entry.insert(now);
                    true
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                true
            }
        }
    }

    /// Drops the timer for a target, e.g. when it is unregistered.
    pub fn clear(&self, target_id: i64) {
        self.armed.remove(&target_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> CooldownGate {
        CooldownGate::new(Duration::from_secs(20))
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_status_never_alerts() {
        let gate = gate();
        assert!(!gate.should_alert(1, false));
        // Even with an armed timer long expired.
        assert!(gate.should_alert(1, true));
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(!gate.should_alert(1, false));
    }

    #[tokio::test(start_paused = true)]
    async fn first_transition_alerts_then_window_suppresses() {
        let gate = gate();
        assert!(gate.should_alert(1, true));
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!gate.should_alert(1, true));
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!gate.should_alert(1, true));
    }

    #[tokio::test(start_paused = true)]
    async fn alert_allowed_again_after_window_elapses() {
        let gate = gate();
        assert!(gate.should_alert(1, true));
        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(gate.should_alert(1, true));
    }

    #[tokio::test(start_paused = true)]
    async fn suppressed_transition_does_not_rearm() {
        let gate = gate();
        assert!(gate.should_alert(1, true));
        // A swallowed alert at t=15 must not push the window to t=35.
        tokio::time::advance(Duration::from_secs(15)).await;
        assert!(!gate.should_alert(1, true));
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(gate.should_alert(1, true));
    }

    #[tokio::test(start_paused = true)]
    async fn targets_are_gated_independently() {
        let gate = gate();
        assert!(gate.should_alert(1, true));
        assert!(gate.should_alert(2, true));
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!gate.should_alert(1, true));
        assert!(!gate.should_alert(2, true));
    }

    #[tokio::test(start_paused = true)]
    async fn clear_resets_the_timer() {
        let gate = gate();
        assert!(gate.should_alert(1, true));
        gate.clear(1);
        assert!(gate.should_alert(1, true));
    }
}
