use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for a monitoring engine instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Interval between full probe cycles (default: 60s).
    pub probe_interval: Duration,
    /// Hard cap on one cycle's duration; probes still in flight when it
    /// expires are abandoned so cycles never overlap (default: probe_interval).
    pub cycle_deadline: Duration,
    /// Maximum number of targets probed concurrently within a cycle.
    pub max_concurrent_probes: usize,

    /// Timeout for a single ICMP echo.
    pub icmp_timeout: Duration,
    /// Timeout for a single TCP connect attempt.
    pub tcp_timeout: Duration,
    /// Timeout for a single HTTP(S) request.
    pub http_timeout: Duration,
    /// Timeout for an auxiliary service-port connect (no retries).
    pub service_port_timeout: Duration,
    /// Maximum attempts for TCP and HTTP checks.
    pub max_retries: u32,
    /// Delay between retry attempts.
    pub retry_delay: Duration,

    /// TTL for cached DNS resolutions.
    pub dns_cache_ttl: Duration,
    /// Timeout for a single DNS lookup.
    pub dns_timeout: Duration,

    /// Minimum time between consecutive alerts for the same target.
    pub cooldown_window: Duration,
    /// Longer window for administrative re-notification flows.
    pub renotify_window: Duration,

    /// Age horizon for retained probe outcomes per target.
    pub history_retention: Duration,
    /// Hard cap on retained outcomes per target, whatever the check frequency.
    pub history_limit: usize,
    /// Interval between aggregate stats recomputation runs.
    pub stats_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let probe_interval = Duration::from_secs(60);
        Self {
            probe_interval,
            cycle_deadline: probe_interval,
            max_concurrent_probes: 100,
            icmp_timeout: Duration::from_secs(5),
            tcp_timeout: Duration::from_secs(2),
            http_timeout: Duration::from_secs(5),
            service_port_timeout: Duration::from_secs(2),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            dns_cache_ttl: Duration::from_secs(300),
            dns_timeout: Duration::from_secs(5),
            cooldown_window: Duration::from_secs(20),
            renotify_window: Duration::from_secs(300),
            history_retention: Duration::from_secs(24 * 3600),
            history_limit: 10_000,
            stats_interval: Duration::from_secs(24 * 3600),
        }
    }
}

impl EngineConfig {
    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        let old_default_deadline = self.probe_interval;
        self.probe_interval = interval;
        if self.cycle_deadline == old_default_deadline {
            self.cycle_deadline = interval;
        }
        self
    }

    pub fn with_cycle_deadline(mut self, deadline: Duration) -> Self {
        self.cycle_deadline = deadline;
        self
    }

    pub fn with_max_concurrent_probes(mut self, max: usize) -> Self {
        self.max_concurrent_probes = max.max(1);
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_cooldown_window(mut self, window: Duration) -> Self {
        self.cooldown_window = window;
        self
    }

    pub fn with_dns_cache_ttl(mut self, ttl: Duration) -> Self {
        self.dns_cache_ttl = ttl;
        self
    }

    pub fn with_history_retention(mut self, retention: Duration) -> Self {
        self.history_retention = retention;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    pub fn with_stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = interval;
        self
    }
}
