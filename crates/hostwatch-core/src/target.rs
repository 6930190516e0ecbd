use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a target's availability is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Icmp,
    Tcp,
    Http,
    Https,
}

impl std::fmt::Display for CheckKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Icmp => write!(f, "icmp"),
            Self::Tcp => write!(f, "tcp"),
            Self::Http => write!(f, "http"),
            Self::Https => write!(f, "https"),
        }
    }
}

impl std::str::FromStr for CheckKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "icmp" => Ok(Self::Icmp),
            "tcp" => Ok(Self::Tcp),
            "http" => Ok(Self::Http),
            "https" => Ok(Self::Https),
            other => Err(format!("unknown check kind: {}", other)),
        }
    }
}

/// Availability verdict for a target, persisted as its `status` field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    #[default]
    Unknown,
    Online,
    Offline,
}

impl TargetStatus {
    pub fn from_online(online: bool) -> Self {
        if online {
            Self::Online
        } else {
            Self::Offline
        }
    }

    pub fn is_online(self) -> bool {
        matches!(self, Self::Online)
    }

    /// Targets move freely between online and offline; `Unknown` only exists
    /// before the first completed probe and is never re-entered.
    pub fn can_transition_to(self, next: TargetStatus) -> bool {
        matches!(
            (self, next),
            (TargetStatus::Unknown, TargetStatus::Online)
                | (TargetStatus::Unknown, TargetStatus::Offline)
                | (TargetStatus::Online, TargetStatus::Offline)
                | (TargetStatus::Offline, TargetStatus::Online)
        )
    }
}

impl std::fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// An auxiliary service checked by TCP connect after the primary check passes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePort {
    pub name: String,
    pub port: u16,
}

/// A monitored endpoint.
///
/// Identity fields are owned by the registration layer; the status fields at
/// the bottom are written exclusively by the engine after a completed probe
/// cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub address: String,
    pub check: CheckKind,
    /// Port for TCP checks; defaults to 80 when absent.
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub services: Vec<ServicePort>,

    #[serde(default)]
    pub status: TargetStatus,
    #[serde(default)]
    pub last_checked: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_latency: Option<Duration>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl Target {
    pub fn new(id: i64, user_id: i64, name: impl Into<String>, address: impl Into<String>, check: CheckKind) -> Self {
        Self {
            id,
            user_id,
            name: name.into(),
            address: address.into(),
            check,
            port: None,
            services: Vec::new(),
            status: TargetStatus::Unknown,
            last_checked: None,
            last_latency: None,
            last_error: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_services(mut self, services: Vec<ServicePort>) -> Self {
        self.services = services;
        self
    }

    pub fn service_name(&self, port: u16) -> String {
        self.services
            .iter()
            .find(|s| s.port == port)
            .map(|s| s.name.clone())
            .unwrap_or_else(|| format!("port {}", port))
    }
}

/// Result of one probe against one target. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub online: bool,
    pub latency: Duration,
    pub timestamp: DateTime<Utc>,
    pub error: Option<String>,
    /// Per-service-port verdicts, empty unless the target lists services.
    #[serde(default)]
    pub services: HashMap<u16, bool>,
}

impl ProbeOutcome {
    pub fn online(latency: Duration) -> Self {
        Self {
            online: true,
            latency,
            timestamp: Utc::now(),
            error: None,
            services: HashMap::new(),
        }
    }

    pub fn offline(error: impl Into<String>) -> Self {
        Self {
            online: false,
            latency: Duration::ZERO,
            timestamp: Utc::now(),
            error: Some(error.into()),
            services: HashMap::new(),
        }
    }

    pub fn with_services(mut self, services: HashMap<u16, bool>) -> Self {
        self.services = services;
        self
    }

    pub fn status(&self) -> TargetStatus {
        TargetStatus::from_online(self.online)
    }
}

/// Aggregate uptime statistics over a target's retained history window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetStats {
    pub uptime_pct: f64,
    pub avg_latency: Duration,
    pub total: usize,
    pub successful: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_status_transitions() {
        assert!(TargetStatus::Unknown.can_transition_to(TargetStatus::Online));
        assert!(TargetStatus::Unknown.can_transition_to(TargetStatus::Offline));
        assert!(TargetStatus::Online.can_transition_to(TargetStatus::Offline));
        assert!(TargetStatus::Offline.can_transition_to(TargetStatus::Online));
    }

    #[test]
    fn invalid_status_transitions() {
        assert!(!TargetStatus::Online.can_transition_to(TargetStatus::Unknown));
        assert!(!TargetStatus::Offline.can_transition_to(TargetStatus::Unknown));
        assert!(!TargetStatus::Online.can_transition_to(TargetStatus::Online));
        assert!(!TargetStatus::Unknown.can_transition_to(TargetStatus::Unknown));
    }

    #[test]
    fn check_kind_round_trips_through_str() {
        for kind in [CheckKind::Icmp, CheckKind::Tcp, CheckKind::Http, CheckKind::Https] {
            let s = kind.to_string();
            assert_eq!(s.parse::<CheckKind>().unwrap(), kind);
        }
        assert!("gopher".parse::<CheckKind>().is_err());
    }

    #[test]
    fn service_name_falls_back_to_port() {
        let target = Target::new(1, 10, "web-1", "example.com", CheckKind::Https)
            .with_services(vec![ServicePort { name: "ssh".into(), port: 22 }]);
        assert_eq!(target.service_name(22), "ssh");
        assert_eq!(target.service_name(5432), "port 5432");
    }

    #[test]
    fn outcome_constructors() {
        let up = ProbeOutcome::online(Duration::from_millis(42));
        assert!(up.online);
        assert!(up.error.is_none());
        assert_eq!(up.status(), TargetStatus::Online);

        let down = ProbeOutcome::offline("connection refused");
        assert!(!down.online);
        assert_eq!(down.latency, Duration::ZERO);
        assert_eq!(down.error.as_deref(), Some("connection refused"));
        assert_eq!(down.status(), TargetStatus::Offline);
    }
}
