//! TOML configuration file schema and parsing.
//!
//! Example config file:
//!
//! ```toml
//! [monitor]
//! log_format = "json"
//! probe_interval_secs = 60
//! cooldown_secs = 20
//! max_retries = 3
//!
//! [alert]
//! webhook_url = "https://hooks.example.com/hostwatch"
//! secret = "my-key"
//! timeout_ms = 5000
//! max_retries = 2
//!
//! [[target]]
//! id = 1
//! user_id = 100
//! name = "edge-1"
//! address = "edge1.example.com"
//! check = "https"
//! services = [
//!   { name = "ssh", port = 22 },
//!   { name = "postgres", port = 5432 },
//! ]
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use hostwatch_core::{CheckKind, EngineConfig, ServicePort, Target};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub monitor: MonitorSettings,

    #[serde(default)]
    pub alert: Option<AlertSettings>,

    #[serde(default)]
    pub target: Vec<TargetDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorSettings {
    #[serde(default = "default_log_format")]
    pub log_format: String,

    #[serde(default)]
    pub probe_interval_secs: Option<u64>,

    #[serde(default)]
    pub cooldown_secs: Option<u64>,

    #[serde(default)]
    pub max_retries: Option<u32>,

    #[serde(default)]
    pub retry_delay_ms: Option<u64>,

    #[serde(default)]
    pub max_concurrent: Option<usize>,

    #[serde(default)]
    pub dns_cache_ttl_secs: Option<u64>,

    #[serde(default)]
    pub history_retention_hours: Option<u64>,

    #[serde(default)]
    pub history_limit: Option<usize>,

    #[serde(default)]
    pub stats_interval_hours: Option<u64>,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            log_format: default_log_format(),
            probe_interval_secs: None,
            cooldown_secs: None,
            max_retries: None,
            retry_delay_ms: None,
            max_concurrent: None,
            dns_cache_ttl_secs: None,
            history_retention_hours: None,
            history_limit: None,
            stats_interval_hours: None,
        }
    }
}

fn default_log_format() -> String {
    "pretty".into()
}

impl MonitorSettings {
    pub fn to_engine_config(&self) -> EngineConfig {
        let mut c = EngineConfig::default();
        if let Some(v) = self.probe_interval_secs {
            c = c.with_probe_interval(Duration::from_secs(v));
        }
        if let Some(v) = self.cooldown_secs {
            c = c.with_cooldown_window(Duration::from_secs(v));
        }
        if let Some(v) = self.max_retries {
            c = c.with_max_retries(v);
        }
        if let Some(v) = self.retry_delay_ms {
            c = c.with_retry_delay(Duration::from_millis(v));
        }
        if let Some(v) = self.max_concurrent {
            c = c.with_max_concurrent_probes(v);
        }
        if let Some(v) = self.dns_cache_ttl_secs {
            c = c.with_dns_cache_ttl(Duration::from_secs(v));
        }
        if let Some(v) = self.history_retention_hours {
            c = c.with_history_retention(Duration::from_secs(v * 3600));
        }
        if let Some(v) = self.history_limit {
            c = c.with_history_limit(v);
        }
        if let Some(v) = self.stats_interval_hours {
            c = c.with_stats_interval(Duration::from_secs(v * 3600));
        }
        c
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertSettings {
    pub webhook_url: String,

    #[serde(default)]
    pub secret: Option<String>,

    #[serde(default = "default_alert_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_alert_retries")]
    pub max_retries: u32,
}

fn default_alert_timeout_ms() -> u64 {
    5000
}

fn default_alert_retries() -> u32 {
    2
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetDef {
    pub id: i64,

    #[serde(default)]
    pub user_id: i64,

    pub name: String,
    pub address: String,
    pub check: CheckKind,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub services: Vec<ServiceDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceDef {
    pub name: String,
    pub port: u16,
}

impl TargetDef {
    pub fn to_target(&self) -> Target {
        let mut target = Target::new(self.id, self.user_id, &self.name, &self.address, self.check);
        if let Some(port) = self.port {
            target = target.with_port(port);
        }
        if !self.services.is_empty() {
            target = target.with_services(
                self.services
                    .iter()
                    .map(|s| ServicePort {
                        name: s.name.clone(),
                        port: s.port,
                    })
                    .collect(),
            );
        }
        target
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;

        let config: AppConfig = toml::from_str(&content)
            .map_err(|e| format!("Failed to parse config file {}: {}", path.display(), e))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if let Some(ref alert) = self.alert {
            let parsed = url::Url::parse(&alert.webhook_url)
                .map_err(|e| format!("Invalid webhook URL: {} ({})", alert.webhook_url, e))?;
            if parsed.scheme() != "http" && parsed.scheme() != "https" {
                return Err(format!(
                    "Webhook URL must use http or https: {}",
                    alert.webhook_url
                ));
            }
        }

        let mut target_ids = std::collections::HashSet::new();
        for t in &self.target {
            if !target_ids.insert(t.id) {
                return Err(format!("Duplicate target ID: {}", t.id));
            }
            if t.name.is_empty() {
                return Err(format!("Target {} has an empty name", t.id));
            }
            if t.address.is_empty() {
                return Err(format!("Target '{}' has an empty address", t.name));
            }

            let ports: Vec<u16> = t.services.iter().map(|s| s.port).collect();
            let unique: std::collections::HashSet<u16> = ports.iter().copied().collect();
            if unique.len() != ports.len() {
                return Err(format!("Duplicate service ports on target '{}'", t.name));
            }
        }

        match self.monitor.log_format.as_str() {
            "pretty" | "json" => {}
            other => {
                return Err(format!(
                    "Invalid log_format '{}': must be 'pretty' or 'json'",
                    other
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostwatch_core::TargetStatus;

    #[test]
    fn parse_minimal_config() {
        let toml = r#"
[[target]]
id = 1
user_id = 100
name = "edge-1"
address = "edge1.example.com"
check = "icmp"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.target.len(), 1);
        assert_eq!(config.target[0].name, "edge-1");
        assert_eq!(config.target[0].check, CheckKind::Icmp);
        assert_eq!(config.monitor.log_format, "pretty");
        assert!(config.alert.is_none());

        let target = config.target[0].to_target();
        assert_eq!(target.status, TargetStatus::Unknown);
        assert!(target.services.is_empty());
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[monitor]
log_format = "json"
probe_interval_secs = 30
cooldown_secs = 45
max_retries = 5
max_concurrent = 25

[alert]
webhook_url = "https://hooks.example.com/hostwatch"
secret = "my-key"
timeout_ms = 3000

[[target]]
id = 1
user_id = 100
name = "edge-1"
address = "edge1.example.com"
check = "https"
port = 8443
services = [
  { name = "ssh", port = 22 },
  { name = "postgres", port = 5432 },
]

[[target]]
id = 2
user_id = 100
name = "db-1"
address = "10.0.0.5"
check = "tcp"
port = 5432
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.monitor.log_format, "json");
        let engine = config.monitor.to_engine_config();
        assert_eq!(engine.probe_interval, Duration::from_secs(30));
        assert_eq!(engine.cooldown_window, Duration::from_secs(45));
        assert_eq!(engine.max_retries, 5);
        assert_eq!(engine.max_concurrent_probes, 25);

        let alert = config.alert.as_ref().unwrap();
        assert_eq!(alert.webhook_url, "https://hooks.example.com/hostwatch");
        assert_eq!(alert.secret.as_deref(), Some("my-key"));
        assert_eq!(alert.timeout_ms, 3000);
        assert_eq!(alert.max_retries, 2); // default

        let t1 = config.target[0].to_target();
        assert_eq!(t1.port, Some(8443));
        assert_eq!(t1.services.len(), 2);
        assert_eq!(t1.service_name(22), "ssh");

        let t2 = config.target[1].to_target();
        assert_eq!(t2.check, CheckKind::Tcp);
        assert_eq!(t2.port, Some(5432));
    }

    #[test]
    fn validate_rejects_duplicate_target_ids() {
        let toml = r#"
[[target]]
id = 7
name = "a"
address = "a.example.com"
check = "icmp"

[[target]]
id = 7
name = "b"
address = "b.example.com"
check = "icmp"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("Duplicate target ID"), "{}", err);
    }

    #[test]
    fn validate_rejects_empty_address() {
        let toml = r#"
[[target]]
id = 1
name = "a"
address = ""
check = "tcp"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("empty address"), "{}", err);
    }

    #[test]
    fn validate_rejects_duplicate_service_ports() {
        let toml = r#"
[[target]]
id = 1
name = "a"
address = "a.example.com"
check = "icmp"
services = [
  { name = "ssh", port = 22 },
  { name = "also-ssh", port = 22 },
]
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("Duplicate service ports"), "{}", err);
    }

    #[test]
    fn validate_rejects_invalid_webhook_url() {
        let toml = r#"
[alert]
webhook_url = "not-valid"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("Invalid webhook URL"), "{}", err);
    }

    #[test]
    fn validate_rejects_invalid_log_format() {
        let toml = r#"
[monitor]
log_format = "xml"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("Invalid log_format"), "{}", err);
    }
}
