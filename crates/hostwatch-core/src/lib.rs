#![forbid(unsafe_code)]

pub mod alert;
pub mod config;
pub mod cooldown;
pub mod engine;
pub mod history;
pub mod probe;
pub mod resolver;
pub mod store;
pub mod target;

pub use alert::{
    alert_channel, format_alert, format_response_time, Alert, AlertDispatcher, DeliveryError,
    Notifier, WebhookNotifier,
};
pub use config::EngineConfig;
pub use cooldown::CooldownGate;
pub use engine::{Engine, EngineState};
pub use history::HistoryStore;
pub use probe::{Probe, ProbeError, Prober};
pub use resolver::{DnsError, DnsResolver, Resolve};
pub use store::{MemoryStore, NotificationRecord, StatusUpdate, StoreError, TargetStore};
pub use target::{CheckKind, ProbeOutcome, ServicePort, Target, TargetStats, TargetStatus};
