//! Storage collaborator boundary.
//!
//! The engine only reads target identity and writes status fields; everything
//! behind [`TargetStore`] is owned by the registration/persistence layer.
//! [`MemoryStore`] is the in-tree implementation, used by tests and the CLI.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::target::{Target, TargetStats, TargetStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("target {0} not found")]
    NotFound(i64),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// One logical status write, applied atomically from the engine's view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: TargetStatus,
    pub checked_at: DateTime<Utc>,
    pub latency: Option<Duration>,
    pub error: Option<String>,
    #[serde(default)]
    pub services: HashMap<u16, bool>,
}

/// Persisted record of an alert decision, created before dispatch so a
/// delivery failure is distinguishable from a persistence failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: String,
    pub target_id: i64,
    pub user_id: i64,
    pub status: TargetStatus,
    pub timestamp: DateTime<Utc>,
    pub details: serde_json::Value,
}

impl NotificationRecord {
    pub fn new(
        target_id: i64,
        user_id: i64,
        status: TargetStatus,
        details: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            target_id,
            user_id,
            status,
            timestamp: Utc::now(),
            details,
        }
    }
}

/// Trait for the record store the engine reads targets from and writes
/// probe results back to.
#[async_trait]
pub trait TargetStore: Send + Sync {
    async fn list_targets(&self) -> Result<Vec<Target>, StoreError>;
    async fn get_target(&self, id: i64) -> Result<Target, StoreError>;
    async fn update_status(&self, id: i64, update: StatusUpdate) -> Result<(), StoreError>;
    async fn update_stats(&self, id: i64, stats: TargetStats) -> Result<(), StoreError>;
    async fn record_notification(&self, record: NotificationRecord) -> Result<(), StoreError>;
}

/// DashMap-backed store.
#[derive(Default)]
pub struct MemoryStore {
    targets: DashMap<i64, Target>,
    stats: DashMap<i64, TargetStats>,
    notifications: Mutex<Vec<NotificationRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_targets(targets: Vec<Target>) -> Self {
        let store = Self::new();
        for target in targets {
            store.targets.insert(target.id, target);
        }
        store
    }

    pub fn insert(&self, target: Target) {
        self.targets.insert(target.id, target);
    }

    pub fn remove(&self, id: i64) -> Option<Target> {
        self.targets.remove(&id).map(|(_, t)| t)
    }

    pub fn stats_for(&self, id: i64) -> Option<TargetStats> {
        self.stats.get(&id).map(|s| *s)
    }

    pub async fn notifications(&self) -> Vec<NotificationRecord> {
        self.notifications.lock().await.clone()
    }
}

#[async_trait]
impl TargetStore for MemoryStore {
    async fn list_targets(&self) -> Result<Vec<Target>, StoreError> {
        Ok(self.targets.iter().map(|e| e.value().clone()).collect())
    }

    async fn get_target(&self, id: i64) -> Result<Target, StoreError> {
        self.targets
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(StoreError::NotFound(id))
    }

    async fn update_status(&self, id: i64, update: StatusUpdate) -> Result<(), StoreError> {
        let mut target = self.targets.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        target.status = update.status;
        target.last_checked = Some(update.checked_at);
        target.last_latency = update.latency;
        target.last_error = update.error;
        Ok(())
    }

    async fn update_stats(&self, id: i64, stats: TargetStats) -> Result<(), StoreError> {
        if !self.targets.contains_key(&id) {
            return Err(StoreError::NotFound(id));
        }
        self.stats.insert(id, stats);
        Ok(())
    }

    async fn record_notification(&self, record: NotificationRecord) -> Result<(), StoreError> {
        self.notifications.lock().await.push(record);
        Ok(())
    }
}
