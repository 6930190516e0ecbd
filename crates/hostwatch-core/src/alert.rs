//! Alert dispatch.
//!
//! The engine persists a notification record, then pushes an [`Alert`] through
//! an mpsc channel. The [`AlertDispatcher`] reads from that channel and hands
//! the formatted text to the delivery collaborator behind [`Notifier`].
//! Delivery failures are logged here and never retried by the core; a
//! collaborator implementation may retry internally, as [`WebhookNotifier`]
//! does.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Serialize;
use sha2::Sha256;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::target::{ProbeOutcome, Target, TargetStatus};

#[derive(Debug, Error)]
#[error("delivery failed: {0}")]
pub struct DeliveryError(pub String);

/// Outbound delivery boundary: one call, one user, one rendered message.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: i64, message: &str) -> Result<(), DeliveryError>;
}

/// A user-visible alert produced by the engine after the cooldown gate opens.
#[derive(Debug, Clone)]
pub struct Alert {
    pub target_id: i64,
    pub user_id: i64,
    pub status: TargetStatus,
    pub message: String,
}

pub fn alert_channel() -> (mpsc::UnboundedSender<Alert>, mpsc::UnboundedReceiver<Alert>) {
    mpsc::unbounded_channel()
}

/// Renders a response time the way operators read it: sub-100ms in
/// milliseconds, everything else in seconds.
pub fn format_response_time(latency: Option<Duration>) -> String {
    match latency {
        None => "N/A".to_string(),
        Some(d) if d < Duration::from_millis(100) => format!("{} ms", d.as_millis()),
        Some(d) => format!("{:.2} s", d.as_secs_f64()),
    }
}

/// Builds the alert message body: target identity, verdict, response time,
/// error verbatim, per-service breakdown, and downtime bookkeeping on
/// recovery.
pub fn format_alert(
    target: &Target,
    status: TargetStatus,
    outcome: &ProbeOutcome,
    downtime_start: Option<DateTime<Utc>>,
) -> String {
    let mut lines = vec![
        format!("Target: {}", target.name),
        format!("Address: {}", target.address),
        format!("Status: {}", status),
        format!(
            "Response time: {}",
            format_response_time(outcome.online.then_some(outcome.latency))
        ),
        format!("Checked: {}", outcome.timestamp.format("%Y-%m-%d %H:%M:%S UTC")),
    ];

    if let Some(error) = &outcome.error {
        lines.push(format!("Error: {}", error));
    }

    match (status, downtime_start) {
        (TargetStatus::Online, Some(since)) => {
            lines.push(format!(
                "Downtime: since {}, lasted {}",
                since.format("%Y-%m-%d %H:%M:%S UTC"),
                format_downtime(outcome.timestamp - since),
            ));
        }
        (TargetStatus::Offline, Some(since)) => {
            lines.push(format!("Down since: {}", since.format("%Y-%m-%d %H:%M:%S UTC")));
        }
        _ => {}
    }

    if !outcome.services.is_empty() {
        lines.push("Services:".to_string());
        let mut ports: Vec<_> = outcome.services.iter().collect();
        ports.sort_by_key(|(port, _)| **port);
        for (port, up) in ports {
            let verdict = if *up { "up" } else { "down" };
            lines.push(format!("  {}: {}", target.service_name(*port), verdict));
        }
    }

    lines.join("\n")
}

fn format_downtime(elapsed: chrono::Duration) -> String {
    let secs = elapsed.num_seconds().max(0);
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

/// Background task draining the alert channel into the notifier.
/// Returns when all senders are dropped.
pub struct AlertDispatcher {
    rx: mpsc::UnboundedReceiver<Alert>,
    notifier: std::sync::Arc<dyn Notifier>,
}

impl AlertDispatcher {
    pub fn new(rx: mpsc::UnboundedReceiver<Alert>, notifier: std::sync::Arc<dyn Notifier>) -> Self {
        Self { rx, notifier }
    }

    pub async fn run(mut self) {
        debug!("Alert dispatcher started");

        while let Some(alert) = self.rx.recv().await {
            match self.notifier.notify(alert.user_id, &alert.message).await {
                Ok(()) => {
                    debug!(
                        target_id = alert.target_id,
                        user_id = alert.user_id,
                        status = %alert.status,
                        "Alert delivered"
                    );
                }
                Err(e) => {
                    warn!(
                        target_id = alert.target_id,
                        user_id = alert.user_id,
                        error = %e,
                        "Alert delivery failed"
                    );
                }
            }
        }

        debug!("Alert dispatcher shutting down");
    }
}

/// Webhook-based delivery collaborator: JSON POST per alert, optionally
/// HMAC-SHA256 signed, with its own internal retry/backoff.
pub struct WebhookNotifier {
    client: Client,
    url: String,
    secret: Option<String>,
    timeout: Duration,
    max_retries: u32,
}

#[derive(Serialize)]
struct WebhookBody<'a> {
    user_id: i64,
    text: &'a str,
}

impl WebhookNotifier {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            secret: None,
            timeout: Duration::from_millis(5000),
            max_retries: 2,
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, user_id: i64, message: &str) -> Result<(), DeliveryError> {
        let body = serde_json::to_vec(&WebhookBody {
            user_id,
            text: message,
        })
        .map_err(|e| DeliveryError(e.to_string()))?;

        let mut last_error = String::new();

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = Duration::from_millis(500 * 2u64.pow(attempt - 1));
                tokio::time::sleep(backoff).await;
            }

            let mut req = self
                .client
                .post(&self.url)
                .header("Content-Type", "application/json")
                .header("User-Agent", "hostwatch/0.1")
                .timeout(self.timeout)
                .body(body.clone());

            if let Some(secret) = &self.secret {
                let signature = sign_payload(&body, secret);
                req = req.header("X-Hostwatch-Signature-256", format!("sha256={}", signature));
            }

            match req.send().await {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => {
                    let status = resp.status();
                    last_error = format!("HTTP {} from {}", status, self.url);
                    if status.as_u16() >= 400 && status.as_u16() < 500 && status.as_u16() != 429 {
                        return Err(DeliveryError(last_error));
                    }
                }
                Err(e) => {
                    last_error = format!("request to {} failed: {}", self.url, e);
                }
            }
        }

        Err(DeliveryError(last_error))
    }
}

fn sign_payload(body: &[u8], secret: &str) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}
