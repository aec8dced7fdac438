use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;

use crate::reminders::domain::{EventId, ReminderId};

#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("Notification rejected: {0}")]
    Rejected(String),

    #[error("Notification surface unavailable: {0}")]
    Unavailable(String),
}

/// Platform notification surface.
#[async_trait]
pub trait NotificationSurface: Send + Sync {
    /// Show a notification. Posting again with the same id replaces the
    /// visible notification instead of adding a second one.
    async fn post(&self, notification_id: &str, title: &str, body: &str)
        -> Result<(), SurfaceError>;

    async fn permission_granted(&self) -> bool;
}

/// Terminal outcome of firing a reminder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryResult {
    Delivered,
    SuppressedNoPermission,
    Failed,
}

impl DeliveryResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delivered => "DELIVERED",
            Self::SuppressedNoPermission => "SUPPRESSED_NO_PERMISSION",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for DeliveryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub reminder_id: ReminderId,
    pub event_id: EventId,
    pub result: DeliveryResult,
    pub detail: Option<String>,
}

/// Where suppressed and failed deliveries are reported.
pub trait DiagnosticsSink: Send + Sync {
    fn report(&self, report: &DeliveryReport);
}

/// Reports through `tracing`.
pub struct TracingDiagnostics;

impl DiagnosticsSink for TracingDiagnostics {
    fn report(&self, report: &DeliveryReport) {
        let detail = report.detail.as_deref().unwrap_or("-");
        match report.result {
            DeliveryResult::Delivered => tracing::debug!(
                "Reminder {} for {} delivered",
                report.reminder_id,
                report.event_id
            ),
            DeliveryResult::SuppressedNoPermission => tracing::warn!(
                "Reminder {} for {} suppressed: notification permission not granted",
                report.reminder_id,
                report.event_id
            ),
            DeliveryResult::Failed => tracing::error!(
                "Reminder {} for {} failed: {}",
                report.reminder_id,
                report.event_id,
                detail
            ),
        }
    }
}

/// Fires a single reminder at its wake-up.
pub struct ReminderDeliveryHandler {
    surface: Arc<dyn NotificationSurface>,
    diagnostics: Arc<dyn DiagnosticsSink>,
}

impl ReminderDeliveryHandler {
    pub fn new(surface: Arc<dyn NotificationSurface>, diagnostics: Arc<dyn DiagnosticsSink>) -> Self {
        Self {
            surface,
            diagnostics,
        }
    }

    /// Deliver a reminder. Never fails and never panics: every outcome,
    /// including a panicking surface, ends in a terminal `DeliveryResult`.
    pub async fn on_fire(
        &self,
        reminder_id: &ReminderId,
        event_id: &EventId,
        title: &str,
        body: &str,
    ) -> DeliveryResult {
        self.deliver(reminder_id, event_id, title, body).await.result
    }

    /// Same as `on_fire`, keeping the error or panic message for the audit trail.
    pub async fn deliver(
        &self,
        reminder_id: &ReminderId,
        event_id: &EventId,
        title: &str,
        body: &str,
    ) -> DeliveryReport {
        let attempt = AssertUnwindSafe(self.attempt(reminder_id, title, body))
            .catch_unwind()
            .await;

        let (result, detail) = match attempt {
            Ok(Ok(result)) => (result, None),
            Ok(Err(e)) => (DeliveryResult::Failed, Some(e.to_string())),
            Err(panic) => (
                DeliveryResult::Failed,
                Some(format!("notification surface panicked: {}", panic_message(&*panic))),
            ),
        };

        let report = DeliveryReport {
            reminder_id: reminder_id.clone(),
            event_id: event_id.clone(),
            result,
            detail,
        };
        self.diagnostics.report(&report);
        report
    }

    async fn attempt(
        &self,
        reminder_id: &ReminderId,
        title: &str,
        body: &str,
    ) -> Result<DeliveryResult, SurfaceError> {
        if !self.surface.permission_granted().await {
            return Ok(DeliveryResult::SuppressedNoPermission);
        }
        self.surface.post(reminder_id.as_str(), title, body).await?;
        Ok(DeliveryResult::Delivered)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
