use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::reminders::delivery::{DeliveryResult, ReminderDeliveryHandler};
use crate::reminders::domain::{Clock, ReminderId};
use crate::reminders::store::DynReminderStore;
use crate::reminders::wakeup::WakeupReceiver;

/// Turns wake-ups into deliveries.
///
/// Each wake-up first claims its reminder from the store, so a reminder is
/// delivered at most once and a cancelled reminder is skipped. Only a
/// reminder whose fire time has been reached can be claimed; an early
/// wake-up leaves it stored for its own timer. Delivery runs on its own
/// task; the wake-up loop never waits for it.
#[derive(Clone)]
pub struct ReminderDispatcher {
    store: DynReminderStore,
    handler: Arc<ReminderDeliveryHandler>,
    clock: Arc<dyn Clock>,
}

impl ReminderDispatcher {
    pub fn new(
        store: DynReminderStore,
        handler: Arc<ReminderDeliveryHandler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            handler,
            clock,
        }
    }

    /// Consume wake-ups until the sending side goes away.
    pub fn spawn(self, mut wakeups: WakeupReceiver) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(reminder_id) = wakeups.recv().await {
                self.fire(reminder_id).await;
            }
            tracing::info!("Wake-up channel closed, reminder dispatcher stopping");
        })
    }

    /// Claim and deliver one reminder. Returns the delivery task, or `None`
    /// when there was nothing to deliver.
    pub async fn fire(&self, reminder_id: ReminderId) -> Option<JoinHandle<DeliveryResult>> {
        let now = self.clock.now_millis();
        let reminder = match self.store.take_due(&reminder_id, now).await {
            Ok(Some(reminder)) => reminder,
            Ok(None) => {
                tracing::debug!(
                    "Reminder {} not due or no longer scheduled, skipping",
                    reminder_id
                );
                return None;
            }
            Err(e) => {
                tracing::error!("Failed to claim reminder {}: {}", reminder_id, e);
                return None;
            }
        };

        let store = self.store.clone();
        let handler = self.handler.clone();
        Some(tokio::spawn(async move {
            let report = handler
                .deliver(
                    &reminder.reminder_id,
                    &reminder.event_id,
                    &reminder.title,
                    &reminder.body,
                )
                .await;
            let result = report.result;

            if let Err(e) = store
                .log_delivery(&reminder, result, report.detail.as_deref())
                .await
            {
                tracing::warn!(
                    "Failed to record delivery of {}: {}",
                    reminder.reminder_id,
                    e
                );
            }
            tracing::info!(
                "Reminder {} for {} (due {}) finished as {}",
                reminder.reminder_id,
                reminder.event_id,
                reminder
                    .fire_at_utc()
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| reminder.fire_at.to_string()),
                result
            );
            result
        }))
    }
}
