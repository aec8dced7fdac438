use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;

use crate::db::StoreError;
use crate::reminders::domain::{
    Clock, EpochMillis, EventId, NotificationPreference, ReminderId, ReminderPlanner,
    ScheduledReminder,
};
use crate::reminders::store::DynReminderStore;
use crate::reminders::wakeup::WakeupService;

#[derive(Debug, Error)]
pub enum ReminderError {
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RestoreSummary {
    /// Wake-ups re-registered at their original time.
    pub registered: usize,
    /// Overdue reminders fired late, at most one per lesson.
    pub caught_up: usize,
    pub discarded: usize,
}

type EventLocks = Mutex<HashMap<EventId, Arc<tokio::sync::Mutex<()>>>>;

/// Turns lesson bookings into durable reminders and wake-ups.
///
/// Operations on the same event are serialized; different events proceed
/// independently.
///
/// Cancellation is best effort against an imminent wake-up: a wake-up that
/// has already claimed its reminder will still deliver it.
pub struct ReminderScheduler {
    store: DynReminderStore,
    wakeups: Arc<dyn WakeupService>,
    clock: Arc<dyn Clock>,
    locks: EventLocks,
}

impl ReminderScheduler {
    pub fn new(
        store: DynReminderStore,
        wakeups: Arc<dyn WakeupService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            wakeups,
            clock,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Register reminders for a lesson. Whatever was stored for the event
    /// before is replaced, so offsets the new preferences disable are
    /// dropped along with their wake-ups.
    pub async fn schedule(
        &self,
        event_id: &EventId,
        event_at: EpochMillis,
        preferences: &NotificationPreference,
    ) -> Result<Vec<ScheduledReminder>, ReminderError> {
        let reminders = self.replace(event_id, event_at, preferences).await?;
        tracing::info!("Scheduled {} reminder(s) for {}", reminders.len(), event_id);
        Ok(reminders)
    }

    /// Replace every reminder of a lesson with a freshly planned set, e.g.
    /// after the lesson moved.
    pub async fn reschedule(
        &self,
        event_id: &EventId,
        event_at: EpochMillis,
        preferences: &NotificationPreference,
    ) -> Result<Vec<ScheduledReminder>, ReminderError> {
        let reminders = self.replace(event_id, event_at, preferences).await?;
        tracing::info!(
            "Rescheduled {} with {} reminder(s)",
            event_id,
            reminders.len()
        );
        Ok(reminders)
    }

    /// Drop every reminder of a lesson. Returns how many were removed;
    /// cancelling an event with no reminders is a no-op.
    pub async fn cancel(&self, event_id: &EventId) -> Result<usize, ReminderError> {
        let guard = self.lock_event(event_id).await;

        let result: Result<usize, ReminderError> = async {
            let removed = self.store.remove_for_event(event_id).await?;
            for id in &removed {
                self.cancel_wakeup(id).await;
            }
            Ok(removed.len())
        }
        .await;

        self.release(event_id, guard);
        if let Ok(count) = &result {
            if *count > 0 {
                tracing::info!("Cancelled {} reminder(s) for {}", count, event_id);
            }
        }
        result
    }

    pub async fn pending(&self, event_id: &EventId) -> Result<Vec<ScheduledReminder>, ReminderError> {
        Ok(self.store.list_for_event(event_id).await?)
    }

    /// Re-register wake-ups for every stored reminder, e.g. after a restart.
    ///
    /// Reminders whose lesson has already started are discarded. For a
    /// lesson still ahead, only the latest of the reminders that came due
    /// while nothing was running fires, re-worded for the time actually
    /// left; the older overdue ones are discarded.
    pub async fn restore(&self) -> Result<RestoreSummary, ReminderError> {
        let now = self.clock.now_millis();
        let mut summary = RestoreSummary::default();

        let mut by_event: BTreeMap<EventId, Vec<ScheduledReminder>> = BTreeMap::new();
        for reminder in self.store.list_pending().await? {
            by_event
                .entry(reminder.event_id.clone())
                .or_default()
                .push(reminder);
        }

        for (event_id, reminders) in by_event {
            let guard = self.lock_event(&event_id).await;
            let result = self.restore_event(reminders, now, &mut summary).await;
            self.release(&event_id, guard);
            result?;
        }

        tracing::info!(
            "Restored {} reminder(s), {} caught up, discarded {}",
            summary.registered,
            summary.caught_up,
            summary.discarded
        );
        Ok(summary)
    }

    // `reminders` all belong to one event, soonest first
    async fn restore_event(
        &self,
        reminders: Vec<ScheduledReminder>,
        now: EpochMillis,
        summary: &mut RestoreSummary,
    ) -> Result<(), ReminderError> {
        let (mut overdue, upcoming): (Vec<_>, Vec<_>) =
            reminders.into_iter().partition(|r| r.fire_at <= now);

        let started = overdue.iter().chain(&upcoming).any(|r| r.event_at <= now);
        if started {
            for reminder in overdue.iter().chain(&upcoming) {
                self.discard(reminder, "lesson already started", summary).await?;
            }
            return Ok(());
        }

        if let Some(latest) = overdue.pop() {
            for reminder in &overdue {
                self.discard(reminder, "superseded by a later overdue reminder", summary)
                    .await?;
            }
            let caught_up = ReminderPlanner::catch_up(&latest, now);
            self.store.upsert(std::slice::from_ref(&caught_up)).await?;
            self.register(&caught_up).await;
            summary.caught_up += 1;
        }

        self.register_all(&upcoming).await;
        summary.registered += upcoming.len();
        Ok(())
    }

    async fn discard(
        &self,
        reminder: &ScheduledReminder,
        reason: &str,
        summary: &mut RestoreSummary,
    ) -> Result<(), ReminderError> {
        if self.store.take(&reminder.reminder_id).await?.is_some() {
            tracing::warn!(
                "Discarding reminder {} for {}: {}",
                reminder.reminder_id,
                reminder.event_id,
                reason
            );
            summary.discarded += 1;
        }
        Ok(())
    }

    async fn replace(
        &self,
        event_id: &EventId,
        event_at: EpochMillis,
        preferences: &NotificationPreference,
    ) -> Result<Vec<ScheduledReminder>, ReminderError> {
        validate(event_id)?;
        let guard = self.lock_event(event_id).await;

        let result: Result<Vec<ScheduledReminder>, ReminderError> = async {
            let reminders = self.plan(event_id, event_at, preferences);
            let previous = self.store.replace_for_event(event_id, &reminders).await?;

            let kept: HashSet<&ReminderId> = reminders.iter().map(|r| &r.reminder_id).collect();
            for id in previous.iter().filter(|id| !kept.contains(id)) {
                self.cancel_wakeup(id).await;
            }
            self.register_all(&reminders).await;
            Ok(reminders)
        }
        .await;

        self.release(event_id, guard);
        result
    }

    fn plan(
        &self,
        event_id: &EventId,
        event_at: EpochMillis,
        preferences: &NotificationPreference,
    ) -> Vec<ScheduledReminder> {
        ReminderPlanner::plan(event_id, event_at, preferences, self.clock.now_millis())
    }

    async fn register_all(&self, reminders: &[ScheduledReminder]) {
        for reminder in reminders {
            self.register(reminder).await;
        }
    }

    // The durable record stays in place on failure, so the next restore retries
    async fn register(&self, reminder: &ScheduledReminder) {
        if let Err(e) = self
            .wakeups
            .register_wakeup(&reminder.reminder_id, reminder.fire_at)
            .await
        {
            tracing::error!(
                "Failed to register wake-up for reminder {}: {}",
                reminder.reminder_id,
                e
            );
        }
    }

    async fn cancel_wakeup(&self, reminder_id: &ReminderId) {
        if let Err(e) = self.wakeups.cancel_wakeup(reminder_id).await {
            tracing::warn!("Failed to cancel wake-up for {}: {}", reminder_id, e);
        }
    }

    async fn lock_event(&self, event_id: &EventId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(event_id.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }

    fn release(&self, event_id: &EventId, guard: OwnedMutexGuard<()>) {
        drop(guard);
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks
            .get(event_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(event_id);
        }
    }
}

fn validate(event_id: &EventId) -> Result<(), ReminderError> {
    if event_id.as_str().trim().is_empty() {
        return Err(ReminderError::InvalidEvent("event id is required".to_string()));
    }
    Ok(())
}
