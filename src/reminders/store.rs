// Durable reminder records - survive restarts, re-registered on startup
use async_trait::async_trait;
use rusqlite::{params, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::sync::Arc;

use crate::db::StoreError;
use crate::reminders::delivery::DeliveryResult;
use crate::reminders::domain::{EpochMillis, EventId, ReminderId, ScheduledReminder};
use crate::state::DbPool;

#[async_trait]
pub trait ReminderStore: Send + Sync {
    /// Insert or overwrite reminders by id.
    async fn upsert(&self, reminders: &[ScheduledReminder]) -> Result<(), StoreError>;

    /// Atomically swap an event's reminders for a new set. Returns the ids
    /// that were stored before the swap.
    async fn replace_for_event(
        &self,
        event_id: &EventId,
        reminders: &[ScheduledReminder],
    ) -> Result<Vec<ReminderId>, StoreError>;

    /// Remove all of an event's reminders, returning their ids.
    async fn remove_for_event(&self, event_id: &EventId) -> Result<Vec<ReminderId>, StoreError>;

    async fn list_for_event(&self, event_id: &EventId)
        -> Result<Vec<ScheduledReminder>, StoreError>;

    /// Every stored reminder, soonest first.
    async fn list_pending(&self) -> Result<Vec<ScheduledReminder>, StoreError>;

    /// Claim a reminder for delivery by deleting it. Only one caller can
    /// ever get `Some` for a given id.
    async fn take(&self, reminder_id: &ReminderId) -> Result<Option<ScheduledReminder>, StoreError>;

    /// Like `take`, but only claims the reminder once its fire time is at or
    /// before `now`. A reminder that is not yet due stays stored.
    async fn take_due(
        &self,
        reminder_id: &ReminderId,
        now: EpochMillis,
    ) -> Result<Option<ScheduledReminder>, StoreError>;

    /// Record a delivery outcome in the audit trail.
    async fn log_delivery(
        &self,
        reminder: &ScheduledReminder,
        result: DeliveryResult,
        detail: Option<&str>,
    ) -> Result<(), StoreError>;
}

/// SQLite implementation
pub struct SqliteReminderStore {
    pool: DbPool,
}

impl SqliteReminderStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const REMINDER_COLUMNS: &str = "reminder_id, event_id, kind, fire_at, event_at, title, body";

fn reminder_from_row(row: &Row<'_>) -> rusqlite::Result<ScheduledReminder> {
    let kind: String = row.get(2)?;
    let kind = kind.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into())
    })?;
    Ok(ScheduledReminder {
        reminder_id: ReminderId::new(row.get::<_, String>(0)?),
        event_id: EventId::new(row.get::<_, String>(1)?),
        kind,
        fire_at: row.get(3)?,
        event_at: row.get(4)?,
        title: row.get(5)?,
        body: row.get(6)?,
    })
}

fn insert_all(tx: &Transaction<'_>, reminders: &[ScheduledReminder]) -> Result<(), StoreError> {
    let mut stmt = tx.prepare(
        "INSERT INTO scheduled_reminders (reminder_id, event_id, kind, fire_at, event_at, title, body)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(reminder_id) DO UPDATE SET
           event_id = excluded.event_id,
           kind = excluded.kind,
           fire_at = excluded.fire_at,
           event_at = excluded.event_at,
           title = excluded.title,
           body = excluded.body",
    )?;
    for r in reminders {
        stmt.execute(params![
            r.reminder_id.as_str(),
            r.event_id.as_str(),
            r.kind.as_str(),
            r.fire_at,
            r.event_at,
            r.title,
            r.body
        ])?;
    }
    Ok(())
}

fn delete_event(tx: &Transaction<'_>, event_id: &EventId) -> Result<Vec<ReminderId>, StoreError> {
    let mut stmt =
        tx.prepare("DELETE FROM scheduled_reminders WHERE event_id = ?1 RETURNING reminder_id")?;
    let ids = stmt
        .query_map(params![event_id.as_str()], |row| {
            row.get::<_, String>(0).map(ReminderId::new)
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

#[async_trait]
impl ReminderStore for SqliteReminderStore {
    async fn upsert(&self, reminders: &[ScheduledReminder]) -> Result<(), StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        insert_all(&tx, reminders)?;
        tx.commit()?;
        Ok(())
    }

    async fn replace_for_event(
        &self,
        event_id: &EventId,
        reminders: &[ScheduledReminder],
    ) -> Result<Vec<ReminderId>, StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let previous = delete_event(&tx, event_id)?;
        insert_all(&tx, reminders)?;
        tx.commit()?;
        Ok(previous)
    }

    async fn remove_for_event(&self, event_id: &EventId) -> Result<Vec<ReminderId>, StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let removed = delete_event(&tx, event_id)?;
        tx.commit()?;
        Ok(removed)
    }

    async fn list_for_event(
        &self,
        event_id: &EventId,
    ) -> Result<Vec<ScheduledReminder>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM scheduled_reminders WHERE event_id = ?1 ORDER BY fire_at ASC",
            REMINDER_COLUMNS
        ))?;
        let reminders = stmt
            .query_map(params![event_id.as_str()], reminder_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(reminders)
    }

    async fn list_pending(&self) -> Result<Vec<ScheduledReminder>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM scheduled_reminders ORDER BY fire_at ASC",
            REMINDER_COLUMNS
        ))?;
        let reminders = stmt
            .query_map([], reminder_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(reminders)
    }

    async fn take(&self, reminder_id: &ReminderId) -> Result<Option<ScheduledReminder>, StoreError> {
        let conn = self.pool.get()?;
        let reminder = conn
            .query_row(
                &format!(
                    "DELETE FROM scheduled_reminders WHERE reminder_id = ?1 RETURNING {}",
                    REMINDER_COLUMNS
                ),
                params![reminder_id.as_str()],
                reminder_from_row,
            )
            .optional()?;
        Ok(reminder)
    }

    async fn take_due(
        &self,
        reminder_id: &ReminderId,
        now: EpochMillis,
    ) -> Result<Option<ScheduledReminder>, StoreError> {
        let conn = self.pool.get()?;
        let reminder = conn
            .query_row(
                &format!(
                    "DELETE FROM scheduled_reminders WHERE reminder_id = ?1 AND fire_at <= ?2
                     RETURNING {}",
                    REMINDER_COLUMNS
                ),
                params![reminder_id.as_str(), now],
                reminder_from_row,
            )
            .optional()?;
        Ok(reminder)
    }

    async fn log_delivery(
        &self,
        reminder: &ScheduledReminder,
        result: DeliveryResult,
        detail: Option<&str>,
    ) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO reminder_deliveries (reminder_id, event_id, outcome, detail)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                reminder.reminder_id.as_str(),
                reminder.event_id.as_str(),
                result.as_str(),
                detail
            ],
        )?;
        Ok(())
    }
}

pub type DynReminderStore = Arc<dyn ReminderStore>;
