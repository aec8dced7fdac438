use async_trait::async_trait;
use rusqlite::params;
use std::sync::Arc;

use crate::db::StoreError;
use crate::reminders::domain::{EpochMillis, EventId};
use crate::state::DbPool;

/// A lesson whose reminders were scheduled on behalf of a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LessonBooking {
    pub event_id: EventId,
    pub user_id: String,
    pub event_at: EpochMillis,
    /// False when the booking was scheduled with explicit preferences.
    pub follows_preferences: bool,
}

/// Remembers who booked which lesson.
#[async_trait]
pub trait BookingRepository: Send + Sync {
    /// Insert or overwrite the booking for its event.
    async fn record(&self, booking: &LessonBooking) -> Result<(), StoreError>;

    /// Returns whether a booking was removed.
    async fn remove(&self, event_id: &EventId) -> Result<bool, StoreError>;

    /// A user's lessons after `now` that follow their stored preferences.
    async fn upcoming_following_preferences(
        &self,
        user_id: &str,
        now: EpochMillis,
    ) -> Result<Vec<LessonBooking>, StoreError>;
}

pub struct SqliteBookingRepository {
    pool: DbPool,
}

impl SqliteBookingRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BookingRepository for SqliteBookingRepository {
    async fn record(&self, booking: &LessonBooking) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO lesson_bookings (event_id, user_id, event_at, follows_preferences, updated_at)
             VALUES (?1, ?2, ?3, ?4, datetime('now'))
             ON CONFLICT(event_id) DO UPDATE SET
               user_id = excluded.user_id,
               event_at = excluded.event_at,
               follows_preferences = excluded.follows_preferences,
               updated_at = excluded.updated_at",
            params![
                booking.event_id.as_str(),
                booking.user_id,
                booking.event_at,
                booking.follows_preferences
            ],
        )?;
        Ok(())
    }

    async fn remove(&self, event_id: &EventId) -> Result<bool, StoreError> {
        let conn = self.pool.get()?;
        let removed = conn.execute(
            "DELETE FROM lesson_bookings WHERE event_id = ?1",
            params![event_id.as_str()],
        )?;
        Ok(removed > 0)
    }

    async fn upcoming_following_preferences(
        &self,
        user_id: &str,
        now: EpochMillis,
    ) -> Result<Vec<LessonBooking>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT event_id, user_id, event_at, follows_preferences FROM lesson_bookings
             WHERE user_id = ?1 AND event_at > ?2 AND follows_preferences = 1
             ORDER BY event_at ASC",
        )?;
        let bookings = stmt
            .query_map(params![user_id, now], |row| {
                Ok(LessonBooking {
                    event_id: EventId::new(row.get::<_, String>(0)?),
                    user_id: row.get(1)?,
                    event_at: row.get(2)?,
                    follows_preferences: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(bookings)
    }
}

pub type DynBookingRepository = Arc<dyn BookingRepository>;
