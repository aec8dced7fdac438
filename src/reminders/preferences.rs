use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;

use crate::db::StoreError;
use crate::reminders::domain::{NotificationPreference, OffsetKind};
use crate::state::DbPool;

/// Per-user reminder preferences.
#[async_trait]
pub trait PreferenceRepository: Send + Sync {
    /// Stored preferences, or the configured defaults for users who never set any.
    async fn read_preferences(&self, user_id: &str) -> Result<NotificationPreference, StoreError>;

    async fn write_preferences(
        &self,
        user_id: &str,
        preferences: &NotificationPreference,
    ) -> Result<(), StoreError>;
}

pub struct SqlitePreferenceRepository {
    pool: DbPool,
    defaults: NotificationPreference,
}

impl SqlitePreferenceRepository {
    pub fn new(pool: DbPool, defaults: NotificationPreference) -> Self {
        Self { pool, defaults }
    }
}

#[async_trait]
impl PreferenceRepository for SqlitePreferenceRepository {
    async fn read_preferences(&self, user_id: &str) -> Result<NotificationPreference, StoreError> {
        let conn = self.pool.get()?;

        let stored = conn
            .query_row(
                "SELECT week_before, three_days_before, one_day_before
                 FROM notification_preferences WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(NotificationPreference::new(
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                    ))
                },
            )
            .optional()?;

        Ok(stored.unwrap_or(self.defaults))
    }

    async fn write_preferences(
        &self,
        user_id: &str,
        preferences: &NotificationPreference,
    ) -> Result<(), StoreError> {
        let conn = self.pool.get()?;

        conn.execute(
            "INSERT INTO notification_preferences (user_id, week_before, three_days_before, one_day_before, updated_at)
             VALUES (?1, ?2, ?3, ?4, datetime('now'))
             ON CONFLICT(user_id) DO UPDATE SET
               week_before = excluded.week_before,
               three_days_before = excluded.three_days_before,
               one_day_before = excluded.one_day_before,
               updated_at = excluded.updated_at",
            params![
                user_id,
                preferences.is_enabled(OffsetKind::WeekBefore),
                preferences.is_enabled(OffsetKind::ThreeDaysBefore),
                preferences.is_enabled(OffsetKind::OneDayBefore)
            ],
        )?;

        Ok(())
    }
}

pub type DynPreferenceRepository = Arc<dyn PreferenceRepository>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use tempfile::TempDir;

    fn create_test_repo(defaults: NotificationPreference) -> (SqlitePreferenceRepository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let pool = db::create_pool(&temp_dir.path().join("test.db")).unwrap();
        db::run_migrations(&pool).unwrap();
        (SqlitePreferenceRepository::new(pool, defaults), temp_dir)
    }

    #[tokio::test]
    async fn unknown_user_gets_configured_defaults() {
        let defaults = NotificationPreference::new(false, false, true);
        let (repo, _temp) = create_test_repo(defaults);

        assert_eq!(repo.read_preferences("student").await.unwrap(), defaults);
    }

    #[tokio::test]
    async fn written_preferences_override_defaults() {
        let (repo, _temp) = create_test_repo(NotificationPreference::all());
        let prefs = NotificationPreference::new(true, false, false);

        repo.write_preferences("student", &prefs).await.unwrap();
        assert_eq!(repo.read_preferences("student").await.unwrap(), prefs);

        repo.write_preferences("student", &NotificationPreference::none())
            .await
            .unwrap();
        assert_eq!(
            repo.read_preferences("student").await.unwrap(),
            NotificationPreference::none()
        );
    }
}
