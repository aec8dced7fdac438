// Repository pattern - isolates all database side effects for reviews
use async_trait::async_trait;
use rusqlite::{params, OptionalExtension, Row};
use std::sync::Arc;

use crate::db::StoreError;
use crate::reviews::domain::{Rating, RatingAggregate, ReviewRecord};
use crate::state::DbPool;

/// An aggregate together with the version it was read at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VersionedAggregate {
    pub aggregate: RatingAggregate,
    pub version: i64,
}

/// Review-row change committed together with an aggregate write.
#[derive(Debug, Clone, PartialEq)]
pub enum ReviewMutation {
    Insert(ReviewRecord),
    Update {
        review_id: String,
        rating: Rating,
        comment: String,
        edited_at: i64,
    },
    Delete {
        review_id: String,
    },
}

/// Document-store port for rating aggregates and the reviews behind them.
#[async_trait]
pub trait ReviewRepository: Send + Sync {
    /// Current aggregate for a user; an empty aggregate at version 0 if none exists.
    async fn read_aggregate(&self, user_id: &str) -> Result<VersionedAggregate, StoreError>;

    async fn load_review(
        &self,
        user_id: &str,
        review_id: &str,
    ) -> Result<Option<ReviewRecord>, StoreError>;

    /// Reviews for a user, newest first.
    async fn list_reviews(&self, user_id: &str) -> Result<Vec<ReviewRecord>, StoreError>;

    /// Write the aggregate and apply the review mutation in one transaction.
    ///
    /// Fails with `StoreError::Conflict` if the stored version is no longer
    /// `expected_version`. Returns the new version.
    async fn write_aggregate(
        &self,
        user_id: &str,
        expected_version: i64,
        aggregate: &RatingAggregate,
        mutation: Option<&ReviewMutation>,
    ) -> Result<i64, StoreError>;
}

/// SQLite implementation
pub struct SqliteReviewRepository {
    pool: DbPool,
}

impl SqliteReviewRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// Raw review row; validated before it leaves the repository.
struct ReviewRow {
    id: String,
    author_id: String,
    author_display_name: String,
    rating: i64,
    comment: String,
    created_at: i64,
    edited_at: Option<i64>,
}

impl ReviewRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            author_id: row.get(1)?,
            author_display_name: row.get(2)?,
            rating: row.get(3)?,
            comment: row.get(4)?,
            created_at: row.get(5)?,
            edited_at: row.get(6)?,
        })
    }

    fn into_record(self) -> Result<ReviewRecord, StoreError> {
        let rating = Rating::new(self.rating)
            .map_err(|e| StoreError::Corrupt(format!("review {}: {}", self.id, e)))?;
        Ok(ReviewRecord {
            id: self.id,
            author_id: self.author_id,
            author_display_name: self.author_display_name,
            rating,
            comment: self.comment,
            created_at: self.created_at,
            edited_at: self.edited_at,
        })
    }
}

const REVIEW_COLUMNS: &str =
    "id, author_id, author_display_name, rating, comment, created_at, edited_at";

#[async_trait]
impl ReviewRepository for SqliteReviewRepository {
    async fn read_aggregate(&self, user_id: &str) -> Result<VersionedAggregate, StoreError> {
        let conn = self.pool.get()?;

        let row: Option<([i64; 5], i64)> = conn
            .query_row(
                "SELECT stars_1, stars_2, stars_3, stars_4, stars_5, version
                 FROM rating_aggregates WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok((
                        [row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?],
                        row.get(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((raw, version)) = row else {
            return Ok(VersionedAggregate {
                aggregate: RatingAggregate::default(),
                version: 0,
            });
        };

        let mut histogram = [0u32; 5];
        for (slot, count) in histogram.iter_mut().zip(raw) {
            *slot = u32::try_from(count).map_err(|_| {
                StoreError::Corrupt(format!("aggregate for {} has count {}", user_id, count))
            })?;
        }

        Ok(VersionedAggregate {
            aggregate: RatingAggregate::from_histogram(histogram),
            version,
        })
    }

    async fn load_review(
        &self,
        user_id: &str,
        review_id: &str,
    ) -> Result<Option<ReviewRecord>, StoreError> {
        let conn = self.pool.get()?;

        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM reviews WHERE user_id = ?1 AND id = ?2",
                    REVIEW_COLUMNS
                ),
                params![user_id, review_id],
                ReviewRow::from_row,
            )
            .optional()?;

        row.map(ReviewRow::into_record).transpose()
    }

    async fn list_reviews(&self, user_id: &str) -> Result<Vec<ReviewRecord>, StoreError> {
        let conn = self.pool.get()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM reviews WHERE user_id = ?1 ORDER BY created_at DESC, id DESC",
            REVIEW_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![user_id], ReviewRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(ReviewRow::into_record).collect()
    }

    async fn write_aggregate(
        &self,
        user_id: &str,
        expected_version: i64,
        aggregate: &RatingAggregate,
        mutation: Option<&ReviewMutation>,
    ) -> Result<i64, StoreError> {
        let conn = self.pool.get()?;

        // ATOMIC TRANSACTION - version check, review row and aggregate together
        conn.execute("BEGIN IMMEDIATE", [])?;

        let result: Result<i64, StoreError> = (|| {
            let current: i64 = conn
                .query_row(
                    "SELECT version FROM rating_aggregates WHERE user_id = ?1",
                    params![user_id],
                    |row| row.get(0),
                )
                .optional()?
                .unwrap_or(0);

            if current != expected_version {
                return Err(StoreError::Conflict(format!(
                    "aggregate for {} moved from version {} to {}",
                    user_id, expected_version, current
                )));
            }

            match mutation {
                Some(ReviewMutation::Insert(review)) => {
                    conn.execute(
                        "INSERT INTO reviews (id, user_id, author_id, author_display_name, rating, comment, created_at, edited_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                        params![
                            review.id,
                            user_id,
                            review.author_id,
                            review.author_display_name,
                            i64::from(review.rating),
                            review.comment,
                            review.created_at,
                            review.edited_at
                        ],
                    )?;
                }
                Some(ReviewMutation::Update {
                    review_id,
                    rating,
                    comment,
                    edited_at,
                }) => {
                    let rows = conn.execute(
                        "UPDATE reviews SET rating = ?1, comment = ?2, edited_at = ?3
                         WHERE user_id = ?4 AND id = ?5",
                        params![i64::from(*rating), comment, edited_at, user_id, review_id],
                    )?;
                    if rows == 0 {
                        return Err(StoreError::NotFound(format!("review {}", review_id)));
                    }
                }
                Some(ReviewMutation::Delete { review_id }) => {
                    let rows = conn.execute(
                        "DELETE FROM reviews WHERE user_id = ?1 AND id = ?2",
                        params![user_id, review_id],
                    )?;
                    if rows == 0 {
                        return Err(StoreError::NotFound(format!("review {}", review_id)));
                    }
                }
                None => {}
            }

            let [s1, s2, s3, s4, s5] = aggregate.histogram();
            let next_version = expected_version + 1;
            conn.execute(
                "INSERT INTO rating_aggregates (user_id, stars_1, stars_2, stars_3, stars_4, stars_5, version, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, datetime('now'))
                 ON CONFLICT(user_id) DO UPDATE SET
                   stars_1 = excluded.stars_1,
                   stars_2 = excluded.stars_2,
                   stars_3 = excluded.stars_3,
                   stars_4 = excluded.stars_4,
                   stars_5 = excluded.stars_5,
                   version = excluded.version,
                   updated_at = excluded.updated_at",
                params![user_id, s1, s2, s3, s4, s5, next_version],
            )?;

            Ok(next_version)
        })();

        match result {
            Ok(version) => {
                conn.execute("COMMIT", [])?;
                Ok(version)
            }
            Err(e) => {
                conn.execute("ROLLBACK", [])?;
                Err(e)
            }
        }
    }
}

pub type DynReviewRepository = Arc<dyn ReviewRepository>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use chrono::Utc;
    use tempfile::TempDir;

    fn create_test_repo() -> (SqliteReviewRepository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let pool = db::create_pool(&db_path).unwrap();
        db::run_migrations(&pool).unwrap();

        (SqliteReviewRepository::new(pool), temp_dir)
    }

    fn review(author: &str, stars: i64) -> ReviewRecord {
        ReviewRecord::create(author, author, Rating::new(stars).unwrap(), "", Utc::now()).unwrap()
    }

    #[tokio::test]
    async fn test_missing_aggregate_reads_as_empty() {
        let (repo, _temp) = create_test_repo();

        let read = repo.read_aggregate("tutor-1").await.unwrap();
        assert_eq!(read.version, 0);
        assert_eq!(read.aggregate, RatingAggregate::default());
    }

    #[tokio::test]
    async fn test_write_and_read_back() {
        let (repo, _temp) = create_test_repo();

        let rev = review("student-1", 4);
        let agg = RatingAggregate::from_ratings([rev.rating]);
        let version = repo
            .write_aggregate("tutor-1", 0, &agg, Some(&ReviewMutation::Insert(rev.clone())))
            .await
            .unwrap();
        assert_eq!(version, 1);

        let read = repo.read_aggregate("tutor-1").await.unwrap();
        assert_eq!(read.version, 1);
        assert_eq!(read.aggregate, agg);

        let loaded = repo.load_review("tutor-1", &rev.id).await.unwrap();
        assert_eq!(loaded, Some(rev));
    }

    #[tokio::test]
    async fn test_stale_version_conflicts_and_rolls_back() {
        let (repo, _temp) = create_test_repo();

        let first = review("student-1", 5);
        repo.write_aggregate(
            "tutor-1",
            0,
            &RatingAggregate::from_ratings([first.rating]),
            Some(&ReviewMutation::Insert(first)),
        )
        .await
        .unwrap();

        // Second writer still believes the aggregate is at version 0
        let second = review("student-2", 1);
        let result = repo
            .write_aggregate(
                "tutor-1",
                0,
                &RatingAggregate::from_ratings([second.rating]),
                Some(&ReviewMutation::Insert(second.clone())),
            )
            .await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));

        // Review row must not have been inserted
        assert_eq!(repo.load_review("tutor-1", &second.id).await.unwrap(), None);
        assert_eq!(repo.read_aggregate("tutor-1").await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_delete_missing_review_is_not_found() {
        let (repo, _temp) = create_test_repo();

        let result = repo
            .write_aggregate(
                "tutor-1",
                0,
                &RatingAggregate::default(),
                Some(&ReviewMutation::Delete {
                    review_id: "nope".to_string(),
                }),
            )
            .await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
        assert_eq!(repo.read_aggregate("tutor-1").await.unwrap().version, 0);
    }

    #[tokio::test]
    async fn test_list_reviews_newest_first() {
        let (repo, _temp) = create_test_repo();

        let mut older = review("student-1", 3);
        older.created_at -= 1_000;
        let newer = review("student-2", 5);

        let mut version = 0;
        let mut ratings = Vec::new();
        for rev in [older.clone(), newer.clone()] {
            ratings.push(rev.rating);
            version = repo
                .write_aggregate(
                    "tutor-1",
                    version,
                    &RatingAggregate::from_ratings(ratings.clone()),
                    Some(&ReviewMutation::Insert(rev)),
                )
                .await
                .unwrap();
        }

        let listed = repo.list_reviews("tutor-1").await.unwrap();
        assert_eq!(listed, vec![newer, older]);
    }

    #[tokio::test]
    async fn test_corrupt_histogram_is_rejected() {
        let (repo, _temp) = create_test_repo();

        // Bypass CHECK constraints to simulate a bad row from another writer
        let conn = repo.pool.get().unwrap();
        conn.execute_batch("PRAGMA ignore_check_constraints = ON;")
            .unwrap();
        conn.execute(
            "INSERT INTO rating_aggregates (user_id, stars_2) VALUES ('tutor-1', -3)",
            [],
        )
        .unwrap();
        drop(conn);

        let result = repo.read_aggregate("tutor-1").await;
        assert!(matches!(result, Err(StoreError::Corrupt(_))));
    }
}
