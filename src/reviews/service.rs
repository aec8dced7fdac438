use chrono::Utc;
use thiserror::Error;

use crate::db::StoreError;
use crate::reviews::domain::{
    validate_comment, AggregateError, Rating, RatingAggregate, ReviewAggregator, ReviewChange,
    ReviewRecord,
};
use crate::reviews::repository::{DynReviewRepository, ReviewMutation};

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("Invalid review: {0}")]
    Invalid(String),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error("Aggregate update failed after {attempts} attempts")]
    AggregationFailed { attempts: u32 },

    #[error("Review not found: {0}")]
    NotFound(String),

    #[error("Only the author may change this review")]
    NotAuthor,

    #[error("Users cannot review themselves")]
    SelfReview,

    #[error("Store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for ReviewError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => ReviewError::NotFound(what),
            other => ReviewError::Store(other),
        }
    }
}

/// Who is changing an existing review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewActor {
    Author(String),
    Moderator,
}

impl ReviewActor {
    fn may_change(&self, review: &ReviewRecord) -> bool {
        match self {
            ReviewActor::Author(id) => *id == review.author_id,
            ReviewActor::Moderator => true,
        }
    }
}

enum Operation<'a> {
    Submit(&'a ReviewRecord),
    Edit {
        review_id: &'a str,
        actor: &'a ReviewActor,
        rating: Rating,
        comment: &'a str,
    },
    Remove {
        review_id: &'a str,
        actor: &'a ReviewActor,
    },
}

/// Applies review changes to a user's aggregate with optimistic
/// read-modify-write, retrying on conflicting writers.
pub struct ReviewService {
    repo: DynReviewRepository,
    max_attempts: u32,
}

impl ReviewService {
    pub fn new(repo: DynReviewRepository, max_attempts: u32) -> Self {
        Self {
            repo,
            max_attempts: max_attempts.max(1),
        }
    }

    pub async fn aggregate(&self, user_id: &str) -> Result<RatingAggregate, ReviewError> {
        Ok(self.repo.read_aggregate(user_id).await?.aggregate)
    }

    pub async fn reviews(&self, user_id: &str) -> Result<Vec<ReviewRecord>, ReviewError> {
        Ok(self.repo.list_reviews(user_id).await?)
    }

    /// Record a new review for `user_id` and return the updated aggregate.
    pub async fn submit_review(
        &self,
        user_id: &str,
        review: ReviewRecord,
    ) -> Result<RatingAggregate, ReviewError> {
        if review.author_id == user_id {
            return Err(ReviewError::SelfReview);
        }
        let aggregate = self.commit(user_id, Operation::Submit(&review)).await?;
        tracing::info!(
            "Review {} ({} stars) added for {}",
            review.id,
            review.rating,
            user_id
        );
        Ok(aggregate)
    }

    pub async fn edit_review(
        &self,
        user_id: &str,
        review_id: &str,
        actor: &ReviewActor,
        rating: Rating,
        comment: String,
    ) -> Result<RatingAggregate, ReviewError> {
        let comment = validate_comment(comment).map_err(ReviewError::Invalid)?;
        let aggregate = self
            .commit(
                user_id,
                Operation::Edit {
                    review_id,
                    actor,
                    rating,
                    comment: &comment,
                },
            )
            .await?;
        tracing::info!("Review {} for {} edited", review_id, user_id);
        Ok(aggregate)
    }

    pub async fn remove_review(
        &self,
        user_id: &str,
        review_id: &str,
        actor: &ReviewActor,
    ) -> Result<RatingAggregate, ReviewError> {
        let aggregate = self
            .commit(user_id, Operation::Remove { review_id, actor })
            .await?;
        tracing::info!("Review {} for {} removed ({:?})", review_id, user_id, actor);
        Ok(aggregate)
    }

    /// Rebuild the aggregate from the stored reviews.
    pub async fn recompute(&self, user_id: &str) -> Result<RatingAggregate, ReviewError> {
        for attempt in 1..=self.max_attempts {
            let snapshot = self.repo.read_aggregate(user_id).await?;
            let reviews = self.repo.list_reviews(user_id).await?;
            let rebuilt = RatingAggregate::from_ratings(reviews.iter().map(|r| r.rating));

            if rebuilt != snapshot.aggregate {
                tracing::warn!(
                    "Aggregate for {} drifted from its reviews, repairing",
                    user_id
                );
            }

            match self
                .repo
                .write_aggregate(user_id, snapshot.version, &rebuilt, None)
                .await
            {
                Ok(_) => return Ok(rebuilt),
                Err(StoreError::Conflict(msg)) => {
                    tracing::debug!("Recompute attempt {} for {} conflicted: {}", attempt, user_id, msg);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ReviewError::AggregationFailed {
            attempts: self.max_attempts,
        })
    }

    async fn commit(
        &self,
        user_id: &str,
        op: Operation<'_>,
    ) -> Result<RatingAggregate, ReviewError> {
        for attempt in 1..=self.max_attempts {
            let snapshot = self.repo.read_aggregate(user_id).await?;
            let (change, mutation) = self.plan(user_id, &op).await?;
            let next = ReviewAggregator::apply(&snapshot.aggregate, change)?;

            match self
                .repo
                .write_aggregate(user_id, snapshot.version, &next, Some(&mutation))
                .await
            {
                Ok(_) => return Ok(next),
                Err(StoreError::Conflict(msg)) => {
                    tracing::debug!("Aggregate write attempt {} for {} conflicted: {}", attempt, user_id, msg);
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::warn!(
            "Giving up on aggregate update for {} after {} attempts",
            user_id,
            self.max_attempts
        );
        Err(ReviewError::AggregationFailed {
            attempts: self.max_attempts,
        })
    }

    /// Work out the aggregate change and the row mutation for one attempt.
    /// Existing reviews are re-read every attempt since a concurrent edit may
    /// have changed their rating.
    async fn plan(
        &self,
        user_id: &str,
        op: &Operation<'_>,
    ) -> Result<(ReviewChange, ReviewMutation), ReviewError> {
        match op {
            Operation::Submit(review) => Ok((
                ReviewChange::Add(review.rating),
                ReviewMutation::Insert((*review).clone()),
            )),
            Operation::Edit {
                review_id,
                actor,
                rating,
                comment,
            } => {
                let existing = self.existing(user_id, review_id, actor).await?;
                Ok((
                    ReviewChange::Edit {
                        old: existing.rating,
                        new: *rating,
                    },
                    ReviewMutation::Update {
                        review_id: review_id.to_string(),
                        rating: *rating,
                        comment: comment.to_string(),
                        edited_at: Utc::now().timestamp_millis(),
                    },
                ))
            }
            Operation::Remove { review_id, actor } => {
                let existing = self.existing(user_id, review_id, actor).await?;
                Ok((
                    ReviewChange::Remove(existing.rating),
                    ReviewMutation::Delete {
                        review_id: review_id.to_string(),
                    },
                ))
            }
        }
    }

    async fn existing(
        &self,
        user_id: &str,
        review_id: &str,
        actor: &ReviewActor,
    ) -> Result<ReviewRecord, ReviewError> {
        let review = self
            .repo
            .load_review(user_id, review_id)
            .await?
            .ok_or_else(|| ReviewError::NotFound(review_id.to_string()))?;
        if !actor.may_change(&review) {
            return Err(ReviewError::NotAuthor);
        }
        Ok(review)
    }
}
