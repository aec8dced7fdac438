// Review domain - pure values and the aggregate merge function
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Longest comment accepted on a review.
pub const MAX_COMMENT_CHARS: usize = 2000;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AggregateError {
    #[error("Rating must be between 1 and 5, got {0}")]
    InvalidRating(i64),

    /// The change does not fit the aggregate it was applied to. Always a caller bug.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

/// Star rating, guaranteed to be in `1..=5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Rating(u8);

impl Rating {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    pub fn new(stars: i64) -> Result<Self, AggregateError> {
        if (Self::MIN as i64..=Self::MAX as i64).contains(&stars) {
            Ok(Self(stars as u8))
        } else {
            Err(AggregateError::InvalidRating(stars))
        }
    }

    pub fn stars(self) -> u8 {
        self.0
    }

    /// Every rating from one to five stars.
    pub fn all() -> impl Iterator<Item = Rating> {
        (Self::MIN..=Self::MAX).map(Rating)
    }

    fn slot(self) -> usize {
        (self.0 - Self::MIN) as usize
    }
}

impl TryFrom<i64> for Rating {
    type Error = AggregateError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Rating> for i64 {
    fn from(rating: Rating) -> Self {
        rating.0 as i64
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A review left on a user's profile.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRecord {
    pub id: String,
    pub author_id: String,
    pub author_display_name: String,
    pub rating: Rating,
    pub comment: String,
    pub created_at: i64,
    pub edited_at: Option<i64>,
}

impl ReviewRecord {
    /// Validate a new submission and stamp it with a fresh id.
    pub fn create(
        author_id: impl Into<String>,
        author_display_name: impl Into<String>,
        rating: Rating,
        comment: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, String> {
        let author_id = author_id.into();
        if author_id.trim().is_empty() {
            return Err("author id is required".to_string());
        }

        let author_display_name = author_display_name.into().trim().to_string();
        if author_display_name.is_empty() {
            return Err("author display name is required".to_string());
        }

        let comment = validate_comment(comment.into())?;

        Ok(Self {
            id: uuid::Uuid::now_v7().to_string(),
            author_id,
            author_display_name,
            rating,
            comment,
            created_at: now.timestamp_millis(),
            edited_at: None,
        })
    }
}

pub fn validate_comment(comment: String) -> Result<String, String> {
    let comment = comment.trim().to_string();
    if comment.chars().count() > MAX_COMMENT_CHARS {
        return Err(format!(
            "comment must be at most {} characters",
            MAX_COMMENT_CHARS
        ));
    }
    Ok(comment)
}

/// Summary statistics over a user's reviews.
///
/// Only the per-star histogram is stored; the count and the average are
/// always derived from it, so they cannot drift apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RatingAggregate {
    histogram: [u32; 5],
}

impl RatingAggregate {
    pub fn from_histogram(histogram: [u32; 5]) -> Self {
        Self { histogram }
    }

    pub fn from_ratings(ratings: impl IntoIterator<Item = Rating>) -> Self {
        let mut histogram = [0u32; 5];
        for rating in ratings {
            histogram[rating.slot()] += 1;
        }
        Self { histogram }
    }

    pub fn histogram(&self) -> [u32; 5] {
        self.histogram
    }

    pub fn count(&self, rating: Rating) -> u32 {
        self.histogram[rating.slot()]
    }

    pub fn total_reviews(&self) -> u32 {
        self.histogram.iter().sum()
    }

    /// Mean star value, `0.0` when there are no reviews.
    pub fn average_rating(&self) -> f64 {
        let total = self.total_reviews();
        if total == 0 {
            return 0.0;
        }
        let weighted: u64 = Rating::all()
            .map(|r| r.stars() as u64 * self.count(r) as u64)
            .sum();
        weighted as f64 / total as f64
    }

    /// Average rounded to one decimal, for display only.
    pub fn display_average(&self) -> f64 {
        (self.average_rating() * 10.0).round() / 10.0
    }

    fn add(&mut self, rating: Rating) {
        self.histogram[rating.slot()] += 1;
    }

    fn remove(&mut self, rating: Rating) -> Result<(), AggregateError> {
        let slot = &mut self.histogram[rating.slot()];
        if *slot == 0 {
            return Err(AggregateError::InvariantViolation(format!(
                "cannot remove a {}-star review: histogram has none",
                rating
            )));
        }
        *slot -= 1;
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AggregateView {
    average_rating: f64,
    total_reviews: u32,
    rating_stats: BTreeMap<u8, u32>,
}

impl Serialize for RatingAggregate {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        AggregateView {
            average_rating: self.average_rating(),
            total_reviews: self.total_reviews(),
            rating_stats: Rating::all().map(|r| (r.stars(), self.count(r))).collect(),
        }
        .serialize(serializer)
    }
}

/// A change to the underlying review set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewChange {
    Add(Rating),
    Remove(Rating),
    Edit { old: Rating, new: Rating },
}

/// Pure merge function for rating aggregates.
pub struct ReviewAggregator;

impl ReviewAggregator {
    /// Apply a change, returning the new aggregate. The input is never
    /// modified, so the same snapshot can be retried safely.
    pub fn apply(
        current: &RatingAggregate,
        change: ReviewChange,
    ) -> Result<RatingAggregate, AggregateError> {
        let mut next = *current;
        match change {
            ReviewChange::Add(rating) => next.add(rating),
            ReviewChange::Remove(rating) => next.remove(rating)?,
            ReviewChange::Edit { old, new } => {
                next.remove(old)?;
                next.add(new);
            }
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(stars: i64) -> Rating {
        Rating::new(stars).unwrap()
    }

    #[test]
    fn rating_rejects_out_of_range() {
        assert!(matches!(Rating::new(0), Err(AggregateError::InvalidRating(0))));
        assert!(matches!(Rating::new(6), Err(AggregateError::InvalidRating(6))));
        assert_eq!(Rating::new(5).unwrap().stars(), 5);
    }

    #[test]
    fn rating_deserializes_with_validation() {
        let ok: Rating = serde_json::from_str("4").unwrap();
        assert_eq!(ok.stars(), 4);
        assert!(serde_json::from_str::<Rating>("9").is_err());
    }

    #[test]
    fn empty_aggregate_has_zero_average() {
        let agg = RatingAggregate::default();
        assert_eq!(agg.total_reviews(), 0);
        assert_eq!(agg.average_rating(), 0.0);
    }

    #[test]
    fn average_is_derived_from_histogram() {
        let agg = RatingAggregate::from_ratings([r(5), r(5), r(3)]);
        assert_eq!(agg.total_reviews(), 3);
        assert!((agg.average_rating() - 13.0 / 3.0).abs() < 1e-9);
        assert_eq!(agg.display_average(), 4.3);
    }

    #[test]
    fn add_increments_slot_and_total() {
        let agg = ReviewAggregator::apply(&RatingAggregate::default(), ReviewChange::Add(r(4)))
            .unwrap();
        assert_eq!(agg.count(r(4)), 1);
        assert_eq!(agg.total_reviews(), 1);
        assert_eq!(agg.average_rating(), 4.0);
    }

    #[test]
    fn remove_missing_rating_is_invariant_violation() {
        let agg = RatingAggregate::from_ratings([r(5)]);
        let result = ReviewAggregator::apply(&agg, ReviewChange::Remove(r(2)));
        assert!(matches!(result, Err(AggregateError::InvariantViolation(_))));
    }

    #[test]
    fn remove_last_review_resets_average() {
        let agg = RatingAggregate::from_ratings([r(2)]);
        let agg = ReviewAggregator::apply(&agg, ReviewChange::Remove(r(2))).unwrap();
        assert_eq!(agg.total_reviews(), 0);
        assert_eq!(agg.average_rating(), 0.0);
    }

    #[test]
    fn edit_moves_one_review_between_slots() {
        let agg = RatingAggregate::from_ratings([r(1), r(5)]);
        let agg = ReviewAggregator::apply(
            &agg,
            ReviewChange::Edit {
                old: r(1),
                new: r(4),
            },
        )
        .unwrap();
        assert_eq!(agg.count(r(1)), 0);
        assert_eq!(agg.count(r(4)), 1);
        assert_eq!(agg.total_reviews(), 2);
        assert_eq!(agg.average_rating(), 4.5);
    }

    #[test]
    fn failed_edit_leaves_input_untouched() {
        let agg = RatingAggregate::from_ratings([r(5)]);
        let result = ReviewAggregator::apply(
            &agg,
            ReviewChange::Edit {
                old: r(3),
                new: r(4),
            },
        );
        assert!(result.is_err());
        assert_eq!(agg, RatingAggregate::from_ratings([r(5)]));
    }

    #[test]
    fn total_matches_histogram_across_mixed_changes() {
        let changes = [
            ReviewChange::Add(r(5)),
            ReviewChange::Add(r(3)),
            ReviewChange::Add(r(5)),
            ReviewChange::Edit {
                old: r(3),
                new: r(1),
            },
            ReviewChange::Remove(r(5)),
            ReviewChange::Add(r(2)),
            ReviewChange::Remove(r(1)),
        ];

        let mut agg = RatingAggregate::default();
        for change in changes {
            agg = ReviewAggregator::apply(&agg, change).unwrap();
            assert_eq!(agg.total_reviews(), agg.histogram().iter().sum::<u32>());
        }
        assert_eq!(agg, RatingAggregate::from_ratings([r(5), r(2)]));
    }

    #[test]
    fn serializes_with_derived_fields() {
        let agg = RatingAggregate::from_ratings([r(5), r(5), r(3)]);
        let json = serde_json::to_value(agg).unwrap();
        assert_eq!(json["totalReviews"], 3);
        assert_eq!(json["ratingStats"]["5"], 2);
        assert_eq!(json["ratingStats"]["3"], 1);
        assert_eq!(json["ratingStats"]["1"], 0);
    }

    #[test]
    fn create_review_validates_input() {
        let now = Utc::now();
        assert!(ReviewRecord::create("", "Ana", r(5), "", now).is_err());
        assert!(ReviewRecord::create("student-1", "  ", r(5), "", now).is_err());
        let long = "x".repeat(MAX_COMMENT_CHARS + 1);
        assert!(ReviewRecord::create("student-1", "Ana", r(5), long, now).is_err());

        let review = ReviewRecord::create("student-1", " Ana ", r(5), " great ", now).unwrap();
        assert_eq!(review.author_display_name, "Ana");
        assert_eq!(review.comment, "great");
        assert_eq!(review.created_at, now.timestamp_millis());
        assert!(review.edited_at.is_none());
    }
}
