pub mod domain;
pub mod repository;
pub mod service;

pub use domain::{
    AggregateError, Rating, RatingAggregate, ReviewAggregator, ReviewChange, ReviewRecord,
};
pub use repository::{ReviewRepository, SqliteReviewRepository};
pub use service::{ReviewActor, ReviewError, ReviewService};
