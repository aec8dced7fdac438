use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;
use crate::reviews::{Rating, RatingAggregate, ReviewActor, ReviewRecord};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users/{id}/rating", get(rating))
        .route("/users/{id}/rating/recompute", post(recompute))
        .route("/users/{id}/reviews", get(list).post(submit))
        .route(
            "/users/{id}/reviews/{review_id}",
            put(edit).delete(remove),
        )
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingResponse {
    pub user_id: String,
    #[serde(flatten)]
    pub aggregate: RatingAggregate,
    pub display_average: f64,
}

impl RatingResponse {
    fn new(user_id: String, aggregate: RatingAggregate) -> Self {
        Self {
            user_id,
            display_average: aggregate.display_average(),
            aggregate,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReview {
    pub author_display_name: String,
    pub rating: i64,
    #[serde(default)]
    pub comment: String,
}

#[derive(Deserialize)]
pub struct EditReview {
    pub rating: i64,
    #[serde(default)]
    pub comment: String,
}

#[derive(Serialize)]
pub struct SubmittedReview {
    pub review: ReviewRecord,
    pub rating: RatingResponse,
}

async fn rating(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> AppResult<Json<RatingResponse>> {
    let aggregate = state.reviews.aggregate(&user_id).await?;
    Ok(Json(RatingResponse::new(user_id, aggregate)))
}

async fn list(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> AppResult<Json<Vec<ReviewRecord>>> {
    Ok(Json(state.reviews.reviews(&user_id).await?))
}

async fn submit(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(user_id): Path<String>,
    Json(body): Json<SubmitReview>,
) -> AppResult<(StatusCode, Json<SubmittedReview>)> {
    let rating = parse_rating(body.rating)?;
    let review = ReviewRecord::create(
        user.id,
        body.author_display_name,
        rating,
        body.comment,
        Utc::now(),
    )
    .map_err(AppError::BadRequest)?;

    let aggregate = state.reviews.submit_review(&user_id, review.clone()).await?;
    Ok((
        StatusCode::CREATED,
        Json(SubmittedReview {
            review,
            rating: RatingResponse::new(user_id, aggregate),
        }),
    ))
}

async fn edit(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((user_id, review_id)): Path<(String, String)>,
    Json(body): Json<EditReview>,
) -> AppResult<Json<RatingResponse>> {
    let rating = parse_rating(body.rating)?;
    let aggregate = state
        .reviews
        .edit_review(
            &user_id,
            &review_id,
            &ReviewActor::Author(user.id),
            rating,
            body.comment,
        )
        .await?;
    Ok(Json(RatingResponse::new(user_id, aggregate)))
}

async fn remove(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((user_id, review_id)): Path<(String, String)>,
) -> AppResult<Json<RatingResponse>> {
    let actor = if state.config.reviews.is_moderator(&user.id) {
        ReviewActor::Moderator
    } else {
        ReviewActor::Author(user.id)
    };
    let aggregate = state
        .reviews
        .remove_review(&user_id, &review_id, &actor)
        .await?;
    Ok(Json(RatingResponse::new(user_id, aggregate)))
}

async fn recompute(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(user_id): Path<String>,
) -> AppResult<Json<RatingResponse>> {
    if !state.config.reviews.is_moderator(&user.id) {
        return Err(AppError::Forbidden(
            "only moderators may rebuild ratings".to_string(),
        ));
    }
    let aggregate = state.reviews.recompute(&user_id).await?;
    Ok(Json(RatingResponse::new(user_id, aggregate)))
}

fn parse_rating(stars: i64) -> AppResult<Rating> {
    Rating::new(stars).map_err(|e| AppError::BadRequest(e.to_string()))
}
