use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use crate::error::AppResult;
use crate::extractors::CurrentUser;
use crate::reminders::NotificationPreference;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/me/preferences", get(read).put(write))
}

async fn read(
    State(state): State<AppState>,
    user: CurrentUser,
) -> AppResult<Json<NotificationPreference>> {
    Ok(Json(state.preferences.read_preferences(&user.id).await?))
}

/// Also re-plans the caller's upcoming lessons that were booked without
/// explicit preferences.
async fn write(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(preferences): Json<NotificationPreference>,
) -> AppResult<Json<NotificationPreference>> {
    state
        .preferences
        .write_preferences(&user.id, &preferences)
        .await?;

    let lessons = state
        .bookings
        .upcoming_following_preferences(&user.id, state.clock.now_millis())
        .await?;
    for lesson in &lessons {
        state
            .scheduler
            .reschedule(&lesson.event_id, lesson.event_at, &preferences)
            .await?;
    }

    tracing::info!(
        "Updated reminder preferences for {}, re-planned {} lesson(s)",
        user.id,
        lessons.len()
    );
    Ok(Json(preferences))
}
