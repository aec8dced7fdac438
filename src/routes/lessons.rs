use axum::extract::{Path, State};
use axum::routing::put;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::extractors::CurrentUser;
use crate::reminders::{EventId, LessonBooking, NotificationPreference, ScheduledReminder};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/lessons/{event_id}/reminders",
        put(schedule).get(pending).delete(cancel),
    )
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleReminders {
    pub event_time: DateTime<Utc>,
    /// Falls back to the caller's stored preferences
    pub preferences: Option<NotificationPreference>,
}

#[derive(Serialize)]
pub struct Cancelled {
    pub cancelled: usize,
}

/// Replaces whatever was scheduled for the lesson before. Lessons booked
/// without explicit preferences are re-planned when the caller later
/// changes their preferences.
async fn schedule(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(event_id): Path<String>,
    Json(body): Json<ScheduleReminders>,
) -> AppResult<Json<Vec<ScheduledReminder>>> {
    let follows_preferences = body.preferences.is_none();
    let preferences = match body.preferences {
        Some(preferences) => preferences,
        None => state.preferences.read_preferences(&user.id).await?,
    };

    let event_id = EventId::new(event_id);
    let event_at = body.event_time.timestamp_millis();
    let reminders = state
        .scheduler
        .reschedule(&event_id, event_at, &preferences)
        .await?;
    state
        .bookings
        .record(&LessonBooking {
            event_id,
            user_id: user.id,
            event_at,
            follows_preferences,
        })
        .await?;
    Ok(Json(reminders))
}

async fn pending(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(event_id): Path<String>,
) -> AppResult<Json<Vec<ScheduledReminder>>> {
    Ok(Json(state.scheduler.pending(&EventId::new(event_id)).await?))
}

async fn cancel(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(event_id): Path<String>,
) -> AppResult<Json<Cancelled>> {
    let event_id = EventId::new(event_id);
    let cancelled = state.scheduler.cancel(&event_id).await?;
    state.bookings.remove(&event_id).await?;
    Ok(Json(Cancelled { cancelled }))
}
