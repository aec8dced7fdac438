use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;
use crate::notifications::TrayNotification;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/notifications", get(list))
        .route("/notifications/{id}", delete(dismiss))
        .route("/notifications/permission", put(set_permission))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrayView {
    pub permission_granted: bool,
    pub notifications: Vec<TrayNotification>,
}

#[derive(Deserialize)]
pub struct Permission {
    pub granted: bool,
}

async fn list(State(state): State<AppState>, _user: CurrentUser) -> Json<TrayView> {
    Json(TrayView {
        permission_granted: state.tray.permission().await,
        notifications: state.tray.list().await,
    })
}

async fn dismiss(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    if state.tray.dismiss(&id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("notification {}", id)))
    }
}

async fn set_permission(
    State(state): State<AppState>,
    _user: CurrentUser,
    Json(body): Json<Permission>,
) -> StatusCode {
    state.tray.set_permission(body.granted).await;
    StatusCode::NO_CONTENT
}
