// In-process notification tray, the surface reminders are posted to
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::reminders::delivery::{NotificationSurface, SurfaceError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrayNotification {
    pub id: String,
    pub title: String,
    pub body: String,
    pub posted_at: i64,
}

struct TrayState {
    permission_granted: bool,
    visible: HashMap<String, TrayNotification>,
}

/// Visible notifications keyed by id; posting an existing id replaces it.
pub struct NotificationTray {
    state: RwLock<TrayState>,
}

impl NotificationTray {
    pub fn new(permission_granted: bool) -> Self {
        Self {
            state: RwLock::new(TrayState {
                permission_granted,
                visible: HashMap::new(),
            }),
        }
    }

    pub async fn set_permission(&self, granted: bool) {
        self.state.write().await.permission_granted = granted;
        tracing::info!(
            "Notification permission {}",
            if granted { "granted" } else { "revoked" }
        );
    }

    pub async fn permission(&self) -> bool {
        self.state.read().await.permission_granted
    }

    /// Visible notifications, newest first.
    pub async fn list(&self) -> Vec<TrayNotification> {
        let mut items: Vec<_> = self.state.read().await.visible.values().cloned().collect();
        items.sort_by(|a, b| b.posted_at.cmp(&a.posted_at).then_with(|| a.id.cmp(&b.id)));
        items
    }

    /// Dismiss a notification. Returns whether it was visible.
    pub async fn dismiss(&self, id: &str) -> bool {
        self.state.write().await.visible.remove(id).is_some()
    }
}

#[async_trait]
impl NotificationSurface for NotificationTray {
    async fn post(&self, notification_id: &str, title: &str, body: &str) -> Result<(), SurfaceError> {
        if notification_id.is_empty() {
            return Err(SurfaceError::Rejected("empty notification id".to_string()));
        }

        let notification = TrayNotification {
            id: notification_id.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            posted_at: Utc::now().timestamp_millis(),
        };
        self.state
            .write()
            .await
            .visible
            .insert(notification.id.clone(), notification);
        Ok(())
    }

    async fn permission_granted(&self) -> bool {
        self.permission().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reposting_same_id_replaces() {
        let tray = NotificationTray::new(true);
        tray.post("r1", "Upcoming lesson", "in 3 days").await.unwrap();
        tray.post("r1", "Upcoming lesson", "tomorrow").await.unwrap();

        let visible = tray.list().await;
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].body, "tomorrow");
    }

    #[tokio::test]
    async fn distinct_ids_stack() {
        let tray = NotificationTray::new(true);
        tray.post("r1", "t", "a").await.unwrap();
        tray.post("r2", "t", "b").await.unwrap();
        assert_eq!(tray.list().await.len(), 2);
    }

    #[tokio::test]
    async fn dismiss_removes_once() {
        let tray = NotificationTray::new(true);
        tray.post("r1", "t", "b").await.unwrap();

        assert!(tray.dismiss("r1").await);
        assert!(!tray.dismiss("r1").await);
        assert!(tray.list().await.is_empty());
    }

    #[tokio::test]
    async fn permission_can_be_toggled() {
        let tray = NotificationTray::new(false);
        assert!(!tray.permission_granted().await);
        tray.set_permission(true).await;
        assert!(tray.permission_granted().await);
    }

    #[tokio::test]
    async fn empty_id_is_rejected() {
        let tray = NotificationTray::new(true);
        assert!(matches!(
            tray.post("", "t", "b").await,
            Err(SurfaceError::Rejected(_))
        ));
    }
}
