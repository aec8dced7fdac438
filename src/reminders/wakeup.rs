use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::reminders::domain::{Clock, EpochMillis, ReminderId};

#[derive(Debug, Error)]
pub enum WakeupError {
    #[error("Wake-up service unavailable: {0}")]
    Unavailable(String),
}

/// Schedules a callback for a reminder at an absolute time.
#[async_trait]
pub trait WakeupService: Send + Sync {
    /// Register (or replace) the wake-up for `reminder_id`.
    async fn register_wakeup(
        &self,
        reminder_id: &ReminderId,
        fire_at: EpochMillis,
    ) -> Result<(), WakeupError>;

    /// Cancel a wake-up. Cancelling an unknown id is not an error.
    async fn cancel_wakeup(&self, reminder_id: &ReminderId) -> Result<(), WakeupError>;
}

pub type WakeupReceiver = mpsc::UnboundedReceiver<ReminderId>;

type Timers = Arc<Mutex<HashMap<ReminderId, (u64, AbortHandle)>>>;

/// In-process wake-ups backed by tokio timers. Fired ids are sent down a
/// channel. Timers do not outlive the process; durable reminder records are
/// re-registered on startup.
pub struct TimerWakeupService {
    clock: Arc<dyn Clock>,
    timers: Timers,
    next_generation: Mutex<u64>,
    tx: mpsc::UnboundedSender<ReminderId>,
}

impl TimerWakeupService {
    pub fn new(clock: Arc<dyn Clock>) -> (Self, WakeupReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                clock,
                timers: Arc::new(Mutex::new(HashMap::new())),
                next_generation: Mutex::new(0),
                tx,
            },
            rx,
        )
    }

    /// Number of wake-ups still waiting to fire.
    pub fn pending(&self) -> usize {
        self.timers.lock().map(|t| t.len()).unwrap_or(0)
    }

    fn lock_timers(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<ReminderId, (u64, AbortHandle)>>, WakeupError>
    {
        self.timers
            .lock()
            .map_err(|_| WakeupError::Unavailable("timer table poisoned".to_string()))
    }
}

#[async_trait]
impl WakeupService for TimerWakeupService {
    async fn register_wakeup(
        &self,
        reminder_id: &ReminderId,
        fire_at: EpochMillis,
    ) -> Result<(), WakeupError> {
        if self.tx.is_closed() {
            return Err(WakeupError::Unavailable(
                "wake-up receiver dropped".to_string(),
            ));
        }

        let delay = (fire_at - self.clock.now_millis()).max(0) as u64;
        let generation = {
            let mut next = self
                .next_generation
                .lock()
                .map_err(|_| WakeupError::Unavailable("generation poisoned".to_string()))?;
            *next += 1;
            *next
        };

        let mut timers = self.lock_timers()?;

        let id = reminder_id.clone();
        let tx = self.tx.clone();
        let table = self.timers.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            if let Ok(mut timers) = table.lock() {
                // Only drop our own entry; a newer registration may have replaced it
                if timers.get(&id).is_some_and(|(g, _)| *g == generation) {
                    timers.remove(&id);
                }
            }
            let _ = tx.send(id);
        });

        let previous = timers.insert(reminder_id.clone(), (generation, task.abort_handle()));
        if let Some((_, previous)) = previous {
            previous.abort();
        }

        tracing::debug!("Wake-up for {} registered in {}ms", reminder_id, delay);
        Ok(())
    }

    async fn cancel_wakeup(&self, reminder_id: &ReminderId) -> Result<(), WakeupError> {
        if let Some((_, handle)) = self.lock_timers()?.remove(reminder_id) {
            handle.abort();
            tracing::debug!("Wake-up for {} cancelled", reminder_id);
        }
        Ok(())
    }
}
