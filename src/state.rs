use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::config::Config;
use crate::notifications::NotificationTray;
use crate::reminders::bookings::DynBookingRepository;
use crate::reminders::preferences::DynPreferenceRepository;
use crate::reminders::{
    Clock, ReminderDeliveryHandler, ReminderDispatcher, ReminderScheduler,
    SqliteBookingRepository, SqlitePreferenceRepository, SqliteReminderStore, TimerWakeupService,
    TracingDiagnostics, WakeupReceiver,
};
use crate::reviews::{ReviewService, SqliteReviewRepository};

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Config,
    pub reviews: Arc<ReviewService>,
    pub preferences: DynPreferenceRepository,
    pub bookings: DynBookingRepository,
    pub scheduler: Arc<ReminderScheduler>,
    pub dispatcher: ReminderDispatcher,
    pub tray: Arc<NotificationTray>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Wire the services over `db`. The returned receiver carries fired
    /// wake-ups and must be handed to the dispatcher.
    pub fn new(db: DbPool, config: Config, clock: Arc<dyn Clock>) -> (Self, WakeupReceiver) {
        let reviews = ReviewService::new(
            Arc::new(SqliteReviewRepository::new(db.clone())),
            config.reviews.max_write_attempts,
        );
        let preferences = Arc::new(SqlitePreferenceRepository::new(
            db.clone(),
            config.reminders.default_preferences(),
        ));
        let bookings = Arc::new(SqliteBookingRepository::new(db.clone()));

        let store = Arc::new(SqliteReminderStore::new(db.clone()));
        let (wakeups, receiver) = TimerWakeupService::new(clock.clone());
        let scheduler = ReminderScheduler::new(store.clone(), Arc::new(wakeups), clock.clone());

        let tray = Arc::new(NotificationTray::new(
            config.notifications.permission_granted,
        ));
        let handler = ReminderDeliveryHandler::new(tray.clone(), Arc::new(TracingDiagnostics));
        let dispatcher = ReminderDispatcher::new(store, Arc::new(handler), clock.clone());

        (
            Self {
                db,
                config,
                reviews: Arc::new(reviews),
                preferences,
                bookings,
                scheduler: Arc::new(scheduler),
                dispatcher,
                tray,
                clock,
            },
            receiver,
        )
    }
}
