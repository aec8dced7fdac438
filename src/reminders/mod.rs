pub mod bookings;
pub mod delivery;
pub mod dispatch;
pub mod domain;
pub mod preferences;
pub mod scheduler;
pub mod store;
pub mod wakeup;

pub use bookings::{BookingRepository, LessonBooking, SqliteBookingRepository};
pub use delivery::{
    DeliveryResult, DiagnosticsSink, NotificationSurface, ReminderDeliveryHandler,
    TracingDiagnostics,
};
pub use dispatch::ReminderDispatcher;
pub use domain::{
    Clock, EpochMillis, EventId, ManualClock, NotificationPreference, OffsetKind, ReminderId,
    ScheduledReminder, SystemClock,
};
pub use preferences::{PreferenceRepository, SqlitePreferenceRepository};
pub use scheduler::{ReminderError, ReminderScheduler, RestoreSummary};
pub use store::{ReminderStore, SqliteReminderStore};
pub use wakeup::{TimerWakeupService, WakeupReceiver, WakeupService};
