// Reminder domain types - pure, no side effects
use chrono::{DateTime, Duration, Utc};
use ring::digest;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};

/// Milliseconds since the Unix epoch.
pub type EpochMillis = i64;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub String);

impl EventId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable reminder identifier, also used as the notification key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReminderId(pub String);

impl ReminderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Deterministic id for an event's reminder of the given kind.
    pub fn derive(event_id: &EventId, kind: OffsetKind) -> Self {
        let mut ctx = digest::Context::new(&digest::SHA256);
        ctx.update(event_id.as_str().as_bytes());
        ctx.update(&[0]);
        ctx.update(kind.as_str().as_bytes());
        let digest = ctx.finish();
        Self(hex::encode(&digest.as_ref()[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReminderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How long before the lesson a reminder fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OffsetKind {
    WeekBefore,
    ThreeDaysBefore,
    OneDayBefore,
}

impl OffsetKind {
    pub const ALL: [OffsetKind; 3] = [
        OffsetKind::WeekBefore,
        OffsetKind::ThreeDaysBefore,
        OffsetKind::OneDayBefore,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WeekBefore => "week_before",
            Self::ThreeDaysBefore => "three_days_before",
            Self::OneDayBefore => "one_day_before",
        }
    }

    pub fn offset(&self) -> Duration {
        match self {
            Self::WeekBefore => Duration::days(7),
            Self::ThreeDaysBefore => Duration::days(3),
            Self::OneDayBefore => Duration::days(1),
        }
    }

    fn lead_time(&self) -> &'static str {
        match self {
            Self::WeekBefore => "in one week",
            Self::ThreeDaysBefore => "in 3 days",
            Self::OneDayBefore => "tomorrow",
        }
    }
}

impl FromStr for OffsetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown reminder kind: {}", s))
    }
}

impl fmt::Display for OffsetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which lesson reminders a user wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPreference {
    week_before: bool,
    three_days_before: bool,
    one_day_before: bool,
}

impl NotificationPreference {
    pub const fn new(week_before: bool, three_days_before: bool, one_day_before: bool) -> Self {
        Self {
            week_before,
            three_days_before,
            one_day_before,
        }
    }

    pub const fn all() -> Self {
        Self::new(true, true, true)
    }

    pub const fn none() -> Self {
        Self::new(false, false, false)
    }

    pub fn is_enabled(&self, kind: OffsetKind) -> bool {
        match kind {
            OffsetKind::WeekBefore => self.week_before,
            OffsetKind::ThreeDaysBefore => self.three_days_before,
            OffsetKind::OneDayBefore => self.one_day_before,
        }
    }

    pub fn enabled_kinds(&self) -> impl Iterator<Item = OffsetKind> + '_ {
        OffsetKind::ALL.into_iter().filter(|k| self.is_enabled(*k))
    }
}

/// A reminder waiting to fire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledReminder {
    pub reminder_id: ReminderId,
    pub event_id: EventId,
    pub kind: OffsetKind,
    #[serde(rename = "fireAtEpochMillis")]
    pub fire_at: EpochMillis,
    #[serde(rename = "eventAtEpochMillis")]
    pub event_at: EpochMillis,
    pub title: String,
    pub body: String,
}

impl ScheduledReminder {
    pub fn fire_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.fire_at)
    }
}

/// Pure planner - maps a lesson time and preferences to concrete reminders
pub struct ReminderPlanner;

impl ReminderPlanner {
    pub const TITLE: &'static str = "Upcoming lesson";

    /// Reminders for every enabled offset whose fire time is still ahead of
    /// `now`. Candidates at or before `now` are dropped, never fired early.
    pub fn plan(
        event_id: &EventId,
        event_at: EpochMillis,
        preferences: &NotificationPreference,
        now: EpochMillis,
    ) -> Vec<ScheduledReminder> {
        preferences
            .enabled_kinds()
            .filter_map(|kind| {
                let fire_at = event_at - kind.offset().num_milliseconds();
                if fire_at <= now {
                    return None;
                }
                Some(ScheduledReminder {
                    reminder_id: ReminderId::derive(event_id, kind),
                    event_id: event_id.clone(),
                    kind,
                    fire_at,
                    event_at,
                    title: Self::TITLE.to_string(),
                    body: format!("Your lesson is {}.", kind.lead_time()),
                })
            })
            .collect()
    }

    /// A reminder that missed its fire time while nothing was running,
    /// re-worded for the time actually left before the lesson.
    pub fn catch_up(reminder: &ScheduledReminder, now: EpochMillis) -> ScheduledReminder {
        ScheduledReminder {
            body: format!("Your lesson is {}.", time_left(reminder.event_at - now)),
            ..reminder.clone()
        }
    }
}

fn time_left(millis: i64) -> String {
    let hours = Duration::milliseconds(millis).num_hours();
    match hours {
        h if h >= 48 => format!("in {} days", h / 24),
        h if h >= 2 => format!("in {} hours", h),
        1 => "in 1 hour".to_string(),
        _ => "in less than an hour".to_string(),
    }
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> EpochMillis;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> EpochMillis {
        Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new(now: EpochMillis) -> Self {
        Self(AtomicI64::new(now))
    }

    pub fn set(&self, now: EpochMillis) {
        self.0.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.0.fetch_add(by.num_milliseconds(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> EpochMillis {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: i64 = 24 * 60 * 60 * 1000;
    const NOW: i64 = 1_700_000_000_000;

    #[test]
    fn reminder_id_is_deterministic() {
        let event = EventId::new("lesson-42");
        let a = ReminderId::derive(&event, OffsetKind::OneDayBefore);
        let b = ReminderId::derive(&event, OffsetKind::OneDayBefore);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn reminder_id_differs_by_kind_and_event() {
        let event = EventId::new("lesson-42");
        let ids: Vec<_> = OffsetKind::ALL
            .into_iter()
            .map(|k| ReminderId::derive(&event, k))
            .collect();
        assert_ne!(ids[0], ids[1]);
        assert_ne!(ids[1], ids[2]);
        assert_ne!(
            ids[0],
            ReminderId::derive(&EventId::new("lesson-43"), OffsetKind::WeekBefore)
        );
    }

    #[test]
    fn offset_kind_round_trips_through_str() {
        for kind in OffsetKind::ALL {
            assert_eq!(kind.as_str().parse::<OffsetKind>().unwrap(), kind);
        }
        assert!("fortnight_before".parse::<OffsetKind>().is_err());
    }

    #[test]
    fn plan_ten_days_out_yields_three_reminders() {
        let event = EventId::new("lesson-1");
        let event_at = NOW + 10 * DAY;
        let plan = ReminderPlanner::plan(&event, event_at, &NotificationPreference::all(), NOW);

        let fire_times: Vec<_> = plan.iter().map(|r| r.fire_at).collect();
        assert_eq!(
            fire_times,
            vec![event_at - 7 * DAY, event_at - 3 * DAY, event_at - DAY]
        );
        assert!(plan.iter().all(|r| r.event_id == event && r.event_at == event_at));
    }

    #[test]
    fn plan_two_days_out_keeps_only_one_day_before() {
        let event = EventId::new("lesson-1");
        let plan =
            ReminderPlanner::plan(&event, NOW + 2 * DAY, &NotificationPreference::all(), NOW);

        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].kind, OffsetKind::OneDayBefore);
        assert_eq!(plan[0].fire_at, NOW + DAY);
        assert_eq!(plan[0].body, "Your lesson is tomorrow.");
    }

    #[test]
    fn plan_drops_fire_time_equal_to_now() {
        let event = EventId::new("lesson-1");
        let plan = ReminderPlanner::plan(&event, NOW + DAY, &NotificationPreference::all(), NOW);
        assert!(plan.is_empty());
    }

    #[test]
    fn plan_respects_disabled_preferences() {
        let event = EventId::new("lesson-1");
        let prefs = NotificationPreference::new(false, true, false);
        let plan = ReminderPlanner::plan(&event, NOW + 10 * DAY, &prefs, NOW);

        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].kind, OffsetKind::ThreeDaysBefore);
        assert!(ReminderPlanner::plan(&event, NOW + 10 * DAY, &NotificationPreference::none(), NOW)
            .is_empty());
    }

    #[test]
    fn catch_up_rewords_for_remaining_time() {
        let event = EventId::new("lesson-1");
        let plan = ReminderPlanner::plan(&event, NOW + 10 * DAY, &NotificationPreference::all(), NOW);
        let week_before = &plan[0];
        assert_eq!(week_before.body, "Your lesson is in one week.");

        let late = ReminderPlanner::catch_up(week_before, NOW + 8 * DAY + DAY / 2);
        assert_eq!(late.body, "Your lesson is in 36 hours.");
        assert_eq!(late.reminder_id, week_before.reminder_id);
        assert_eq!(late.fire_at, week_before.fire_at);

        let body = |now| ReminderPlanner::catch_up(week_before, now).body;
        assert_eq!(body(NOW + 5 * DAY), "Your lesson is in 5 days.");
        assert_eq!(body(NOW + 10 * DAY - DAY / 24), "Your lesson is in 1 hour.");
        assert_eq!(body(NOW + 10 * DAY - 60_000), "Your lesson is in less than an hour.");
    }

    #[test]
    fn preferences_deserialize_camel_case() {
        let prefs: NotificationPreference = serde_json::from_str(
            r#"{"weekBefore": false, "threeDaysBefore": true, "oneDayBefore": true}"#,
        )
        .unwrap();
        assert_eq!(prefs, NotificationPreference::new(false, true, true));
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(NOW);
        clock.advance(Duration::days(1));
        assert_eq!(clock.now_millis(), NOW + DAY);
        clock.set(5);
        assert_eq!(clock.now_millis(), 5);
    }
}
