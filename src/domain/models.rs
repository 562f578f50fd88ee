use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Repeat {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Repeat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        match value {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "yearly" => Ok(Self::Yearly),
            other => Err(format!("unknown repeat cadence '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub notes: Option<String>,
    pub duration_minutes: u32,
    pub due_at: Option<DateTime<Utc>>,
    pub start_after: DateTime<Utc>,
    pub chunked: bool,
    pub chunk_minutes: Option<u32>,
    pub repeat: Option<Repeat>,
    pub backlog: bool,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "task.id")?;
        validate_non_empty(&self.user_id, "task.user_id")?;
        validate_non_empty(&self.title, "task.title")?;
        if !self.backlog && self.due_at.is_none() {
            return Err("task.due_at is required for non-backlog tasks".to_string());
        }
        Ok(())
    }

    /// A task with no remaining duration has nothing left to place.
    pub fn is_schedulable(&self) -> bool {
        !self.completed && self.duration_minutes > 0
    }

    /// Chunk size in minutes, or `None` when the task must be placed whole.
    /// A chunking flag without a positive chunk size counts as disabled.
    pub fn effective_chunk_minutes(&self) -> Option<u32> {
        if !self.chunked {
            return None;
        }
        self.chunk_minutes.filter(|minutes| *minutes > 0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    User,
    External,
    Task,
    TaskChunk,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::External => "external",
            Self::Task => "task",
            Self::TaskChunk => "task_chunk",
        }
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        match value {
            "user" => Ok(Self::User),
            "external" => Ok(Self::External),
            "task" => Ok(Self::Task),
            "task_chunk" => Ok(Self::TaskChunk),
            other => Err(format!("unknown event kind '{other}'")),
        }
    }

    /// Generated kinds are the scheduler's own output, replaced wholesale on
    /// every run.
    pub fn is_generated(self) -> bool {
        matches!(self, Self::Task | Self::TaskChunk)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub notes: Option<String>,
    pub kind: EventKind,
    pub external_id: Option<String>,
    pub task_id: Option<String>,
}

impl Event {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "event.id")?;
        validate_non_empty(&self.user_id, "event.user_id")?;
        validate_non_empty(&self.title, "event.title")?;
        if self.end_at <= self.start_at {
            return Err("event.end_at must be after event.start_at".to_string());
        }
        Ok(())
    }

    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start_at < end && self.end_at > start
    }
}

/// One placement of all or part of a task's duration into free time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduledSlot {
    pub task_id: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub chunk: Option<u32>,
    pub label: String,
}

impl ScheduledSlot {
    pub fn duration_minutes(&self) -> i64 {
        (self.end_at - self.start_at).num_minutes()
    }
}

/// Stored per-user working hours, as configured.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkingHours {
    pub start: String,
    pub duration_hours: u32,
    pub days: Vec<String>,
    pub timezone: String,
}

impl WorkingHours {
    pub fn validate(&self) -> Result<(), String> {
        parse_hhmm(&self.start).ok_or("working_hours.start must be HH:MM".to_string())?;
        if self.duration_hours == 0 || self.duration_hours > 24 {
            return Err("working_hours.duration_hours must be between 1 and 24".to_string());
        }
        for day in &self.days {
            parse_weekday(day).ok_or_else(|| format!("unknown weekday '{day}'"))?;
        }
        self.timezone
            .parse::<Tz>()
            .map_err(|_| format!("unknown timezone '{}'", self.timezone))?;
        Ok(())
    }

    pub fn resolve(&self) -> Result<WorkingSchedule, String> {
        self.validate()?;
        let start = parse_hhmm(&self.start).ok_or("working_hours.start must be HH:MM".to_string())?;
        let days = self
            .days
            .iter()
            .filter_map(|day| parse_weekday(day))
            .collect();
        let timezone = self
            .timezone
            .parse::<Tz>()
            .map_err(|_| format!("unknown timezone '{}'", self.timezone))?;
        Ok(WorkingSchedule {
            start,
            duration: Duration::hours(self.duration_hours as i64),
            days,
            timezone,
        })
    }
}

/// Resolved working hours: the working-window calculator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingSchedule {
    pub start: NaiveTime,
    pub duration: Duration,
    pub days: HashSet<Weekday>,
    pub timezone: Tz,
}

impl WorkingSchedule {
    pub fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.timezone).date_naive()
    }

    pub fn is_working_day(&self, date: NaiveDate) -> bool {
        self.days.contains(&date.weekday())
    }

    /// The day's working interval in UTC, or `None` on a non-working day.
    pub fn window_for(&self, date: NaiveDate) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        if !self.is_working_day(date) {
            return None;
        }
        let window_start = self
            .timezone
            .from_local_datetime(&date.and_time(self.start))
            .earliest()?
            .with_timezone(&Utc);
        Some((window_start, window_start + self.duration))
    }
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

fn parse_hhmm(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M").ok()
}

fn parse_weekday(name: &str) -> Option<Weekday> {
    let name = name.trim();
    [
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
        Weekday::Sat,
        Weekday::Sun,
    ]
    .into_iter()
    .find(|weekday| weekday_name(*weekday).eq_ignore_ascii_case(name))
}

pub fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn sample_task() -> Task {
        Task {
            id: "tsk-1".to_string(),
            user_id: "usr-1".to_string(),
            title: "Write report".to_string(),
            notes: None,
            duration_minutes: 120,
            due_at: Some(fixed_time("2026-02-19T23:59:00Z")),
            start_after: fixed_time("2026-02-15T00:00:00Z"),
            chunked: false,
            chunk_minutes: None,
            repeat: None,
            backlog: false,
            completed: false,
            completed_at: None,
            scheduled_at: None,
        }
    }

    fn sample_event() -> Event {
        Event {
            id: "evt-1".to_string(),
            user_id: "usr-1".to_string(),
            title: "Standup".to_string(),
            start_at: fixed_time("2026-02-16T09:00:00Z"),
            end_at: fixed_time("2026-02-16T09:30:00Z"),
            notes: None,
            kind: EventKind::External,
            external_id: Some("gcal-1".to_string()),
            task_id: None,
        }
    }

    fn sample_working_hours() -> WorkingHours {
        WorkingHours {
            start: "09:00".to_string(),
            duration_hours: 8,
            days: vec![
                "Monday".to_string(),
                "Tuesday".to_string(),
                "Wednesday".to_string(),
                "Thursday".to_string(),
                "Friday".to_string(),
            ],
            timezone: "UTC".to_string(),
        }
    }

    #[test]
    fn task_validate_accepts_valid_task() {
        assert!(sample_task().validate().is_ok());
    }

    #[test]
    fn task_validate_requires_due_date_unless_backlog() {
        let mut task = sample_task();
        task.due_at = None;
        assert!(task.validate().is_err());
        task.backlog = true;
        assert!(task.validate().is_ok());
    }

    #[test]
    fn task_without_duration_is_not_schedulable() {
        let mut task = sample_task();
        task.duration_minutes = 0;
        assert!(!task.is_schedulable());
    }

    #[test]
    fn chunking_without_chunk_size_counts_as_disabled() {
        let mut task = sample_task();
        task.chunked = true;
        assert_eq!(task.effective_chunk_minutes(), None);
        task.chunk_minutes = Some(0);
        assert_eq!(task.effective_chunk_minutes(), None);
        task.chunk_minutes = Some(30);
        assert_eq!(task.effective_chunk_minutes(), Some(30));
    }

    #[test]
    fn event_validate_rejects_reverse_range() {
        let mut event = sample_event();
        event.end_at = event.start_at;
        assert!(event.validate().is_err());
    }

    #[test]
    fn event_kind_roundtrips_and_flags_generated() {
        for kind in [
            EventKind::User,
            EventKind::External,
            EventKind::Task,
            EventKind::TaskChunk,
        ] {
            assert_eq!(EventKind::parse(kind.as_str()), Ok(kind));
        }
        assert!(EventKind::Task.is_generated());
        assert!(EventKind::TaskChunk.is_generated());
        assert!(!EventKind::External.is_generated());
        assert!(EventKind::parse("banquet").is_err());
    }

    #[test]
    fn working_hours_validate_rejects_bad_input() {
        let mut hours = sample_working_hours();
        hours.start = "25:00".to_string();
        assert!(hours.validate().is_err());

        let mut hours = sample_working_hours();
        hours.duration_hours = 0;
        assert!(hours.validate().is_err());

        let mut hours = sample_working_hours();
        hours.days = vec!["Moonday".to_string()];
        assert!(hours.validate().is_err());

        let mut hours = sample_working_hours();
        hours.timezone = "Mars/Olympus".to_string();
        assert!(hours.validate().is_err());
    }

    #[test]
    fn window_for_projects_working_hours_onto_a_date() {
        let schedule = sample_working_hours().resolve().expect("resolve schedule");
        // 2026-02-16 is a Monday.
        let monday = NaiveDate::from_ymd_opt(2026, 2, 16).expect("valid date");
        let (start, end) = schedule.window_for(monday).expect("working day");
        assert_eq!(start, fixed_time("2026-02-16T09:00:00Z"));
        assert_eq!(end, fixed_time("2026-02-16T17:00:00Z"));

        let saturday = NaiveDate::from_ymd_opt(2026, 2, 21).expect("valid date");
        assert!(schedule.window_for(saturday).is_none());
    }

    #[test]
    fn window_for_respects_the_configured_timezone() {
        let mut hours = sample_working_hours();
        hours.timezone = "America/New_York".to_string();
        let schedule = hours.resolve().expect("resolve schedule");
        let monday = NaiveDate::from_ymd_opt(2026, 2, 16).expect("valid date");
        let (start, _) = schedule.window_for(monday).expect("working day");
        // EST is UTC-5 in mid-February.
        assert_eq!(start, fixed_time("2026-02-16T14:00:00Z"));
    }

    #[test]
    fn domain_models_support_serde_roundtrip() {
        let task = sample_task();
        let event = sample_event();
        let hours = sample_working_hours();

        let task_roundtrip: Task =
            serde_json::from_str(&serde_json::to_string(&task).expect("serialize task"))
                .expect("deserialize task");
        let event_roundtrip: Event =
            serde_json::from_str(&serde_json::to_string(&event).expect("serialize event"))
                .expect("deserialize event");
        let hours_roundtrip: WorkingHours =
            serde_json::from_str(&serde_json::to_string(&hours).expect("serialize hours"))
                .expect("deserialize hours");

        assert_eq!(task_roundtrip, task);
        assert_eq!(event_roundtrip, event);
        assert_eq!(hours_roundtrip, hours);
    }
}
