use crate::domain::models::{Event, Task};
use chrono::{DateTime, Duration, Utc};

/// Forward span over which obstacles and tasks are considered for one run.
pub const HORIZON_DAYS: i64 = 14;

pub fn horizon_end(now: DateTime<Utc>) -> DateTime<Utc> {
    now + Duration::days(HORIZON_DAYS)
}

/// Fixed priority order consulted at every placement decision: deadline-bearing
/// tasks ascending by due instant, then backlog tasks ascending by earliest
/// eligibility. Tasks in the deadline group without a due instant sort last
/// within that group so they cannot starve dated work.
pub fn build_task_queue(tasks: Vec<Task>) -> Vec<Task> {
    let (mut deadline, mut backlog): (Vec<Task>, Vec<Task>) = tasks
        .into_iter()
        .filter(Task::is_schedulable)
        .partition(|task| !task.backlog);

    deadline.sort_by_key(|task| (task.due_at.is_none(), task.due_at));
    backlog.sort_by_key(|task| task.start_after);

    deadline.extend(backlog);
    deadline
}

/// Fixed busy intervals for the run: everything externally sourced that
/// intersects the horizon, ascending by start. Generated events are excluded
/// so a run never treats its own previous output as an obstacle.
pub fn build_obstacle_queue(
    events: Vec<Event>,
    now: DateTime<Utc>,
    horizon_end: DateTime<Utc>,
) -> Vec<Event> {
    let mut obstacles: Vec<Event> = events
        .into_iter()
        .filter(|event| !event.kind.is_generated())
        .filter(|event| event.start_at <= horizon_end && event.end_at >= now)
        .collect();
    obstacles.sort_by_key(|event| event.start_at);
    obstacles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::EventKind;
    use chrono::TimeZone;

    fn fixed_time(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, day, hour, 0, 0).unwrap()
    }

    fn task(id: &str, due_day: Option<u32>, backlog: bool, start_day: u32) -> Task {
        Task {
            id: id.to_string(),
            user_id: "usr-1".to_string(),
            title: id.to_string(),
            notes: None,
            duration_minutes: 60,
            due_at: due_day.map(|day| fixed_time(day, 17)),
            start_after: fixed_time(start_day, 0),
            chunked: false,
            chunk_minutes: None,
            repeat: None,
            backlog,
            completed: false,
            completed_at: None,
            scheduled_at: None,
        }
    }

    fn event(id: &str, kind: EventKind, start: DateTime<Utc>, end: DateTime<Utc>) -> Event {
        Event {
            id: id.to_string(),
            user_id: "usr-1".to_string(),
            title: id.to_string(),
            start_at: start,
            end_at: end,
            notes: None,
            kind,
            external_id: None,
            task_id: None,
        }
    }

    #[test]
    fn deadline_group_precedes_backlog_group() {
        let queue = build_task_queue(vec![
            task("backlog-early", None, true, 10),
            task("due-late", Some(25), false, 10),
            task("due-early", Some(18), false, 10),
            task("backlog-late", None, true, 12),
        ]);
        let ids: Vec<&str> = queue.iter().map(|task| task.id.as_str()).collect();
        assert_eq!(ids, vec!["due-early", "due-late", "backlog-early", "backlog-late"]);
    }

    #[test]
    fn undated_deadline_tasks_sort_last_within_their_group() {
        let queue = build_task_queue(vec![
            task("undated", None, false, 10),
            task("dated", Some(20), false, 10),
        ]);
        let ids: Vec<&str> = queue.iter().map(|task| task.id.as_str()).collect();
        assert_eq!(ids, vec!["dated", "undated"]);
    }

    #[test]
    fn completed_and_zero_duration_tasks_are_excluded() {
        let mut done = task("done", Some(20), false, 10);
        done.completed = true;
        let mut empty = task("empty", Some(20), false, 10);
        empty.duration_minutes = 0;
        let queue = build_task_queue(vec![done, empty, task("live", Some(20), false, 10)]);
        let ids: Vec<&str> = queue.iter().map(|task| task.id.as_str()).collect();
        assert_eq!(ids, vec!["live"]);
    }

    #[test]
    fn obstacle_queue_is_sorted_and_horizon_bounded() {
        let now = fixed_time(16, 8);
        let end = horizon_end(now);
        let events = vec![
            event("late", EventKind::User, fixed_time(17, 9), fixed_time(17, 10)),
            event("early", EventKind::External, fixed_time(16, 9), fixed_time(16, 10)),
            // Straddles "now": still an obstacle.
            event("running", EventKind::User, fixed_time(16, 7), fixed_time(16, 9)),
            // Ended before the run started.
            event("past", EventKind::User, fixed_time(15, 9), fixed_time(15, 10)),
            // Beyond the 14-day horizon.
            event("distant", EventKind::User, fixed_time(16, 9) + Duration::days(20), fixed_time(16, 10) + Duration::days(20)),
        ];
        let obstacles = build_obstacle_queue(events, now, end);
        let ids: Vec<&str> = obstacles.iter().map(|event| event.id.as_str()).collect();
        assert_eq!(ids, vec!["running", "early", "late"]);
    }

    #[test]
    fn generated_events_never_become_obstacles() {
        let now = fixed_time(16, 8);
        let events = vec![
            event("own-task", EventKind::Task, fixed_time(16, 9), fixed_time(16, 10)),
            event("own-chunk", EventKind::TaskChunk, fixed_time(16, 10), fixed_time(16, 11)),
            event("meeting", EventKind::External, fixed_time(16, 11), fixed_time(16, 12)),
        ];
        let obstacles = build_obstacle_queue(events, now, horizon_end(now));
        let ids: Vec<&str> = obstacles.iter().map(|event| event.id.as_str()).collect();
        assert_eq!(ids, vec!["meeting"]);
    }
}
