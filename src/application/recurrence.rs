use crate::domain::models::{Repeat, Task};
use chrono::{DateTime, Days, Months, Utc};

/// `at` moved forward by one cadence unit. Month and year steps clamp to the
/// last day of a shorter target month (Jan 31 + 1 month = Feb 28).
pub fn advance(at: DateTime<Utc>, cadence: Repeat) -> Option<DateTime<Utc>> {
    match cadence {
        Repeat::Daily => at.checked_add_days(Days::new(1)),
        Repeat::Weekly => at.checked_add_days(Days::new(7)),
        Repeat::Monthly => at.checked_add_months(Months::new(1)),
        Repeat::Yearly => at.checked_add_months(Months::new(12)),
    }
}

/// The next instance of a recurring task: a fresh, uncompleted copy with the
/// not-before and due instants pushed one cadence forward and the full
/// duration restored. `None` when the task does not repeat or a shifted
/// instant would leave the calendar's range.
pub fn spawn_next(task: &Task, new_id: String, total_duration_minutes: u32) -> Option<Task> {
    let cadence = task.repeat?;
    let start_after = advance(task.start_after, cadence)?;
    let due_at = match task.due_at {
        Some(due_at) => Some(advance(due_at, cadence)?),
        None => None,
    };
    Some(Task {
        id: new_id,
        start_after,
        due_at,
        duration_minutes: total_duration_minutes,
        completed: false,
        completed_at: None,
        scheduled_at: None,
        ..task.clone()
    })
}
