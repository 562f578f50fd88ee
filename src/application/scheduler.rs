use crate::domain::models::{Event, ScheduledSlot, Task, WorkingSchedule};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

const MAX_ITERATIONS: u32 = 10_000;
const NO_PROGRESS_LIMIT: u32 = 100;
// Stand-in for "no next obstacle"; far larger than the horizon.
const FAR_FUTURE_DAYS: i64 = 999;

/// In-run chunking state for one task. Absent entry means the task has not
/// been chunked yet and its remaining duration equals its stored duration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkProgress {
    pub chunk_number: u32,
    pub remaining: Duration,
}

/// Result of one scheduling run: the placements, the task states mutated by
/// committing them, and the tasks the run had to give up on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulePlan {
    pub slots: Vec<ScheduledSlot>,
    pub tasks: Vec<Task>,
    pub unplaced: Vec<String>,
}

/// Bounds the sweep loop: a hard iteration cap plus a no-progress counter
/// that resets whenever the queue shrinks. Either limit forces an exit.
#[derive(Debug)]
pub struct TerminationGuard {
    iterations: u32,
    no_progress: u32,
    last_queue_len: usize,
}

impl TerminationGuard {
    pub fn new(queue_len: usize) -> Self {
        Self {
            iterations: 0,
            no_progress: 0,
            last_queue_len: queue_len,
        }
    }

    /// Counts one iteration against the queue length; `true` means stop.
    pub fn tripped(&mut self, queue_len: usize) -> bool {
        self.iterations += 1;
        if self.iterations > MAX_ITERATIONS {
            return true;
        }
        if queue_len == self.last_queue_len {
            self.no_progress += 1;
        } else {
            self.no_progress = 0;
            self.last_queue_len = queue_len;
        }
        self.no_progress > NO_PROGRESS_LIMIT
    }
}

/// Sweeps a cursor forward from `now`, skipping obstacles and non-working
/// time, and greedily places each queued task (or chunks of it) into free
/// working time. Pure: mutated task states come back in the plan instead of
/// being written anywhere.
///
/// `queue` must already be in priority order (see `queue::build_task_queue`)
/// and `obstacles` ascending by start (see `queue::build_obstacle_queue`).
pub fn plan_schedule(
    queue: Vec<Task>,
    obstacles: &[Event],
    schedule: &WorkingSchedule,
    now: DateTime<Utc>,
) -> SchedulePlan {
    let mut plan = SchedulePlan::default();
    if schedule.days.is_empty() {
        return plan;
    }

    let mut queue = queue;
    let mut chunks: HashMap<String, ChunkProgress> = HashMap::new();
    let mut updated: HashMap<String, Task> = HashMap::new();
    let mut cursor = now;
    let mut obstacle_index = 0;
    let mut guard = TerminationGuard::new(queue.len());

    while !queue.is_empty() {
        if guard.tripped(queue.len()) {
            plan.unplaced = queue.iter().map(|task| task.id.clone()).collect();
            break;
        }

        // Inside (or past) the next obstacle: hop over it.
        if let Some(obstacle) = obstacles.get(obstacle_index)
            && obstacle.start_at <= cursor
        {
            if cursor < obstacle.end_at {
                cursor = obstacle.end_at;
            }
            obstacle_index += 1;
            continue;
        }

        let today = schedule.local_date(cursor);
        let Some((window_start, window_end)) = schedule.window_for(today) else {
            // Same wall-clock time, next day.
            cursor += Duration::hours(24);
            continue;
        };

        if cursor < window_start {
            cursor = window_start;
            continue;
        }
        if cursor >= window_end {
            cursor = window_start + Duration::hours(24);
            continue;
        }

        // Free, in-window time.
        let next_obstacle = obstacles.get(obstacle_index);
        let to_obstacle = next_obstacle
            .map(|obstacle| obstacle.start_at - cursor)
            .unwrap_or_else(|| Duration::days(FAR_FUTURE_DAYS));
        let available = to_obstacle.min(window_end - cursor);

        let mut placed = false;
        for index in 0..queue.len() {
            let candidate = &queue[index];
            // Not-before is strict: the cursor must be past it.
            if cursor <= candidate.start_after {
                continue;
            }
            let remaining = chunks
                .get(&candidate.id)
                .map(|progress| progress.remaining)
                .unwrap_or_else(|| Duration::minutes(candidate.duration_minutes as i64));

            if available >= remaining {
                let chunk_number = chunks.get_mut(&candidate.id).map(|progress| {
                    progress.chunk_number += 1;
                    progress.chunk_number
                });
                let mut task = queue.remove(index);
                let end = cursor + remaining;
                plan.slots.push(ScheduledSlot {
                    task_id: task.id.clone(),
                    start_at: cursor,
                    end_at: end,
                    chunk: chunk_number,
                    label: slot_label(&task.title, chunk_number),
                });
                task.duration_minutes = task
                    .duration_minutes
                    .saturating_sub(remaining.num_minutes() as u32);
                task.scheduled_at = Some(cursor);
                updated.insert(task.id.clone(), task);
                cursor = end;
                placed = true;
                break;
            }

            if let Some(chunk_minutes) = candidate.effective_chunk_minutes() {
                let chunk_len = Duration::minutes(chunk_minutes as i64);
                if available >= chunk_len {
                    // As many whole chunks as fit; the tail shorter than one
                    // chunk stays free.
                    let num_chunks = available.num_minutes() / chunk_minutes as i64;
                    let chunk_duration = Duration::minutes(num_chunks * chunk_minutes as i64);
                    let progress = chunks
                        .entry(candidate.id.clone())
                        .or_insert_with(|| ChunkProgress {
                            chunk_number: 0,
                            remaining,
                        });
                    progress.chunk_number += 1;
                    progress.remaining -= chunk_duration;
                    let chunk_number = progress.chunk_number;

                    let task = &mut queue[index];
                    let end = cursor + chunk_duration;
                    plan.slots.push(ScheduledSlot {
                        task_id: task.id.clone(),
                        start_at: cursor,
                        end_at: end,
                        chunk: Some(chunk_number),
                        label: slot_label(&task.title, Some(chunk_number)),
                    });
                    task.duration_minutes = task
                        .duration_minutes
                        .saturating_sub(chunk_duration.num_minutes() as u32);
                    updated.insert(task.id.clone(), task.clone());
                    cursor = end;
                    placed = true;
                    break;
                }
            }
        }

        if !placed {
            // Nothing fits here; jump to whichever comes first.
            let mut next_cursor = window_end;
            if let Some(obstacle) = next_obstacle
                && obstacle.start_at <= next_cursor
            {
                next_cursor = obstacle.start_at;
            }
            cursor = next_cursor;
        }
    }

    plan.tasks = updated.into_values().collect();
    plan.tasks.sort_by(|a, b| a.id.cmp(&b.id));
    plan
}

fn slot_label(title: &str, chunk_number: Option<u32>) -> String {
    match chunk_number {
        Some(number) => format!("{title} ({number})"),
        None => title.to_string(),
    }
}
