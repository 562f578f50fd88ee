use crate::application::queue::{build_obstacle_queue, build_task_queue, horizon_end};
use crate::application::recurrence;
use crate::application::scheduler::plan_schedule;
use crate::domain::models::{Event, EventKind, Task};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::event_repository::EventRepository;
use crate::infrastructure::settings_repository::SettingsRepository;
use crate::infrastructure::task_repository::TaskRepository;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

// How far ahead pending placements are looked up before a rebuild; far
// larger than the scheduling horizon.
const PENDING_WINDOW_DAYS: i64 = 999;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_id(prefix: &str) -> String {
    let sequence = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{sequence}", Utc::now().timestamp_micros())
}

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScheduleOutcome {
    pub placed: usize,
    pub unplaced: Vec<String>,
}

/// Facade over the stores: runs the scheduler for one user, completes tasks
/// and spawns their recurring successors. Runs for the same user serialize
/// on a per-user lock so two concurrent requests cannot interleave the
/// delete-and-rebuild of generated events.
pub struct SchedulerService<T, E, S> {
    tasks: Arc<T>,
    events: Arc<E>,
    settings: Arc<S>,
    logs_dir: PathBuf,
    log_guard: Mutex<()>,
    user_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    now_provider: NowProvider,
}

impl<T, E, S> SchedulerService<T, E, S>
where
    T: TaskRepository,
    E: EventRepository,
    S: SettingsRepository,
{
    pub fn new(tasks: Arc<T>, events: Arc<E>, settings: Arc<S>, logs_dir: PathBuf) -> Self {
        Self {
            tasks,
            events,
            settings,
            logs_dir,
            log_guard: Mutex::new(()),
            user_locks: Mutex::new(HashMap::new()),
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    /// Rebuilds the user's generated schedule. Placements still pending at
    /// the current instant are torn down and their minutes credited back to
    /// their tasks, so rebuilding is safe to repeat: an immediate re-run
    /// reproduces the same slots, and a run after all slots have passed
    /// places nothing. Without working hours (or with an empty working-day
    /// set) the run is a no-op.
    pub fn schedule_tasks(&self, user_id: &str) -> Result<ScheduleOutcome, InfraError> {
        let user_lock = self.user_lock(user_id)?;
        let _run_guard = user_lock
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("user lock poisoned: {error}")))?;

        let Some(hours) = self.settings.working_hours(user_id)? else {
            self.log_info(
                "schedule_tasks",
                &format!("user {user_id} has no working hours configured; nothing to schedule"),
            );
            return Ok(ScheduleOutcome::default());
        };
        let schedule = hours.resolve().map_err(InfraError::InvalidConfig)?;
        if schedule.days.is_empty() {
            self.log_info(
                "schedule_tasks",
                &format!("user {user_id} has no working days configured; nothing to schedule"),
            );
            return Ok(ScheduleOutcome::default());
        }

        let now = (self.now_provider)();
        let events = self
            .events
            .find_overlapping(user_id, now, now + Duration::days(PENDING_WINDOW_DAYS))?;

        // Minutes held by pending placements, keyed by task. Those events are
        // about to be deleted, so their tasks get the minutes back before the
        // queue is built.
        let mut pending_minutes: HashMap<String, u32> = HashMap::new();
        for event in &events {
            if event.kind.is_generated()
                && event.end_at > now
                && let Some(task_id) = event.task_id.as_deref()
            {
                let minutes = (event.end_at - event.start_at).num_minutes().max(0) as u32;
                *pending_minutes.entry(task_id.to_string()).or_insert(0) += minutes;
            }
        }

        let mut tasks = self.tasks.find_incomplete(user_id)?;
        let mut credited: HashMap<String, Task> = HashMap::new();
        for task in &mut tasks {
            if let Some(minutes) = pending_minutes.get(&task.id) {
                task.duration_minutes = task.duration_minutes.saturating_add(*minutes);
                credited.insert(task.id.clone(), task.clone());
            }
        }
        let notes_by_task: HashMap<String, Option<String>> = tasks
            .iter()
            .map(|task| (task.id.clone(), task.notes.clone()))
            .collect();

        let queue = build_task_queue(tasks);
        let obstacles = build_obstacle_queue(events, now, horizon_end(now));
        let plan = plan_schedule(queue, &obstacles, &schedule, now);

        let generated: Vec<Event> = plan
            .slots
            .iter()
            .map(|slot| Event {
                id: next_id("evt"),
                user_id: user_id.to_string(),
                title: slot.label.clone(),
                start_at: slot.start_at,
                end_at: slot.end_at,
                notes: notes_by_task.get(&slot.task_id).cloned().flatten(),
                kind: if slot.chunk.is_some() {
                    EventKind::TaskChunk
                } else {
                    EventKind::Task
                },
                external_id: None,
                task_id: Some(slot.task_id.clone()),
            })
            .collect();
        self.events.replace_generated(user_id, now, &generated)?;

        for task in &plan.tasks {
            self.tasks.update(task)?;
            credited.remove(&task.id);
        }
        // Credited tasks the run could not place still need their restored
        // duration persisted, their events are gone.
        for task in credited.values() {
            self.tasks.update(task)?;
        }

        if !plan.unplaced.is_empty() {
            self.log_error(
                "schedule_tasks",
                &format!("unschedulable tasks for user {user_id}: {}", plan.unplaced.join(", ")),
            );
        }
        self.log_info(
            "schedule_tasks",
            &format!("user {user_id}: placed {} slot(s)", plan.slots.len()),
        );

        Ok(ScheduleOutcome {
            placed: plan.slots.len(),
            unplaced: plan.unplaced,
        })
    }

    /// Marks a task done. A repeating task also spawns its next occurrence,
    /// with the full duration restored from the remaining minutes plus every
    /// slot already placed for it, and the clone is returned to the caller.
    /// Does not re-run the scheduler.
    pub fn complete_task(&self, task_id: &str) -> Result<Option<Task>, InfraError> {
        let mut task = self
            .tasks
            .find_by_id(task_id)?
            .ok_or_else(|| InfraError::NotFound(format!("task '{task_id}'")))?;
        if task.completed {
            return Ok(None);
        }
        let now = (self.now_provider)();
        task.completed = true;
        task.completed_at = Some(now);
        self.tasks.update(&task)?;

        if task.repeat.is_none() {
            return Ok(None);
        }
        let placed: u32 = self
            .events
            .find_by_task(task_id)?
            .iter()
            .map(|event| (event.end_at - event.start_at).num_minutes().max(0) as u32)
            .sum();
        let total = task.duration_minutes.saturating_add(placed);
        match recurrence::spawn_next(&task, next_id("tsk"), total) {
            Some(next) => {
                self.tasks.insert(&next)?;
                self.log_info(
                    "complete_task",
                    &format!("task {task_id} repeats; spawned {}", next.id),
                );
                Ok(Some(next))
            }
            None => Ok(None),
        }
    }

    /// Records `minutes` of worked-off duration. A task driven to zero is
    /// completed through the same path as `complete_task`.
    pub fn complete_task_chunk(
        &self,
        task_id: &str,
        minutes: u32,
    ) -> Result<Option<Task>, InfraError> {
        let mut task = self
            .tasks
            .find_by_id(task_id)?
            .ok_or_else(|| InfraError::NotFound(format!("task '{task_id}'")))?;
        if task.completed {
            return Ok(None);
        }
        task.duration_minutes = task.duration_minutes.saturating_sub(minutes);
        self.tasks.update(&task)?;
        if task.duration_minutes == 0 {
            return self.complete_task(task_id);
        }
        Ok(None)
    }

    fn user_lock(&self, user_id: &str) -> Result<Arc<Mutex<()>>, InfraError> {
        let mut locks = self
            .user_locks
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("user lock map poisoned: {error}")))?;
        Ok(Arc::clone(locks.entry(user_id.to_string()).or_default()))
    }

    pub fn log_info(&self, operation: &str, message: &str) {
        self.append_log("info", operation, message);
    }

    pub fn log_error(&self, operation: &str, message: &str) {
        self.append_log("error", operation, message);
    }

    fn append_log(&self, level: &str, operation: &str, message: &str) {
        let Ok(_guard) = self.log_guard.lock() else {
            return;
        };
        let path = self.logs_dir.join("scheduler.log");
        let payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level,
            "operation": operation,
            "message": message,
        });

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{}", payload);
        }
    }
}
