//! Task-to-calendar auto-scheduling backend: sweeps a user's pending tasks
//! into the free working time between their fixed calendar events.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::bootstrap::{BootstrapResult, bootstrap_workspace};
pub use application::calendar_import::{CalendarAccount, CalendarImportService, ImportOutcome};
pub use application::queue::{build_obstacle_queue, build_task_queue, horizon_end};
pub use application::scheduler::{SchedulePlan, plan_schedule};
pub use application::service::{NowProvider, ScheduleOutcome, SchedulerService};
pub use domain::models::{
    Event, EventKind, Repeat, ScheduledSlot, Task, WorkingHours, WorkingSchedule,
};
pub use infrastructure::error::InfraError;
