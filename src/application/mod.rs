pub mod bootstrap;
pub mod calendar_import;
pub mod queue;
pub mod recurrence;
pub mod scheduler;
pub mod service;
