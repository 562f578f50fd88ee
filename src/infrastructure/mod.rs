pub mod error;
pub mod event_repository;
pub mod external_calendar;
pub mod settings_repository;
pub mod storage;
pub mod task_repository;
