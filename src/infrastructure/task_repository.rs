use crate::domain::models::{Repeat, Task};
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait TaskRepository: Send + Sync {
    fn find_by_id(&self, task_id: &str) -> Result<Option<Task>, InfraError>;
    fn find_incomplete(&self, user_id: &str) -> Result<Vec<Task>, InfraError>;
    fn find_completed(&self, user_id: &str) -> Result<Vec<Task>, InfraError>;
    fn insert(&self, task: &Task) -> Result<(), InfraError>;
    fn update(&self, task: &Task) -> Result<(), InfraError>;
    fn delete(&self, task_id: &str) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteTaskRepository {
    db_path: PathBuf,
}

impl SqliteTaskRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(InfraError::from)
    }
}

const TASK_COLUMNS: &str = "id, user_id, title, notes, duration_minutes, due_at, start_after, \
     chunked, chunk_minutes, repeat, backlog, completed, completed_at, scheduled_at";

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<RawTask> {
    Ok(RawTask {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        notes: row.get(3)?,
        duration_minutes: row.get(4)?,
        due_at: row.get(5)?,
        start_after: row.get(6)?,
        chunked: row.get(7)?,
        chunk_minutes: row.get(8)?,
        repeat: row.get(9)?,
        backlog: row.get(10)?,
        completed: row.get(11)?,
        completed_at: row.get(12)?,
        scheduled_at: row.get(13)?,
    })
}

struct RawTask {
    id: String,
    user_id: String,
    title: String,
    notes: Option<String>,
    duration_minutes: u32,
    due_at: Option<String>,
    start_after: String,
    chunked: bool,
    chunk_minutes: Option<u32>,
    repeat: Option<String>,
    backlog: bool,
    completed: bool,
    completed_at: Option<String>,
    scheduled_at: Option<String>,
}

impl RawTask {
    fn into_task(self) -> Result<Task, InfraError> {
        Ok(Task {
            due_at: parse_optional_instant(self.due_at.as_deref(), "tasks.due_at")?,
            start_after: parse_instant(&self.start_after, "tasks.start_after")?,
            repeat: self
                .repeat
                .as_deref()
                .map(|value| Repeat::parse(value).map_err(InfraError::InvalidConfig))
                .transpose()?,
            completed_at: parse_optional_instant(self.completed_at.as_deref(), "tasks.completed_at")?,
            scheduled_at: parse_optional_instant(self.scheduled_at.as_deref(), "tasks.scheduled_at")?,
            id: self.id,
            user_id: self.user_id,
            title: self.title,
            notes: self.notes,
            duration_minutes: self.duration_minutes,
            chunked: self.chunked,
            chunk_minutes: self.chunk_minutes,
            backlog: self.backlog,
            completed: self.completed,
        })
    }
}

pub(crate) fn parse_instant(raw: &str, column: &str) -> Result<DateTime<Utc>, InfraError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| InfraError::InvalidConfig(format!("invalid {column} '{raw}': {error}")))
}

pub(crate) fn parse_optional_instant(
    raw: Option<&str>,
    column: &str,
) -> Result<Option<DateTime<Utc>>, InfraError> {
    raw.map(|value| parse_instant(value, column)).transpose()
}

impl TaskRepository for SqliteTaskRepository {
    fn find_by_id(&self, task_id: &str) -> Result<Option<Task>, InfraError> {
        let connection = self.connect()?;
        let raw = connection
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![task_id],
                task_from_row,
            )
            .optional()?;
        raw.map(RawTask::into_task).transpose()
    }

    fn find_incomplete(&self, user_id: &str) -> Result<Vec<Task>, InfraError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE user_id = ?1 AND completed = 0"
        ))?;
        let rows = statement.query_map(params![user_id], task_from_row)?;
        let mut tasks = Vec::new();
        for raw in rows {
            tasks.push(raw?.into_task()?);
        }
        Ok(tasks)
    }

    fn find_completed(&self, user_id: &str) -> Result<Vec<Task>, InfraError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE user_id = ?1 AND completed = 1
             ORDER BY completed_at DESC"
        ))?;
        let rows = statement.query_map(params![user_id], task_from_row)?;
        let mut tasks = Vec::new();
        for raw in rows {
            tasks.push(raw?.into_task()?);
        }
        Ok(tasks)
    }

    fn insert(&self, task: &Task) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO tasks (id, user_id, title, notes, duration_minutes, due_at, start_after,
                                chunked, chunk_minutes, repeat, backlog, completed, completed_at,
                                scheduled_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                task.id,
                task.user_id,
                task.title,
                task.notes,
                task.duration_minutes,
                task.due_at.map(|at| at.to_rfc3339()),
                task.start_after.to_rfc3339(),
                task.chunked,
                task.chunk_minutes,
                task.repeat.map(Repeat::as_str),
                task.backlog,
                task.completed,
                task.completed_at.map(|at| at.to_rfc3339()),
                task.scheduled_at.map(|at| at.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    fn update(&self, task: &Task) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute(
            "UPDATE tasks SET user_id = ?2, title = ?3, notes = ?4, duration_minutes = ?5,
                              due_at = ?6, start_after = ?7, chunked = ?8, chunk_minutes = ?9,
                              repeat = ?10, backlog = ?11, completed = ?12, completed_at = ?13,
                              scheduled_at = ?14
             WHERE id = ?1",
            params![
                task.id,
                task.user_id,
                task.title,
                task.notes,
                task.duration_minutes,
                task.due_at.map(|at| at.to_rfc3339()),
                task.start_after.to_rfc3339(),
                task.chunked,
                task.chunk_minutes,
                task.repeat.map(Repeat::as_str),
                task.backlog,
                task.completed,
                task.completed_at.map(|at| at.to_rfc3339()),
                task.scheduled_at.map(|at| at.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    fn delete(&self, task_id: &str) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute("DELETE FROM tasks WHERE id = ?1", params![task_id])?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTaskRepository {
    tasks: Mutex<HashMap<String, Task>>,
}

impl InMemoryTaskRepository {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Task>>, InfraError> {
        self.tasks
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("task store lock poisoned: {error}")))
    }
}

impl TaskRepository for InMemoryTaskRepository {
    fn find_by_id(&self, task_id: &str) -> Result<Option<Task>, InfraError> {
        Ok(self.lock()?.get(task_id).cloned())
    }

    fn find_incomplete(&self, user_id: &str) -> Result<Vec<Task>, InfraError> {
        let tasks = self.lock()?;
        let mut found: Vec<Task> = tasks
            .values()
            .filter(|task| task.user_id == user_id && !task.completed)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    fn find_completed(&self, user_id: &str) -> Result<Vec<Task>, InfraError> {
        let tasks = self.lock()?;
        let mut found: Vec<Task> = tasks
            .values()
            .filter(|task| task.user_id == user_id && task.completed)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        Ok(found)
    }

    fn insert(&self, task: &Task) -> Result<(), InfraError> {
        self.lock()?.insert(task.id.clone(), task.clone());
        Ok(())
    }

    fn update(&self, task: &Task) -> Result<(), InfraError> {
        self.lock()?.insert(task.id.clone(), task.clone());
        Ok(())
    }

    fn delete(&self, task_id: &str) -> Result<(), InfraError> {
        self.lock()?.remove(task_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_task(id: &str) -> Task {
        Task {
            id: id.to_string(),
            user_id: "usr-1".to_string(),
            title: "Review notes".to_string(),
            notes: Some("chapter 4".to_string()),
            duration_minutes: 45,
            due_at: Some(Utc.with_ymd_and_hms(2026, 2, 20, 17, 0, 0).unwrap()),
            start_after: Utc.with_ymd_and_hms(2026, 2, 16, 0, 0, 0).unwrap(),
            chunked: true,
            chunk_minutes: Some(15),
            repeat: Some(Repeat::Weekly),
            backlog: false,
            completed: false,
            completed_at: None,
            scheduled_at: None,
        }
    }

    #[test]
    fn sqlite_repository_roundtrips_tasks() {
        let dir = std::env::temp_dir().join(format!("taskweave-tasks-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        let db_path = dir.join("tasks-roundtrip.sqlite");
        let _ = std::fs::remove_file(&db_path);
        crate::infrastructure::storage::initialize_database(&db_path).expect("init db");

        let repository = SqliteTaskRepository::new(&db_path);
        let task = sample_task("tsk-1");
        repository.insert(&task).expect("insert");

        let loaded = repository
            .find_by_id("tsk-1")
            .expect("query")
            .expect("task exists");
        assert_eq!(loaded, task);

        let mut updated = task.clone();
        updated.duration_minutes = 30;
        updated.completed = true;
        updated.completed_at = Some(Utc.with_ymd_and_hms(2026, 2, 17, 12, 0, 0).unwrap());
        repository.update(&updated).expect("update");

        assert!(repository.find_incomplete("usr-1").expect("incomplete").is_empty());
        let completed = repository.find_completed("usr-1").expect("completed");
        assert_eq!(completed, vec![updated]);

        repository.delete("tsk-1").expect("delete");
        assert!(repository.find_by_id("tsk-1").expect("query").is_none());
    }

    #[test]
    fn in_memory_repository_filters_by_user_and_completion() {
        let repository = InMemoryTaskRepository::default();
        let mut mine = sample_task("tsk-1");
        mine.repeat = None;
        let mut theirs = sample_task("tsk-2");
        theirs.user_id = "usr-2".to_string();
        repository.insert(&mine).expect("insert mine");
        repository.insert(&theirs).expect("insert theirs");

        let incomplete = repository.find_incomplete("usr-1").expect("incomplete");
        assert_eq!(incomplete, vec![mine]);
        assert!(repository.find_completed("usr-1").expect("completed").is_empty());
    }
}
