use crate::domain::models::{Event, EventKind};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::task_repository::parse_instant;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait EventRepository: Send + Sync {
    fn find_by_id(&self, event_id: &str) -> Result<Option<Event>, InfraError>;

    /// Events intersecting `[from, to]`, ascending by start instant.
    fn find_overlapping(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Event>, InfraError>;

    /// Events generated for one task, ascending by start instant.
    fn find_by_task(&self, task_id: &str) -> Result<Vec<Event>, InfraError>;

    fn insert(&self, event: &Event) -> Result<(), InfraError>;
    fn update(&self, event: &Event) -> Result<(), InfraError>;
    fn delete(&self, event_id: &str) -> Result<(), InfraError>;

    /// Atomically replaces the user's still-pending generated (task-origin)
    /// events, those ending after `from`, with `events`. Placements already
    /// in the past stay untouched. A concurrent reader sees either the old
    /// schedule or the new one, never a half-rebuilt mix.
    fn replace_generated(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
        events: &[Event],
    ) -> Result<(), InfraError>;

    /// Inserts or refreshes an imported event keyed by its external id.
    fn upsert_external(&self, event: &Event) -> Result<(), InfraError>;

    /// Removes imported events whose external id is no longer present upstream.
    fn prune_external(&self, user_id: &str, keep_external_ids: &[String]) -> Result<usize, InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteEventRepository {
    db_path: PathBuf,
}

impl SqliteEventRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(InfraError::from)
    }
}

const EVENT_COLUMNS: &str = "id, user_id, title, start_at, end_at, notes, kind, external_id, task_id";

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<RawEvent> {
    Ok(RawEvent {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        start_at: row.get(3)?,
        end_at: row.get(4)?,
        notes: row.get(5)?,
        kind: row.get(6)?,
        external_id: row.get(7)?,
        task_id: row.get(8)?,
    })
}

struct RawEvent {
    id: String,
    user_id: String,
    title: String,
    start_at: String,
    end_at: String,
    notes: Option<String>,
    kind: String,
    external_id: Option<String>,
    task_id: Option<String>,
}

impl RawEvent {
    fn into_event(self) -> Result<Event, InfraError> {
        Ok(Event {
            start_at: parse_instant(&self.start_at, "events.start_at")?,
            end_at: parse_instant(&self.end_at, "events.end_at")?,
            kind: EventKind::parse(&self.kind).map_err(InfraError::InvalidConfig)?,
            id: self.id,
            user_id: self.user_id,
            title: self.title,
            notes: self.notes,
            external_id: self.external_id,
            task_id: self.task_id,
        })
    }
}

fn insert_event(connection: &Connection, event: &Event) -> Result<(), InfraError> {
    connection.execute(
        "INSERT INTO events (id, user_id, title, start_at, end_at, notes, kind, external_id, task_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            event.id,
            event.user_id,
            event.title,
            event.start_at.to_rfc3339(),
            event.end_at.to_rfc3339(),
            event.notes,
            event.kind.as_str(),
            event.external_id,
            event.task_id,
        ],
    )?;
    Ok(())
}

impl EventRepository for SqliteEventRepository {
    fn find_by_id(&self, event_id: &str) -> Result<Option<Event>, InfraError> {
        let connection = self.connect()?;
        let raw = connection
            .query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1"),
                params![event_id],
                event_from_row,
            )
            .optional()?;
        raw.map(RawEvent::into_event).transpose()
    }

    fn find_overlapping(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Event>, InfraError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events
             WHERE user_id = ?1 AND start_at <= ?2 AND end_at >= ?3
             ORDER BY start_at ASC"
        ))?;
        let rows = statement.query_map(
            params![user_id, to.to_rfc3339(), from.to_rfc3339()],
            event_from_row,
        )?;
        let mut events = Vec::new();
        for raw in rows {
            events.push(raw?.into_event()?);
        }
        Ok(events)
    }

    fn find_by_task(&self, task_id: &str) -> Result<Vec<Event>, InfraError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE task_id = ?1 ORDER BY start_at ASC"
        ))?;
        let rows = statement.query_map(params![task_id], event_from_row)?;
        let mut events = Vec::new();
        for raw in rows {
            events.push(raw?.into_event()?);
        }
        Ok(events)
    }

    fn insert(&self, event: &Event) -> Result<(), InfraError> {
        let connection = self.connect()?;
        insert_event(&connection, event)
    }

    fn update(&self, event: &Event) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute(
            "UPDATE events SET user_id = ?2, title = ?3, start_at = ?4, end_at = ?5, notes = ?6,
                               kind = ?7, external_id = ?8, task_id = ?9
             WHERE id = ?1",
            params![
                event.id,
                event.user_id,
                event.title,
                event.start_at.to_rfc3339(),
                event.end_at.to_rfc3339(),
                event.notes,
                event.kind.as_str(),
                event.external_id,
                event.task_id,
            ],
        )?;
        Ok(())
    }

    fn delete(&self, event_id: &str) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute("DELETE FROM events WHERE id = ?1", params![event_id])?;
        Ok(())
    }

    fn replace_generated(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
        events: &[Event],
    ) -> Result<(), InfraError> {
        let mut connection = self.connect()?;
        let transaction = connection.transaction()?;
        transaction.execute(
            "DELETE FROM events WHERE user_id = ?1 AND kind IN (?2, ?3) AND end_at > ?4",
            params![
                user_id,
                EventKind::Task.as_str(),
                EventKind::TaskChunk.as_str(),
                from.to_rfc3339(),
            ],
        )?;
        for event in events {
            insert_event(&transaction, event)?;
        }
        transaction.commit()?;
        Ok(())
    }

    fn upsert_external(&self, event: &Event) -> Result<(), InfraError> {
        let external_id = event.external_id.as_deref().ok_or_else(|| {
            InfraError::InvalidConfig("external_id is required for upsert_external".to_string())
        })?;
        let connection = self.connect()?;
        let existing: Option<String> = connection
            .query_row(
                "SELECT id FROM events WHERE user_id = ?1 AND external_id = ?2",
                params![event.user_id, external_id],
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            Some(id) => {
                connection.execute(
                    "UPDATE events SET title = ?2, start_at = ?3, end_at = ?4, notes = ?5, kind = ?6
                     WHERE id = ?1",
                    params![
                        id,
                        event.title,
                        event.start_at.to_rfc3339(),
                        event.end_at.to_rfc3339(),
                        event.notes,
                        event.kind.as_str(),
                    ],
                )?;
                Ok(())
            }
            None => insert_event(&connection, event),
        }
    }

    fn prune_external(&self, user_id: &str, keep_external_ids: &[String]) -> Result<usize, InfraError> {
        let connection = self.connect()?;
        let placeholders = (0..keep_external_ids.len())
            .map(|index| format!("?{}", index + 3))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = if keep_external_ids.is_empty() {
            "DELETE FROM events WHERE user_id = ?1 AND kind = ?2".to_string()
        } else {
            format!(
                "DELETE FROM events WHERE user_id = ?1 AND kind = ?2
                 AND external_id NOT IN ({placeholders})"
            )
        };

        let mut values: Vec<&dyn rusqlite::ToSql> = vec![&user_id];
        let kind = EventKind::External.as_str();
        values.push(&kind);
        for id in keep_external_ids {
            values.push(id);
        }
        let removed = connection.execute(&sql, values.as_slice())?;
        Ok(removed)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryEventRepository {
    events: Mutex<HashMap<String, Event>>,
}

impl InMemoryEventRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Event>>, InfraError> {
        self.events
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("event store lock poisoned: {error}")))
    }
}

impl EventRepository for InMemoryEventRepository {
    fn find_by_id(&self, event_id: &str) -> Result<Option<Event>, InfraError> {
        Ok(self.lock()?.get(event_id).cloned())
    }

    fn find_overlapping(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Event>, InfraError> {
        let events = self.lock()?;
        let mut found: Vec<Event> = events
            .values()
            .filter(|event| {
                event.user_id == user_id && event.start_at <= to && event.end_at >= from
            })
            .cloned()
            .collect();
        found.sort_by_key(|event| event.start_at);
        Ok(found)
    }

    fn find_by_task(&self, task_id: &str) -> Result<Vec<Event>, InfraError> {
        let events = self.lock()?;
        let mut found: Vec<Event> = events
            .values()
            .filter(|event| event.task_id.as_deref() == Some(task_id))
            .cloned()
            .collect();
        found.sort_by_key(|event| event.start_at);
        Ok(found)
    }

    fn insert(&self, event: &Event) -> Result<(), InfraError> {
        self.lock()?.insert(event.id.clone(), event.clone());
        Ok(())
    }

    fn update(&self, event: &Event) -> Result<(), InfraError> {
        self.lock()?.insert(event.id.clone(), event.clone());
        Ok(())
    }

    fn delete(&self, event_id: &str) -> Result<(), InfraError> {
        self.lock()?.remove(event_id);
        Ok(())
    }

    fn replace_generated(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
        events: &[Event],
    ) -> Result<(), InfraError> {
        let mut store = self.lock()?;
        store.retain(|_, event| {
            !(event.user_id == user_id && event.kind.is_generated() && event.end_at > from)
        });
        for event in events {
            store.insert(event.id.clone(), event.clone());
        }
        Ok(())
    }

    fn upsert_external(&self, event: &Event) -> Result<(), InfraError> {
        let mut store = self.lock()?;
        let existing_id = store
            .values()
            .find(|candidate| {
                candidate.user_id == event.user_id && candidate.external_id == event.external_id
            })
            .map(|candidate| candidate.id.clone());
        let id = existing_id.unwrap_or_else(|| event.id.clone());
        let mut stored = event.clone();
        stored.id = id.clone();
        store.insert(id, stored);
        Ok(())
    }

    fn prune_external(&self, user_id: &str, keep_external_ids: &[String]) -> Result<usize, InfraError> {
        let mut store = self.lock()?;
        let before = store.len();
        store.retain(|_, event| {
            if event.user_id != user_id || event.kind != EventKind::External {
                return true;
            }
            event
                .external_id
                .as_deref()
                .is_some_and(|id| keep_external_ids.iter().any(|keep| keep == id))
        });
        Ok(before - store.len())
    }
}
