use crate::domain::models::WorkingHours;
use crate::infrastructure::error::InfraError;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait SettingsRepository: Send + Sync {
    fn working_hours(&self, user_id: &str) -> Result<Option<WorkingHours>, InfraError>;
    fn save_working_hours(&self, user_id: &str, hours: &WorkingHours) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteSettingsRepository {
    db_path: PathBuf,
}

impl SqliteSettingsRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(InfraError::from)
    }
}

impl SettingsRepository for SqliteSettingsRepository {
    fn working_hours(&self, user_id: &str) -> Result<Option<WorkingHours>, InfraError> {
        let connection = self.connect()?;
        let raw: Option<String> = connection
            .query_row(
                "SELECT working_hours FROM settings WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        let hours: WorkingHours = serde_json::from_str(&raw)?;
        Ok(Some(hours))
    }

    fn save_working_hours(&self, user_id: &str, hours: &WorkingHours) -> Result<(), InfraError> {
        hours.validate().map_err(InfraError::InvalidConfig)?;
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO settings (user_id, working_hours)
             VALUES (?1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET working_hours = excluded.working_hours",
            params![user_id, serde_json::to_string(hours)?],
        )?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemorySettingsRepository {
    hours: Mutex<HashMap<String, WorkingHours>>,
}

impl SettingsRepository for InMemorySettingsRepository {
    fn working_hours(&self, user_id: &str) -> Result<Option<WorkingHours>, InfraError> {
        let hours = self
            .hours
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("settings lock poisoned: {error}")))?;
        Ok(hours.get(user_id).cloned())
    }

    fn save_working_hours(&self, user_id: &str, hours: &WorkingHours) -> Result<(), InfraError> {
        hours.validate().map_err(InfraError::InvalidConfig)?;
        let mut store = self
            .hours
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("settings lock poisoned: {error}")))?;
        store.insert(user_id.to_string(), hours.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_hours() -> WorkingHours {
        WorkingHours {
            start: "08:30".to_string(),
            duration_hours: 9,
            days: vec!["Monday".to_string(), "Wednesday".to_string()],
            timezone: "Europe/Berlin".to_string(),
        }
    }

    #[test]
    fn sqlite_repository_roundtrips_working_hours() {
        let dir = std::env::temp_dir().join(format!("taskweave-settings-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        let db_path = dir.join("settings-roundtrip.sqlite");
        let _ = std::fs::remove_file(&db_path);
        crate::infrastructure::storage::initialize_database(&db_path).expect("init db");

        let repository = SqliteSettingsRepository::new(&db_path);
        assert!(repository.working_hours("usr-1").expect("load").is_none());

        let hours = sample_hours();
        repository.save_working_hours("usr-1", &hours).expect("save");
        let loaded = repository
            .working_hours("usr-1")
            .expect("load")
            .expect("hours exist");
        assert_eq!(loaded, hours);

        let mut changed = hours;
        changed.duration_hours = 6;
        repository.save_working_hours("usr-1", &changed).expect("resave");
        let reloaded = repository
            .working_hours("usr-1")
            .expect("load")
            .expect("hours exist");
        assert_eq!(reloaded.duration_hours, 6);
    }

    #[test]
    fn save_rejects_invalid_hours() {
        let repository = InMemorySettingsRepository::default();
        let mut hours = sample_hours();
        hours.timezone = "Nowhere/Here".to_string();
        assert!(repository.save_working_hours("usr-1", &hours).is_err());
    }
}
