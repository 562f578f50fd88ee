use crate::application::service::next_id;
use crate::domain::models::{Event, EventKind};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::event_repository::EventRepository;
use crate::infrastructure::external_calendar::{ExternalCalendarClient, TokenRefresher};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// One user's connection to the external calendar provider.
#[derive(Debug, Clone)]
pub struct CalendarAccount {
    pub user_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub calendar_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportOutcome {
    pub imported: usize,
    pub removed: usize,
    /// Set when the stored access token expired mid-import and a fresh one
    /// was minted; the caller must persist it.
    pub refreshed_access_token: Option<String>,
}

/// Mirrors the provider's calendars into the local event store: fetches every
/// configured calendar, upserts each event keyed by its provider id, then
/// prunes local copies the provider no longer reports.
pub struct CalendarImportService<C, R, E> {
    client: Arc<C>,
    refresher: Arc<R>,
    events: Arc<E>,
}

impl<C, R, E> CalendarImportService<C, R, E>
where
    C: ExternalCalendarClient,
    R: TokenRefresher,
    E: EventRepository,
{
    pub fn new(client: Arc<C>, refresher: Arc<R>, events: Arc<E>) -> Self {
        Self {
            client,
            refresher,
            events,
        }
    }

    /// An expired access token is refreshed at most once per import; a second
    /// rejection propagates so the caller can force a re-connect.
    pub async fn import(
        &self,
        account: &CalendarAccount,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
    ) -> Result<ImportOutcome, InfraError> {
        let mut access_token = account.access_token.clone();
        let mut refreshed_access_token: Option<String> = None;
        let mut externals = Vec::new();

        for calendar_id in &account.calendar_ids {
            let listed = match self
                .client
                .list_events(&access_token, calendar_id, time_min, time_max)
                .await
            {
                Ok(listed) => listed,
                Err(InfraError::AuthExpired) if refreshed_access_token.is_none() => {
                    let refresh_token = account
                        .refresh_token
                        .as_deref()
                        .ok_or(InfraError::AuthExpired)?;
                    let fresh = self.refresher.refresh_access_token(refresh_token).await?;
                    access_token = fresh.clone();
                    refreshed_access_token = Some(fresh);
                    self.client
                        .list_events(&access_token, calendar_id, time_min, time_max)
                        .await?
                }
                Err(error) => return Err(error),
            };
            externals.extend(listed);
        }

        let mut keep_external_ids = Vec::with_capacity(externals.len());
        for external in externals {
            let event = Event {
                id: next_id("evt"),
                user_id: account.user_id.clone(),
                title: external.title,
                start_at: external.start_at,
                end_at: external.end_at,
                notes: external.notes,
                kind: EventKind::External,
                external_id: Some(external.id.clone()),
                task_id: None,
            };
            self.events.upsert_external(&event)?;
            keep_external_ids.push(external.id);
        }

        let removed = self
            .events
            .prune_external(&account.user_id, &keep_external_ids)?;

        Ok(ImportOutcome {
            imported: keep_external_ids.len(),
            removed,
            refreshed_access_token,
        })
    }
}
