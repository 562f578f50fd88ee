use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use reqwest::Client;
use url::Url;

const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3/";
const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

/// A busy interval as reported by the external calendar provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalEvent {
    pub id: String,
    pub title: String,
    pub notes: Option<String>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
}

#[async_trait]
pub trait ExternalCalendarClient: Send + Sync {
    /// Events in `[time_min, time_max]` for one calendar. An expired or
    /// rejected access token surfaces as `InfraError::AuthExpired`.
    async fn list_events(
        &self,
        access_token: &str,
        calendar_id: &str,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
    ) -> Result<Vec<ExternalEvent>, InfraError>;
}

#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh_access_token(&self, refresh_token: &str) -> Result<String, InfraError>;
}

#[derive(Debug, Clone, Default)]
pub struct ReqwestExternalCalendarClient {
    client: Client,
}

impl ReqwestExternalCalendarClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    fn ensure_non_empty(value: &str, field: &str) -> Result<(), InfraError> {
        if value.trim().is_empty() {
            return Err(InfraError::Auth(format!("{field} must not be empty")));
        }
        Ok(())
    }

    fn events_endpoint(calendar_id: &str) -> Result<Url, InfraError> {
        let mut url = Url::parse(CALENDAR_API_BASE)
            .map_err(|error| InfraError::Auth(format!("invalid calendar api base url: {error}")))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| InfraError::Auth("calendar api base URL cannot be a base".to_string()))?;
            segments.push("calendars");
            segments.push(calendar_id);
            segments.push("events");
        }
        Ok(url)
    }
}

#[derive(Debug, serde::Deserialize)]
struct EventsPageResponse {
    items: Option<Vec<EventPayload>>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct EventPayload {
    id: Option<String>,
    summary: Option<String>,
    description: Option<String>,
    status: Option<String>,
    start: Option<EventInstantPayload>,
    end: Option<EventInstantPayload>,
}

#[derive(Debug, serde::Deserialize)]
struct EventInstantPayload {
    #[serde(rename = "dateTime")]
    date_time: Option<String>,
    date: Option<String>,
}

impl EventInstantPayload {
    // Timed events carry dateTime, all-day events a bare date.
    fn resolve(&self) -> Option<DateTime<Utc>> {
        if let Some(raw) = self.date_time.as_deref() {
            return DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|parsed| parsed.with_timezone(&Utc));
        }
        let raw = self.date.as_deref()?;
        let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
        Utc.from_local_datetime(&date.and_hms_opt(0, 0, 0)?).single()
    }
}

impl EventPayload {
    fn into_external_event(self) -> Option<ExternalEvent> {
        if self
            .status
            .as_deref()
            .is_some_and(|status| status.eq_ignore_ascii_case("cancelled"))
        {
            return None;
        }
        let id = self.id?.trim().to_string();
        if id.is_empty() {
            return None;
        }
        let start_at = self.start.as_ref().and_then(EventInstantPayload::resolve)?;
        let end_at = self.end.as_ref().and_then(EventInstantPayload::resolve)?;
        if end_at <= start_at {
            return None;
        }
        Some(ExternalEvent {
            title: self.summary.unwrap_or_else(|| id.clone()),
            notes: self.description,
            id,
            start_at,
            end_at,
        })
    }
}

#[async_trait]
impl ExternalCalendarClient for ReqwestExternalCalendarClient {
    async fn list_events(
        &self,
        access_token: &str,
        calendar_id: &str,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
    ) -> Result<Vec<ExternalEvent>, InfraError> {
        Self::ensure_non_empty(access_token, "access token")?;
        Self::ensure_non_empty(calendar_id, "calendar id")?;

        let endpoint = Self::events_endpoint(calendar_id)?;
        let mut page_token: Option<String> = None;
        let mut events = Vec::new();

        loop {
            let mut request = self
                .client
                .get(endpoint.clone())
                .bearer_auth(access_token)
                .query(&[
                    ("singleEvents", "true".to_string()),
                    ("orderBy", "startTime".to_string()),
                    ("maxResults", "2500".to_string()),
                    ("timeMin", time_min.to_rfc3339()),
                    ("timeMax", time_max.to_rfc3339()),
                ]);
            if let Some(page_token) = page_token.as_deref() {
                request = request.query(&[("pageToken", page_token)]);
            }

            let response = request.send().await.map_err(|error| {
                InfraError::Auth(format!("network error while listing calendar events: {error}"))
            })?;

            let status = response.status();
            let body = response.text().await.map_err(|error| {
                InfraError::Auth(format!("failed reading events list response: {error}"))
            })?;

            if status == reqwest::StatusCode::UNAUTHORIZED {
                return Err(InfraError::AuthExpired);
            }
            if !status.is_success() {
                return Err(InfraError::Auth(format!(
                    "calendar api error: http {}; body={body}",
                    status.as_u16()
                )));
            }

            let mut parsed: EventsPageResponse = serde_json::from_str(&body).map_err(|error| {
                InfraError::Auth(format!("invalid events list payload: {error}; body={body}"))
            })?;

            events.extend(
                parsed
                    .items
                    .take()
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(EventPayload::into_external_event),
            );

            if let Some(next_page_token) = parsed.next_page_token.take() {
                page_token = Some(next_page_token);
                continue;
            }
            break;
        }

        Ok(events)
    }
}

#[derive(Debug, Clone)]
pub struct ReqwestTokenRefresher {
    client: Client,
    client_id: String,
    client_secret: String,
}

impl ReqwestTokenRefresher {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

#[derive(Debug, serde::Deserialize)]
struct TokenResponsePayload {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[async_trait]
impl TokenRefresher for ReqwestTokenRefresher {
    async fn refresh_access_token(&self, refresh_token: &str) -> Result<String, InfraError> {
        let response = self
            .client
            .post(TOKEN_ENDPOINT)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await
            .map_err(|error| InfraError::Auth(format!("token refresh request failed: {error}")))?;

        let status = response.status();
        let body = response.text().await.map_err(|error| {
            InfraError::Auth(format!("failed reading token refresh response: {error}"))
        })?;

        let parsed = serde_json::from_str::<TokenResponsePayload>(&body).map_err(|error| {
            InfraError::Auth(format!("invalid token refresh payload: {error}; body={body}"))
        })?;

        if !status.is_success() || parsed.error.is_some() {
            let code = parsed
                .error
                .unwrap_or_else(|| format!("http_{}", status.as_u16()));
            let detail = parsed.error_description.unwrap_or_else(|| body.clone());
            return Err(InfraError::Auth(format!("token endpoint error: {code}; {detail}")));
        }

        parsed
            .access_token
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
            .ok_or_else(|| InfraError::Auth("token response did not include access_token".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_payload_resolves_timed_and_all_day_instants() {
        let timed = EventInstantPayload {
            date_time: Some("2026-02-16T09:00:00Z".to_string()),
            date: None,
        };
        assert_eq!(
            timed.resolve(),
            Some(Utc.with_ymd_and_hms(2026, 2, 16, 9, 0, 0).unwrap())
        );

        let all_day = EventInstantPayload {
            date_time: None,
            date: Some("2026-02-16".to_string()),
        };
        assert_eq!(
            all_day.resolve(),
            Some(Utc.with_ymd_and_hms(2026, 2, 16, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn cancelled_and_malformed_payloads_are_skipped() {
        let cancelled = EventPayload {
            id: Some("evt-1".to_string()),
            summary: Some("gone".to_string()),
            description: None,
            status: Some("cancelled".to_string()),
            start: Some(EventInstantPayload {
                date_time: Some("2026-02-16T09:00:00Z".to_string()),
                date: None,
            }),
            end: Some(EventInstantPayload {
                date_time: Some("2026-02-16T10:00:00Z".to_string()),
                date: None,
            }),
        };
        assert!(cancelled.into_external_event().is_none());

        let missing_end = EventPayload {
            id: Some("evt-2".to_string()),
            summary: None,
            description: None,
            status: None,
            start: Some(EventInstantPayload {
                date_time: Some("2026-02-16T09:00:00Z".to_string()),
                date: None,
            }),
            end: None,
        };
        assert!(missing_end.into_external_event().is_none());
    }

    #[test]
    fn untitled_events_fall_back_to_their_id() {
        let payload = EventPayload {
            id: Some("evt-3".to_string()),
            summary: None,
            description: Some("details".to_string()),
            status: Some("confirmed".to_string()),
            start: Some(EventInstantPayload {
                date_time: Some("2026-02-16T09:00:00Z".to_string()),
                date: None,
            }),
            end: Some(EventInstantPayload {
                date_time: Some("2026-02-16T09:30:00Z".to_string()),
                date: None,
            }),
        };
        let event = payload.into_external_event().expect("valid event");
        assert_eq!(event.title, "evt-3");
        assert_eq!(event.notes.as_deref(), Some("details"));
    }
}
