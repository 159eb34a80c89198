use crate::domain::models::{Tag, TimeEntry};
use crate::infrastructure::error::TrackerError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_API_BASE: &str = "http://localhost:8080/";

/// The server-side "active timer" record; at most one exists per user.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActiveTimer {
    pub id: i64,
    pub start_time: DateTime<Utc>,
    pub description: String,
    pub project_id: Option<i64>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub billable: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTimerRequest {
    pub description: String,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<i64>,
    pub tag_ids: Vec<i64>,
    pub billable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopTimerRequest {
    pub description: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<i64>,
    pub tag_ids: Vec<i64>,
    pub billable: bool,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct StartTimerData {
    id: i64,
}

/// The backend timers API. The reqwest implementation below is the only
/// production one; tests substitute fakes.
#[async_trait]
pub trait TimersApi: Send + Sync {
    /// `GET /api/timers/active`: `Ok(None)` on 204.
    async fn active_timer(&self, access_token: &str) -> Result<Option<ActiveTimer>, TrackerError>;

    /// `POST /api/timers/start`: returns the server timer id. A 409 maps to
    /// [`TrackerError::Conflict`].
    async fn start_timer(
        &self,
        access_token: &str,
        request: &StartTimerRequest,
    ) -> Result<i64, TrackerError>;

    /// `POST /api/timers/{id}/stop`: returns the saved entry.
    async fn stop_timer(
        &self,
        access_token: &str,
        timer_id: i64,
        request: &StopTimerRequest,
    ) -> Result<TimeEntry, TrackerError>;

    /// `GET /api/timers?limit=N`.
    async fn recent_entries(
        &self,
        access_token: &str,
        limit: u32,
    ) -> Result<Vec<TimeEntry>, TrackerError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestTimersApi {
    client: Client,
    base_url: Url,
}

impl ReqwestTimersApi {
    pub fn new(base_url: impl AsRef<str>) -> Result<Self, TrackerError> {
        let base_url = Url::parse(base_url.as_ref())
            .map_err(|error| TrackerError::Network(format!("invalid api base url: {error}")))?;
        Ok(Self {
            client: Client::new(),
            base_url,
        })
    }

    fn ensure_non_empty(value: &str, field: &str) -> Result<(), TrackerError> {
        if value.trim().is_empty() {
            return Err(TrackerError::Validation(format!("{field} must not be empty")));
        }
        Ok(())
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, TrackerError> {
        let mut url = self.base_url.clone();
        {
            let mut parts = url
                .path_segments_mut()
                .map_err(|_| TrackerError::Network("api base URL cannot be a base".to_string()))?;
            parts.push("api");
            for segment in segments {
                parts.push(segment);
            }
        }
        Ok(url)
    }

    /// Maps a non-success response onto the error taxonomy: 401 demands
    /// re-authentication, 409 is the already-active-timer conflict,
    /// everything else is a recoverable network failure.
    fn error_for(status: StatusCode, body: &str) -> TrackerError {
        let server_message = serde_json::from_str::<ApiEnvelope<serde_json::Value>>(body)
            .ok()
            .and_then(|envelope| envelope.message);

        match status {
            StatusCode::UNAUTHORIZED => TrackerError::Auth(
                server_message.unwrap_or_else(|| "session expired or invalid".to_string()),
            ),
            StatusCode::CONFLICT => TrackerError::Conflict(
                server_message
                    .unwrap_or_else(|| "stop the existing timer before starting a new one".to_string()),
            ),
            _ => {
                let message = if body.trim().is_empty() {
                    format!("timers api error: http {}", status.as_u16())
                } else {
                    format!("timers api error: http {}; body={body}", status.as_u16())
                };
                TrackerError::Network(message)
            }
        }
    }

    fn unwrap_envelope<T>(body: &str, context: &str) -> Result<T, TrackerError>
    where
        T: serde::de::DeserializeOwned,
    {
        let envelope: ApiEnvelope<T> = serde_json::from_str(body).map_err(|error| {
            TrackerError::Network(format!("invalid {context} payload: {error}; body={body}"))
        })?;
        if !envelope.success {
            return Err(TrackerError::Network(
                envelope
                    .message
                    .unwrap_or_else(|| format!("server reported {context} failure")),
            ));
        }
        envelope
            .data
            .ok_or_else(|| TrackerError::Network(format!("{context} response did not include data")))
    }

    async fn read_response(
        response: reqwest::Response,
        context: &str,
    ) -> Result<(StatusCode, String), TrackerError> {
        let status = response.status();
        let body = response.text().await.map_err(|error| {
            TrackerError::Network(format!("failed reading {context} response: {error}"))
        })?;
        Ok((status, body))
    }
}

#[async_trait]
impl TimersApi for ReqwestTimersApi {
    async fn active_timer(&self, access_token: &str) -> Result<Option<ActiveTimer>, TrackerError> {
        Self::ensure_non_empty(access_token, "access token")?;

        let endpoint = self.endpoint(&["timers", "active"])?;
        let response = self
            .client
            .get(endpoint)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|error| {
                TrackerError::Network(format!("network error while querying active timer: {error}"))
            })?;

        let (status, body) = Self::read_response(response, "active timer").await?;
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(Self::error_for(status, &body));
        }

        let active: ActiveTimer = serde_json::from_str(&body).map_err(|error| {
            TrackerError::Network(format!("invalid active timer payload: {error}; body={body}"))
        })?;
        Ok(Some(active))
    }

    async fn start_timer(
        &self,
        access_token: &str,
        request: &StartTimerRequest,
    ) -> Result<i64, TrackerError> {
        Self::ensure_non_empty(access_token, "access token")?;
        Self::ensure_non_empty(&request.description, "description")?;

        let endpoint = self.endpoint(&["timers", "start"])?;
        let response = self
            .client
            .post(endpoint)
            .bearer_auth(access_token)
            .json(request)
            .send()
            .await
            .map_err(|error| {
                TrackerError::Network(format!("network error while starting timer: {error}"))
            })?;

        let (status, body) = Self::read_response(response, "timer start").await?;
        if !status.is_success() {
            return Err(Self::error_for(status, &body));
        }

        let data: StartTimerData = Self::unwrap_envelope(&body, "timer start")?;
        Ok(data.id)
    }

    async fn stop_timer(
        &self,
        access_token: &str,
        timer_id: i64,
        request: &StopTimerRequest,
    ) -> Result<TimeEntry, TrackerError> {
        Self::ensure_non_empty(access_token, "access token")?;

        let endpoint = self.endpoint(&["timers", &timer_id.to_string(), "stop"])?;
        let response = self
            .client
            .post(endpoint)
            .bearer_auth(access_token)
            .json(request)
            .send()
            .await
            .map_err(|error| {
                TrackerError::Network(format!("network error while stopping timer: {error}"))
            })?;

        let (status, body) = Self::read_response(response, "timer stop").await?;
        if !status.is_success() {
            return Err(Self::error_for(status, &body));
        }

        Self::unwrap_envelope(&body, "timer stop")
    }

    async fn recent_entries(
        &self,
        access_token: &str,
        limit: u32,
    ) -> Result<Vec<TimeEntry>, TrackerError> {
        Self::ensure_non_empty(access_token, "access token")?;

        let endpoint = self.endpoint(&["timers"])?;
        let response = self
            .client
            .get(endpoint)
            .query(&[("limit", limit)])
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|error| {
                TrackerError::Network(format!("network error while listing entries: {error}"))
            })?;

        let (status, body) = Self::read_response(response, "entries list").await?;
        if !status.is_success() {
            return Err(Self::error_for(status, &body));
        }

        Self::unwrap_envelope(&body, "entries list")
    }
}
