use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;

use crate::{
    error::RemoteError,
    models::{
        FastingStatus, FastingSession, FastingUpdate, NewFast, NewSession, Profile,
        SessionUpdate, WalkingSession,
    },
    settings::SyncSettings,
};

use super::{RemoteResult, RemoteStore};

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "fastnow_sync::remote";

const SESSIONS_PATH: &str = "/rest/v1/walking_sessions";
const FASTS_PATH: &str = "/rest/v1/fasting_sessions";
const PROFILES_PATH: &str = "/rest/v1/profiles";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// PostgREST client for the hosted database.
#[derive(Clone)]
pub struct SupabaseRemote {
    client: Client,
    base_url: String,
    anon_key: String,
    access_token: Option<String>,
}

impl SupabaseRemote {
    pub fn new(base_url: &str, anon_key: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            access_token: None,
        })
    }

    pub fn from_settings(settings: &SyncSettings) -> Result<Self> {
        let url = settings
            .supabase_url
            .as_deref()
            .ok_or_else(|| anyhow!("supabase_url is not configured"))?;
        let key = settings
            .supabase_anon_key
            .as_deref()
            .ok_or_else(|| anyhow!("supabase_anon_key is not configured"))?;
        Self::new(url, key)
    }

    /// Authenticate requests as a signed-in user instead of the anon role.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let bearer = self.access_token.as_deref().unwrap_or(&self.anon_key);
        request
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer)
    }

    async fn send(&self, request: RequestBuilder) -> RemoteResult<Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|err| RemoteError::Network(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        crate::log_warn!("Remote rejected request with {status}: {message}");
        Err(RemoteError::Rejected {
            status: Some(status.as_u16()),
            message,
        })
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> RemoteResult<T> {
        response
            .json::<T>()
            .await
            .map_err(|err| RemoteError::Decode(err.to_string()))
    }

    /// PostgREST answers writes with an array of affected rows.
    async fn single_row<T: DeserializeOwned>(response: Response, id: &str) -> RemoteResult<T> {
        let rows: Vec<T> = Self::decode(response).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))
    }
}

#[async_trait]
impl RemoteStore for SupabaseRemote {
    async fn insert_session(
        &self,
        user_id: &str,
        session: &NewSession,
    ) -> RemoteResult<WalkingSession> {
        let mut body =
            serde_json::to_value(session).map_err(|err| RemoteError::Decode(err.to_string()))?;
        if let Some(columns) = body.as_object_mut() {
            columns.insert("user_id".into(), serde_json::Value::from(user_id));
        }

        let request = self
            .client
            .post(self.url(SESSIONS_PATH))
            .header("Prefer", "return=representation")
            .json(&body);
        let response = self.send(request).await?;
        let created: WalkingSession = Self::single_row(response, "new session").await?;
        crate::log_debug!("Inserted walking session {}", created.id);
        Ok(created)
    }

    async fn update_session(
        &self,
        id: &str,
        user_id: &str,
        update: &SessionUpdate,
    ) -> RemoteResult<WalkingSession> {
        let request = self
            .client
            .patch(self.url(SESSIONS_PATH))
            .query(&[("id", format!("eq.{id}")), ("user_id", format!("eq.{user_id}"))])
            .header("Prefer", "return=representation")
            .json(&update.to_columns());
        let response = self.send(request).await?;
        Self::single_row(response, id).await
    }

    async fn delete_session(&self, id: &str, user_id: &str) -> RemoteResult<()> {
        let request = self
            .client
            .delete(self.url(SESSIONS_PATH))
            .query(&[("id", format!("eq.{id}")), ("user_id", format!("eq.{user_id}"))]);
        self.send(request).await?;
        Ok(())
    }

    async fn fetch_active_session(&self, user_id: &str) -> RemoteResult<Option<WalkingSession>> {
        let request = self
            .client
            .get(self.url(SESSIONS_PATH))
            .query(&[
                ("user_id", format!("eq.{user_id}")),
                ("status", "eq.active".to_string()),
                ("session_state", "in.(active,paused)".to_string()),
                ("order", "start_time.desc".to_string()),
                ("limit", "1".to_string()),
            ]);
        let response = self.send(request).await?;
        let rows: Vec<WalkingSession> = Self::decode(response).await?;
        Ok(rows.into_iter().next())
    }

    async fn insert_fast(&self, user_id: &str, fast: &NewFast) -> RemoteResult<FastingSession> {
        let supersede = self
            .client
            .patch(self.url(FASTS_PATH))
            .query(&[
                ("user_id", format!("eq.{user_id}")),
                ("status", format!("eq.{}", FastingStatus::Active.as_str())),
            ])
            .json(
                &FastingUpdate::Cancel {
                    end_time: fast.start_time,
                }
                .to_columns(),
            );
        self.send(supersede).await?;

        let body = serde_json::json!({
            "user_id": user_id,
            "start_time": fast.start_time,
            "goal_duration_seconds": fast.goal_duration_seconds,
            "status": FastingStatus::Active.as_str(),
        });
        let request = self
            .client
            .post(self.url(FASTS_PATH))
            .header("Prefer", "return=representation")
            .json(&body);
        let response = self.send(request).await?;
        let created: FastingSession = Self::single_row(response, "new fast").await?;
        crate::log_debug!("Inserted fasting session {}", created.id);
        Ok(created)
    }

    async fn update_fast(
        &self,
        id: &str,
        user_id: &str,
        update: &FastingUpdate,
    ) -> RemoteResult<FastingSession> {
        let request = self
            .client
            .patch(self.url(FASTS_PATH))
            .query(&[("id", format!("eq.{id}")), ("user_id", format!("eq.{user_id}"))])
            .header("Prefer", "return=representation")
            .json(&update.to_columns());
        let response = self.send(request).await?;
        Self::single_row(response, id).await
    }

    async fn fetch_active_fast(&self, user_id: &str) -> RemoteResult<Option<FastingSession>> {
        let request = self
            .client
            .get(self.url(FASTS_PATH))
            .query(&[
                ("user_id", format!("eq.{user_id}")),
                ("status", "eq.active".to_string()),
                ("order", "start_time.desc".to_string()),
                ("limit", "1".to_string()),
            ]);
        let response = self.send(request).await?;
        let rows: Vec<FastingSession> = Self::decode(response).await?;
        Ok(rows.into_iter().next())
    }

    async fn fetch_profile(&self, user_id: &str) -> RemoteResult<Option<Profile>> {
        let request = self
            .client
            .get(self.url(PROFILES_PATH))
            .query(&[
                ("user_id", format!("eq.{user_id}")),
                ("select", "user_id,weight,height,default_walking_speed".to_string()),
            ]);
        let response = self.send(request).await?;
        let rows: Vec<Profile> = Self::decode(response).await?;
        Ok(rows.into_iter().next())
    }

    async fn ping(&self) -> RemoteResult<()> {
        let request = self
            .client
            .get(self.url(SESSIONS_PATH))
            .query(&[("select", "id"), ("limit", "1")]);
        self.send(request).await?;
        Ok(())
    }
}
