use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use rudiment_domain::{Drill, DrillList, Session, SessionCreate, TakeSummary};

use crate::ServiceError;

/// Base URLs and paths of the scoring service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Endpoints {
    pub api_base: String,
    pub stream_base: String,
    pub session_path: String,
    pub drills_path: String,
    pub stream_path: String,
}

impl Endpoints {
    pub fn new(api_base: impl Into<String>) -> Self {
        let api_base = api_base.into().trim_end_matches('/').to_string();
        let stream_base = websocket_base(&api_base);
        Self {
            api_base,
            stream_base,
            session_path: "/api/v1/session".into(),
            drills_path: "/v1/drills".into(),
            stream_path: "/v1/stream".into(),
        }
    }

    pub fn session_url(&self) -> String {
        format!("{}{}", self.api_base, self.session_path)
    }

    /// Lookups live under `/v1/session`, apart from the creation path.
    pub fn session_by_id_url(&self, session_id: &str) -> String {
        format!("{}/v1/session/{}", self.api_base, session_id)
    }

    pub fn drills_url(&self) -> String {
        format!("{}{}", self.api_base, self.drills_path)
    }

    pub fn drill_url(&self, drill_id: &str) -> String {
        format!("{}/{}", self.drills_url(), drill_id)
    }

    pub fn finalize_url(&self, session_id: &str) -> String {
        format!("{}/v1/take/{}/finalize", self.api_base, session_id)
    }

    pub fn health_url(&self) -> String {
        format!("{}/health", self.api_base)
    }

    pub fn stream_url(&self, session_id: &str) -> String {
        format!(
            "{}{}/{}",
            self.stream_base.trim_end_matches('/'),
            self.stream_path,
            session_id
        )
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self::new("http://127.0.0.1:8000")
    }
}

/// Maps `http(s)://` onto `ws(s)://`, leaving other schemes alone.
pub fn websocket_base(api_base: &str) -> String {
    if let Some(rest) = api_base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = api_base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        api_base.to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: String,
    pub version: String,
}

/// Request/response calls against the scoring service.
#[async_trait]
pub trait SessionApi: Send + Sync {
    async fn create_session(&self, request: &SessionCreate) -> Result<Session, ServiceError>;
    async fn list_drills(&self) -> Result<Vec<Drill>, ServiceError>;
    async fn get_drill(&self, drill_id: &str) -> Result<Drill, ServiceError>;
    async fn get_session(&self, session_id: &str) -> Result<Session, ServiceError>;
    async fn finalize_take(&self, session_id: &str) -> Result<TakeSummary, ServiceError>;
    async fn health(&self) -> Result<HealthStatus, ServiceError>;
}

#[derive(Clone)]
pub struct HttpSessionApi {
    client: reqwest::Client,
    endpoints: Endpoints,
}

impl HttpSessionApi {
    pub fn new(endpoints: Endpoints) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoints,
        }
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ServiceError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|err| ServiceError::Decode(err.to_string()))
    }
}

#[async_trait]
impl SessionApi for HttpSessionApi {
    #[instrument(skip(self, request), fields(drill_id = %request.drill_id))]
    async fn create_session(&self, request: &SessionCreate) -> Result<Session, ServiceError> {
        info!(endpoint = %self.endpoints.session_url(), "creating session");
        let response = self
            .client
            .post(self.endpoints.session_url())
            .json(request)
            .send()
            .await?;
        let session: Session = Self::decode(response).await?;
        info!(session_id = %session.id, "session created");
        Ok(session)
    }

    #[instrument(skip(self))]
    async fn list_drills(&self) -> Result<Vec<Drill>, ServiceError> {
        let response = self.client.get(self.endpoints.drills_url()).send().await?;
        let list: DrillList = Self::decode(response).await?;
        debug!(count = list.drills.len(), "fetched drills");
        Ok(list.drills)
    }

    #[instrument(skip(self))]
    async fn get_drill(&self, drill_id: &str) -> Result<Drill, ServiceError> {
        let response = self
            .client
            .get(self.endpoints.drill_url(drill_id))
            .send()
            .await?;
        Self::decode(response).await
    }

    #[instrument(skip(self))]
    async fn get_session(&self, session_id: &str) -> Result<Session, ServiceError> {
        let response = self
            .client
            .get(self.endpoints.session_by_id_url(session_id))
            .send()
            .await?;
        Self::decode(response).await
    }

    #[instrument(skip(self))]
    async fn finalize_take(&self, session_id: &str) -> Result<TakeSummary, ServiceError> {
        info!("finalizing take");
        let response = self
            .client
            .post(self.endpoints.finalize_url(session_id))
            .send()
            .await?;
        Self::decode(response).await
    }

    #[instrument(skip(self))]
    async fn health(&self) -> Result<HealthStatus, ServiceError> {
        let response = self.client.get(self.endpoints.health_url()).send().await?;
        Self::decode(response).await
    }
}
