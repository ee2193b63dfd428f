//! API client for the Pond Sentinel HTTP API

use anyhow::{Context, Result};
use reqwest::{Client, Response};
use sentinel_lib::anomaly::ChangePoint;
use sentinel_lib::{Alert, PondId, SensorType};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Error reported by the service
#[derive(Debug, Error)]
#[error("API error ({status}): {message} [{code}]")]
pub struct ApiError {
    pub status: u16,
    pub code: String,
    pub message: String,
}

/// JSON error body returned by the service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

/// API client for the sentinel service
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.get_with_query(path, &[] as &[(&str, String)]).await
    }

    /// Make a GET request with query parameters
    pub async fn get_with_query<T, Q>(&self, path: &str, query: &Q) -> Result<T>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .context("Failed to send request")?;

        Self::parse(response).await
    }

    /// Make a POST request with JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .context("Failed to send request")?;

        Self::parse(response).await
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let (code, message) = match serde_json::from_str::<ErrorResponse>(&body) {
                Ok(error) => (error.code, error.message),
                Err(_) => ("unknown".to_string(), body),
            };
            return Err(ApiError {
                status: status.as_u16(),
                code,
                message,
            }
            .into());
        }

        response.json().await.context("Failed to parse response")
    }
}

// API request and response types not shared with the engine

/// Body of `POST /v1/readings`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadingRequest {
    pub pond_id: PondId,
    pub sensor_type: SensorType,
    pub value: f64,
    pub unit: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Subset of the ingest report the CLI displays
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSummary {
    pub persisted: bool,
    #[serde(default)]
    pub deviation: Option<f64>,
    #[serde(default)]
    pub change_point: Option<ChangePoint>,
    #[serde(default)]
    pub detector_reset: bool,
    #[serde(default)]
    pub alerts: Vec<Alert>,
    #[serde(default)]
    pub suppressed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    pub updated_at: String,
}

/// Body of `/healthz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub status: String,
    pub components: std::collections::BTreeMap<String, ComponentHealth>,
}
