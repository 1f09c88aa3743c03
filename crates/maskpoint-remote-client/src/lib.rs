//! Stateless HTTP/JSON client for the segmentation server.
//!
//! One method per server capability, one request per call. No retries, no
//! caching, no held session state; everything the server needs is passed in
//! explicitly, so a single client value can be shared freely.

use std::time::Duration;

pub use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Upper bound for a single request. Embedding a large image on CPU routinely
/// takes seconds; anything past this is indistinguishable from a hung server.
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone)]
pub struct RemoteClientConfig {
    pub base_url: String,
    pub timeout_ms: u64,
}

impl RemoteClientConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RemoteClient {
    base_url: String,
    timeout: Duration,
    http: reqwest::Client,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("server_base_url_missing")]
    BaseUrlMissing,
    #[error("server_invalid_path")]
    InvalidPath,
    #[error("server_unreachable:{message}")]
    Connection { message: String },
    #[error("response_read_failed:{message}")]
    Read { message: String },
    #[error("server_http_{status}:{body}")]
    Protocol { status: StatusCode, body: String },
    #[error("response_decode_failed:{message}")]
    Decode { message: String },
}

impl ClientError {
    /// A 404 on a session-scoped route means the server no longer holds the
    /// session (expired, or wiped by a model switch). Callers treat this as
    /// the recreate-and-retry-once condition.
    #[must_use]
    pub fn is_session_not_found(&self) -> bool {
        matches!(
            self,
            Self::Protocol {
                status: StatusCode::NOT_FOUND,
                ..
            }
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelInfo {
    pub model_key: String,
    pub device: String,
    #[serde(default)]
    pub config: Option<String>,
    #[serde(default)]
    pub checkpoint: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub model: ModelInfo,
    pub sessions: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelCatalogEntry {
    pub model_key: String,
    pub downloaded: bool,
    #[serde(default)]
    pub checkpoint_size_bytes: u64,
    #[serde(default)]
    pub config: Option<String>,
    #[serde(default)]
    pub checkpoint: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelsResponse {
    #[serde(default)]
    pub default: Option<String>,
    pub available: Vec<ModelCatalogEntry>,
    pub current: ModelInfo,
}

#[derive(Debug, Serialize)]
pub struct SelectModelRequest<'a> {
    pub model_key: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SelectModelResponse {
    pub ok: bool,
    pub model: ModelInfo,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_key: Option<&'a str>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionCreatedResponse {
    pub session_id: String,
    pub model: ModelInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionImageResponse {
    #[serde(default)]
    pub session_id: String,
    pub width: u32,
    pub height: u32,
    pub elapsed_ms: f64,
}

/// Wire shape of a predict call. Point coordinates are image-pixel (x, y);
/// labels are 1 = foreground, 0 = background, one per point.
#[derive(Debug, Clone, Serialize)]
pub struct PredictRequest {
    pub points: Vec<[f64; 2]>,
    pub labels: Vec<u8>,
    #[serde(rename = "box", skip_serializing_if = "Option::is_none")]
    pub box_prompt: Option<[f64; 4]>,
    pub multimask: bool,
    pub return_format: &'static str,
}

impl PredictRequest {
    #[must_use]
    pub fn new(points: Vec<[f64; 2]>, labels: Vec<u8>, multimask: bool) -> Self {
        Self {
            points,
            labels,
            box_prompt: None,
            multimask,
            return_format: "png_base64",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PredictResponse {
    #[serde(default)]
    pub session_id: String,
    pub score: f64,
    pub mask_area: u64,
    /// PNG-encoded 8-bit mask (0/255), base64.
    pub mask_png_base64: String,
    pub elapsed_ms: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

impl RemoteClient {
    pub fn new(config: RemoteClientConfig) -> Result<Self, ClientError> {
        let base_url = normalize_base_url(&config.base_url)?;
        Ok(Self {
            base_url,
            timeout: Duration::from_millis(config.timeout_ms.max(250)),
            http: reqwest::Client::new(),
        })
    }

    pub fn from_base_url(base_url: &str) -> Result<Self, ClientError> {
        Self::new(RemoteClientConfig::new(base_url))
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn endpoint(&self, path: &str) -> Option<String> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed.starts_with('/') {
            Some(format!("{}{}", self.base_url, trimmed))
        } else {
            Some(format!("{}/{}", self.base_url, trimmed))
        }
    }

    #[must_use]
    pub fn health_path() -> &'static str {
        "/health"
    }

    #[must_use]
    pub fn models_path() -> &'static str {
        "/models"
    }

    #[must_use]
    pub fn select_model_path() -> &'static str {
        "/model/select"
    }

    #[must_use]
    pub fn sessions_path() -> &'static str {
        "/sessions"
    }

    #[must_use]
    pub fn session_path(session_id: &str) -> String {
        format!("/sessions/{}", session_id.trim())
    }

    #[must_use]
    pub fn session_image_path(session_id: &str) -> String {
        format!("/sessions/{}/image", session_id.trim())
    }

    #[must_use]
    pub fn session_predict_path(session_id: &str) -> String {
        format!("/sessions/{}/predict", session_id.trim())
    }

    pub async fn health(&self) -> Result<HealthResponse, ClientError> {
        self.get_json(Self::health_path()).await
    }

    /// Cheap reachability probe; any decoded health response counts.
    pub async fn is_reachable(&self) -> bool {
        self.health().await.map(|h| h.ok).unwrap_or(false)
    }

    pub async fn list_models(&self) -> Result<ModelsResponse, ClientError> {
        self.get_json(Self::models_path()).await
    }

    pub async fn select_model(&self, model_key: &str) -> Result<SelectModelResponse, ClientError> {
        self.post_json(Self::select_model_path(), &SelectModelRequest { model_key })
            .await
    }

    pub async fn create_session(&self) -> Result<SessionCreatedResponse, ClientError> {
        self.create_session_with_model(None).await
    }

    /// The server optionally loads `model_key` before creating the session,
    /// which wipes all existing sessions exactly like a model switch.
    pub async fn create_session_with_model(
        &self,
        model_key: Option<&str>,
    ) -> Result<SessionCreatedResponse, ClientError> {
        self.post_json(Self::sessions_path(), &CreateSessionRequest { model_key })
            .await
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<OkResponse, ClientError> {
        let url = self
            .endpoint(Self::session_path(session_id).as_str())
            .ok_or(ClientError::InvalidPath)?;
        let response = self
            .http
            .delete(url.as_str())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(connection_error)?;
        decode_json_response(response).await
    }

    /// Uploads the image bytes that the session's embedding is computed from.
    /// One multipart file field, matching the server's upload route.
    pub async fn upload_image(
        &self,
        session_id: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<SessionImageResponse, ClientError> {
        let url = self
            .endpoint(Self::session_image_path(session_id).as_str())
            .ok_or(ClientError::InvalidPath)?;
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);
        debug!(session_id, file_name, "uploading image");
        let response = self
            .http
            .post(url.as_str())
            .timeout(self.timeout)
            .multipart(form)
            .send()
            .await
            .map_err(connection_error)?;
        decode_json_response(response).await
    }

    pub async fn predict(
        &self,
        session_id: &str,
        request: &PredictRequest,
    ) -> Result<PredictResponse, ClientError> {
        self.post_json(Self::session_predict_path(session_id).as_str(), request)
            .await
    }

    pub async fn get_json<T>(&self, path: &str) -> Result<T, ClientError>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let url = self.endpoint(path).ok_or(ClientError::InvalidPath)?;
        let response = self
            .http
            .get(url.as_str())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(connection_error)?;
        decode_json_response(response).await
    }

    pub async fn post_json<Req, Res>(&self, path: &str, payload: &Req) -> Result<Res, ClientError>
    where
        Req: Serialize + ?Sized,
        Res: for<'de> serde::Deserialize<'de>,
    {
        let url = self.endpoint(path).ok_or(ClientError::InvalidPath)?;
        let response = self
            .http
            .post(url.as_str())
            .timeout(self.timeout)
            .json(payload)
            .send()
            .await
            .map_err(connection_error)?;
        decode_json_response(response).await
    }
}

pub fn format_http_error(status: StatusCode, body: &[u8]) -> ClientError {
    let body = non_empty_string(String::from_utf8_lossy(body).to_string())
        .unwrap_or_else(|| "<empty>".to_string());
    ClientError::Protocol { status, body }
}

fn connection_error(error: reqwest::Error) -> ClientError {
    ClientError::Connection {
        message: error.to_string(),
    }
}

fn normalize_base_url(base_url: &str) -> Result<String, ClientError> {
    let trimmed = base_url.trim();
    if trimmed.is_empty() {
        return Err(ClientError::BaseUrlMissing);
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

async fn decode_json_response<T>(response: reqwest::Response) -> Result<T, ClientError>
where
    T: for<'de> serde::Deserialize<'de>,
{
    let status = response.status();
    let bytes = response.bytes().await.map_err(|error| ClientError::Read {
        message: error.to_string(),
    })?;

    if !status.is_success() {
        return Err(format_http_error(status, &bytes));
    }

    serde_json::from_slice::<T>(&bytes).map_err(|error| ClientError::Decode {
        message: error.to_string(),
    })
}

fn non_empty_string(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
