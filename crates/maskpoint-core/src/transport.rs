//! Transport seam between the engine and the HTTP client.
//!
//! The engine is generic over this trait so its ordering, retry, and
//! stale-suppression behavior can be exercised against a scripted in-memory
//! server in tests.

use async_trait::async_trait;
use maskpoint_remote_client::{
    ClientError, HealthResponse, ModelsResponse, OkResponse, PredictRequest, PredictResponse,
    RemoteClient, SelectModelResponse, SessionCreatedResponse, SessionImageResponse,
};

#[async_trait]
pub trait SegmentTransport {
    async fn health(&self) -> Result<HealthResponse, ClientError>;
    async fn list_models(&self) -> Result<ModelsResponse, ClientError>;
    async fn select_model(&self, model_key: &str) -> Result<SelectModelResponse, ClientError>;
    async fn create_session(&self) -> Result<SessionCreatedResponse, ClientError>;
    async fn delete_session(&self, session_id: &str) -> Result<OkResponse, ClientError>;
    async fn upload_image(
        &self,
        session_id: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<SessionImageResponse, ClientError>;
    async fn predict(
        &self,
        session_id: &str,
        request: &PredictRequest,
    ) -> Result<PredictResponse, ClientError>;
}

#[async_trait]
impl SegmentTransport for RemoteClient {
    async fn health(&self) -> Result<HealthResponse, ClientError> {
        RemoteClient::health(self).await
    }

    async fn list_models(&self) -> Result<ModelsResponse, ClientError> {
        RemoteClient::list_models(self).await
    }

    async fn select_model(&self, model_key: &str) -> Result<SelectModelResponse, ClientError> {
        RemoteClient::select_model(self, model_key).await
    }

    async fn create_session(&self) -> Result<SessionCreatedResponse, ClientError> {
        RemoteClient::create_session(self).await
    }

    async fn delete_session(&self, session_id: &str) -> Result<OkResponse, ClientError> {
        RemoteClient::delete_session(self, session_id).await
    }

    async fn upload_image(
        &self,
        session_id: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<SessionImageResponse, ClientError> {
        RemoteClient::upload_image(self, session_id, file_name, bytes).await
    }

    async fn predict(
        &self,
        session_id: &str,
        request: &PredictRequest,
    ) -> Result<PredictResponse, ClientError> {
        RemoteClient::predict(self, session_id, request).await
    }
}
