use maskpoint_remote_client::ClientError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Client(#[from] ClientError),
    /// A session create is already in flight; callers fail fast instead of
    /// racing a duplicate create.
    #[error("session_creation_in_progress")]
    SessionCreationInProgress,
    #[error("not_connected")]
    NotConnected,
    #[error("no_active_image")]
    NoActiveImage,
    #[error("mask_decode_failed:{message}")]
    MaskDecode { message: String },
    #[error("config_io_failed:{message}")]
    ConfigIo { message: String },
    #[error("config_parse_failed:{message}")]
    ConfigParse { message: String },
}

impl EngineError {
    /// True when the underlying failure is the server forgetting a session
    /// (404 on a session-scoped route).
    #[must_use]
    pub fn is_session_not_found(&self) -> bool {
        matches!(self, Self::Client(error) if error.is_session_not_found())
    }
}
