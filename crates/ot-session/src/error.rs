//! Session layer errors.

use thiserror::Error;

/// Errors from loading, saving, or importing session data.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error(transparent)]
    Engine(#[from] ot_engine::EngineError),
}
