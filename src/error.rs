use thiserror::Error;

/// Engine-level failures. Problems with the statement itself are never
/// reported through this type; they become findings.
#[derive(Error, Debug)]
pub enum VerifierError {
    #[error("Execution backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Sample dataset error: {0}")]
    Dataset(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, VerifierError>;
