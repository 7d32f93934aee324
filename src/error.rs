use thiserror::Error;

#[derive(Error, Debug)]
pub enum GateError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown database key: {0}")]
    UnknownDatabase(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Interaction log error: {0}")]
    Recorder(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl From<sqlx::Error> for GateError {
    fn from(err: sqlx::Error) -> Self {
        GateError::Database(err.to_string())
    }
}

impl From<rusqlite::Error> for GateError {
    fn from(err: rusqlite::Error) -> Self {
        GateError::Recorder(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GateError>;
