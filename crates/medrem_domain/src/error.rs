use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReminderError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("remote collaborator failed: {0}")]
    Remote(String),
    #[error("storage failure: {0}")]
    Storage(String),
    #[error("invalid time `{0}`, expected HH:MM")]
    InvalidTime(String),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ReminderError>;
