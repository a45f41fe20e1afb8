use thiserror::Error;

use crate::access::{Role, View};

pub type Result<T> = std::result::Result<T, MonitorError>;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("{role} accounts cannot open {view}")]
    Forbidden { role: Role, view: View },

    #[error("not signed in; run `login` first")]
    NotSignedIn,

    #[error("missing {0} upload")]
    MissingUpload(&'static str),

    #[error("store request failed: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("store request timed out after {0} seconds")]
    Timeout(u64),

    #[error("another upload is already in progress")]
    UploadInProgress,

    #[error("config error: {0}")]
    Config(String),

    #[error("questionnaire: {0}")]
    Questionnaire(String),
}

impl From<std::io::Error> for MonitorError {
    fn from(err: std::io::Error) -> Self {
        MonitorError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for MonitorError {
    fn from(err: serde_json::Error) -> Self {
        MonitorError::Config(err.to_string())
    }
}
