use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Event is missing required data: {0}")]
    MissingRequiredField(&'static str),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Root job must always have a cause type")]
    MissingCauseType,

    #[error("Non-root cause must carry its parent job data")]
    MissingParentData,

    #[error("Finished component must carry started_at and completed_at timestamps")]
    MissingTimestamps,

    #[error("SCM event must contain SCM data")]
    MissingScmData,

    #[error("API request failed: {status} {method} {url}: {message}")]
    Api {
        status: u16,
        method: &'static str,
        url: String,
        message: String,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

pub type Result<T> = std::result::Result<T, RelayError>;
