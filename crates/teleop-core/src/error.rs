use thiserror::Error;

#[derive(Debug, Error)]
pub enum TeleopError {
    #[error("no device paired under code {0}")]
    ConnectionNotFound(String),

    #[error("device {0} is already linked to an operator")]
    AlreadyLinked(String),

    #[error("device {0} is not linked")]
    NotLinked(String),

    #[error("another client ({0}) is already recording")]
    RecordingBusy(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TeleopError>;
