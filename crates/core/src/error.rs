use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoginPushError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(String),

    #[error("Malformed config: {0}")]
    MalformedConfig(String),

    #[error("Persistence unavailable: {0}")]
    PersistenceUnavailable(String),
}

impl From<serde_json::Error> for LoginPushError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialize(e.to_string())
    }
}
