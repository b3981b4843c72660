use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConductorError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Workflow error: {0}")]
    Workflow(String),

    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Integration error: {0}")]
    Integration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ConductorError>;
