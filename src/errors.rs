use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PrintError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to terminate print process: {0}")]
    Termination(#[source] std::io::Error),

    #[error("Platform not supported: {0}")]
    PlatformUnsupported(String),

    #[error("Failed to delete {}: {source}", path.display())]
    CleanupDeletion {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Spooler error: {0}")]
    Spooler(String),

    #[error("Print process error: {0}")]
    Process(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, PrintError>;
