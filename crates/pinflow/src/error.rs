use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FunnelError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("State error: {0}")]
    State(#[from] crate::state::StateError),

    #[error("Service error: {0}")]
    Service(#[from] crate::services::ServiceError),

    #[error("Stage error: {0}")]
    Stage(#[from] crate::pipeline::StageError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write config file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("No accounts configured")]
    NoAccounts,

    #[error("Account alias not found: {alias}")]
    UnknownAccount { alias: String },

    #[error("Unknown key: {key}")]
    UnknownKey { key: String },

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

pub type Result<T> = std::result::Result<T, FunnelError>;
