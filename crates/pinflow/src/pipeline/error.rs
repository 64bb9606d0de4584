//! Stage-level failures. Each variant names the stage that failed so job
//! records and notifications can say where a run died.

use thiserror::Error;

use crate::error::ConfigError;
use crate::services::ServiceError;
use crate::state::StateError;

#[derive(Error, Debug)]
pub enum StageError {
    #[error("Acquisition failed: {0}")]
    Acquisition(#[source] ServiceError),

    #[error("Generation failed for board '{board_id}': {source}")]
    Generation {
        board_id: String,
        #[source]
        source: ServiceError,
    },

    #[error("Publication failed for board '{board_id}': {source}")]
    Publication {
        board_id: String,
        #[source]
        source: ServiceError,
    },

    #[error("No boards found for account '{alias}'")]
    NoBoards { alias: String },

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl StageError {
    /// Stable failure kind persisted on errored job records.
    pub fn kind(&self) -> &'static str {
        match self {
            StageError::Acquisition(_) => "acquisition",
            StageError::Generation {
                source: ServiceError::RenderTimeout { .. },
                ..
            } => "render_timeout",
            StageError::Generation { .. } => "generation",
            StageError::Publication { .. } => "publication",
            StageError::NoBoards { .. } => "no_boards",
            StageError::State(_) => "state",
            StageError::Config(_) => "config",
        }
    }
}
