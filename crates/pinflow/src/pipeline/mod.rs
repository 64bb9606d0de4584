pub mod error;
pub mod generation;
pub mod runner;

pub use error::StageError;
pub use generation::{GenerationConfig, ImageStage, VideoStage};
pub use runner::JobRunner;
