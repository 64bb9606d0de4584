//! Collaborator interfaces consumed by the pipeline core, plus the concrete
//! HTTP clients behind them. The core only sees the traits; vendor request
//! shapes stay inside the client modules and carry only the fields the
//! pipeline consumes.

pub mod collector;
pub mod gemini;
pub mod late;
pub mod openai;
pub mod telegram;
pub mod video;

pub use collector::ImportDirCollector;
pub use gemini::GeminiClient;
pub use late::LatePublisher;
pub use openai::OpenAiClient;
pub use telegram::{Inbound, TelegramClient};
pub use video::RenderClient;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Account;
use crate::retry::Retryable;
use crate::state::MediaKind;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upstream returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Upstream returned an empty response: {0}")]
    EmptyResponse(String),

    #[error("Missing credential: {0}")]
    Auth(String),

    #[error("Failed to decode upstream response: {0}")]
    Decode(String),

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Render task '{task_id}' timed out after {timeout:?}")]
    RenderTimeout { task_id: String, timeout: Duration },

    #[error("Upstream rejected request: {0}")]
    Upstream(String),
}

impl Retryable for ServiceError {
    /// Transient network/HTTP failures and the distinguished empty-response
    /// condition are retryable; everything else propagates immediately.
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceError::Http(_) | ServiceError::Status { .. } | ServiceError::EmptyResponse(_)
        )
    }
}

/// SEO metadata attached to a generated artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PinMetadata {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[serde(default)]
    pub alt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

/// Reply keyboard attached to an outgoing chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyboard {
    pub rows: Vec<Vec<String>>,
}

impl Keyboard {
    pub fn new<R, L>(rows: R) -> Self
    where
        R: IntoIterator<Item = L>,
        L: IntoIterator<Item = &'static str>,
    {
        Self {
            rows: rows
                .into_iter()
                .map(|row| row.into_iter().map(str::to_string).collect())
                .collect(),
        }
    }

    pub fn from_rows(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }
}

/// Acquisition: (re)populates board reference material for an account.
pub trait SourceCollector: Send + Sync {
    fn collect_reference_material(&self, account: &Account) -> Result<(), ServiceError>;
}

/// Vision: describes the aesthetic style of a reference image.
pub trait VisionModel: Send + Sync {
    fn describe_style(&self, image: &Path) -> Result<String, ServiceError>;
}

/// Image generation plus SEO metadata for a style description.
pub trait ImageModel: Send + Sync {
    fn generate_image(&self, style: &str) -> Result<Vec<u8>, ServiceError>;
    fn generate_metadata(&self, board_name: &str, style: &str)
        -> Result<PinMetadata, ServiceError>;
}

/// Video rendering from a reference image (create task, poll, download).
pub trait VideoModel: Send + Sync {
    fn render(&self, reference: &Path) -> Result<Vec<u8>, ServiceError>;
}

#[derive(Debug, Clone)]
pub struct PublishedPin {
    pub title: String,
    pub media_url: String,
}

#[derive(Debug, Clone)]
pub struct PublishFailure {
    pub media_path: PathBuf,
    pub error: String,
}

/// Per-board publication outcome. Per-record failures are aggregated here
/// rather than aborting the board.
#[derive(Debug, Clone)]
pub struct PublicationReport {
    pub board_id: String,
    pub published: Vec<PublishedPin>,
    pub failures: Vec<PublishFailure>,
}

impl PublicationReport {
    pub fn empty(board_id: &str) -> Self {
        Self {
            board_id: board_id.to_string(),
            published: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// True when at least one record was published and none failed; only
    /// then may the board's source/generated files be cleaned up.
    pub fn fully_published(&self) -> bool {
        !self.published.is_empty() && self.failures.is_empty()
    }
}

/// Publication: pushes completed artifacts for boards known to the account.
pub trait Publisher: Send + Sync {
    fn list_board_ids(&self, account: &Account) -> Vec<String>;

    fn publish_board(
        &self,
        account: &Account,
        board_id: &str,
        kind: MediaKind,
    ) -> Result<PublicationReport, ServiceError>;
}

/// Operator notification channel. Fire-and-forget: failures are logged by
/// the implementation and never propagated.
pub trait ChatApi: Send + Sync {
    fn send(&self, chat_id: i64, text: &str, keyboard: Option<&Keyboard>);
}
