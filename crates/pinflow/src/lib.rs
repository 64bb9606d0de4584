//! Chat-driven content funnel: reference boards in, AI-generated media out,
//! published through a posting API.
//!
//! The crate is layered bottom-up: durable [`state`] and [`config`] stores,
//! the on-disk [`artifacts`] tree, HTTP [`services`] behind trait seams, the
//! three-stage [`pipeline`], and the operator-facing [`wizard`] and
//! [`dispatch`] layers that drive it all from a chat transport.

pub mod artifacts;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod pipeline;
pub mod retry;
pub mod services;
pub mod state;
pub mod wizard;

pub use artifacts::ArtifactLayout;
pub use config::{Account, AccountRegistry, PromptBook, Settings};
pub use dispatch::Dispatcher;
pub use error::{ConfigError, FunnelError, Result};
pub use pipeline::JobRunner;
pub use retry::{retry, RetryPolicy};
pub use state::{JobStatus, ModelChoice, StateStore};
