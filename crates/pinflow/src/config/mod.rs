pub mod accounts;
pub mod prompts;
pub mod settings;

pub use accounts::{Account, AccountRegistry, ProxyConfig, RegistryDoc};
pub use prompts::PromptBook;
pub use settings::Settings;

use std::path::PathBuf;

/// Resolves the data directory holding state, config, and artifacts.
/// `PINFLOW_DATA_DIR` overrides the platform default.
pub fn default_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("PINFLOW_DATA_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pinflow")
}
