//! Runtime settings: a small key -> value JSON store with env overrides.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::warn;

use crate::error::ConfigError;

pub struct Settings {
    path: PathBuf,
}

impl Settings {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn load(&self) -> Result<Map<String, Value>, ConfigError> {
        if !self.path.is_file() {
            return Ok(Map::new());
        }
        let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::ReadFile {
            path: self.path.clone(),
            source: e,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, settings: &Map<String, Value>) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteFile {
                path: self.path.clone(),
                source: e,
            })?;
        }
        let content = serde_json::to_string_pretty(settings)?;
        std::fs::write(&self.path, content).map_err(|e| ConfigError::WriteFile {
            path: self.path.clone(),
            source: e,
        })
    }

    pub fn keys(&self) -> Result<Vec<String>, ConfigError> {
        Ok(self.load()?.keys().cloned().collect())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let doc = match self.load() {
            Ok(doc) => doc,
            Err(e) => {
                warn!("Failed to read settings, treating '{}' as unset: {}", key, e);
                return None;
            }
        };
        match doc.get(key) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
            None => None,
        }
    }

    /// Reads `key`, letting a non-empty `env_var` value take precedence.
    pub fn get_with_env(&self, key: &str, env_var: &str) -> Option<String> {
        if let Ok(value) = std::env::var(env_var) {
            if !value.is_empty() {
                return Some(value);
            }
        }
        self.get(key)
    }

    /// Stores the raw text verbatim under `key`.
    pub fn set(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut doc = self.load()?;
        doc.insert(key.to_string(), Value::String(value.to_string()));
        self.save(&doc)
    }

    /// Operator allow-list. An empty list means everyone is allowed.
    pub fn allowed_user_ids(&self) -> Vec<i64> {
        let doc = match self.load() {
            Ok(doc) => doc,
            Err(e) => {
                warn!("Failed to read settings, allow-list treated as empty: {}", e);
                return Vec::new();
            }
        };
        match doc.get("allowed_user_ids") {
            Some(Value::Array(values)) => values.iter().filter_map(Value::as_i64).collect(),
            _ => Vec::new(),
        }
    }

    pub fn is_allowed(&self, user_id: i64) -> bool {
        let allowed = self.allowed_user_ids();
        allowed.is_empty() || allowed.contains(&user_id)
    }
}
