//! Prompt book: key -> template store with `{name}` placeholder rendering.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

pub struct PromptBook {
    path: PathBuf,
}

impl PromptBook {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn load(&self) -> Result<BTreeMap<String, String>, ConfigError> {
        if !self.path.is_file() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::ReadFile {
            path: self.path.clone(),
            source: e,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, prompts: &BTreeMap<String, String>) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteFile {
                path: self.path.clone(),
                source: e,
            })?;
        }
        let content = serde_json::to_string_pretty(prompts)?;
        std::fs::write(&self.path, content).map_err(|e| ConfigError::WriteFile {
            path: self.path.clone(),
            source: e,
        })
    }

    pub fn keys(&self) -> Result<Vec<String>, ConfigError> {
        Ok(self.load()?.keys().cloned().collect())
    }

    pub fn get(&self, key: &str) -> Result<String, ConfigError> {
        self.load()?
            .get(key)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownKey {
                key: key.to_string(),
            })
    }

    /// Stores `value` verbatim under `key`, creating the key if absent.
    pub fn set(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut prompts = self.load()?;
        prompts.insert(key.to_string(), value.to_string());
        self.save(&prompts)
    }

    /// Renders the template under `key`, replacing each `{name}` placeholder
    /// with the paired value. Unreferenced placeholders are left as-is.
    pub fn render(&self, key: &str, vars: &[(&str, &str)]) -> Result<String, ConfigError> {
        let mut rendered = self.get(key)?;
        for (name, value) in vars {
            rendered = rendered.replace(&format!("{{{name}}}"), value);
        }
        Ok(rendered)
    }

    /// Like `render`, but falls back to a built-in template when the key is
    /// not configured.
    pub fn render_or(&self, key: &str, fallback: &str, vars: &[(&str, &str)]) -> String {
        let mut rendered = match self.get(key) {
            Ok(template) => template,
            Err(_) => fallback.to_string(),
        };
        for (name, value) in vars {
            rendered = rendered.replace(&format!("{{{name}}}"), value);
        }
        rendered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn book() -> (TempDir, PromptBook) {
        let tmp = TempDir::new().unwrap();
        let book = PromptBook::new(tmp.path().join("prompts.json"));
        (tmp, book)
    }

    #[test]
    fn test_missing_file_yields_empty_book() {
        let (_tmp, book) = book();
        assert!(book.keys().unwrap().is_empty());
    }

    #[test]
    fn test_set_and_get_verbatim() {
        let (_tmp, book) = book();
        book.set("image_prompt", "  raw text with spaces  ").unwrap();
        assert_eq!(book.get("image_prompt").unwrap(), "  raw text with spaces  ");
    }

    #[test]
    fn test_get_unknown_key_errors() {
        let (_tmp, book) = book();
        assert!(matches!(
            book.get("missing"),
            Err(ConfigError::UnknownKey { .. })
        ));
    }

    #[test]
    fn test_render_substitutes_placeholders() {
        let (_tmp, book) = book();
        book.set("p", "Style: {style}. Board: {board}.").unwrap();
        let out = book
            .render("p", &[("style", "warm pastel"), ("board", "autumn")])
            .unwrap();
        assert_eq!(out, "Style: warm pastel. Board: autumn.");
    }

    #[test]
    fn test_render_or_falls_back_when_key_missing() {
        let (_tmp, book) = book();
        let out = book.render_or("missing", "fallback {x}", &[("x", "1")]);
        assert_eq!(out, "fallback 1");
    }
}
