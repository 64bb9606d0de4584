//! Account registry: externally configured identities the pipeline runs for.
//!
//! Read-only to the pipeline; mutated only through the wizard add/edit flows.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub pass: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub alias: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    /// API key for the posting service.
    #[serde(default, alias = "late_api_key")]
    pub publish_api_key: String,
    #[serde(default = "default_publish_base_url", alias = "late_base_url")]
    pub publish_base_url: String,
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,
}

fn default_publish_base_url() -> String {
    "https://getlate.dev/api/v1".to_string()
}

impl Default for Account {
    fn default() -> Self {
        Self {
            alias: String::new(),
            email: String::new(),
            password: String::new(),
            publish_api_key: String::new(),
            publish_base_url: default_publish_base_url(),
            proxy: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryDoc {
    /// Alias used when no explicit selection is made.
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub accounts: Vec<Account>,
}

pub struct AccountRegistry {
    path: PathBuf,
}

impl AccountRegistry {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// A missing registry file yields an empty document so that the first
    /// `add` works on a fresh install.
    pub fn load(&self) -> Result<RegistryDoc, ConfigError> {
        if !self.path.is_file() {
            return Ok(RegistryDoc::default());
        }
        let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::ReadFile {
            path: self.path.clone(),
            source: e,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, doc: &RegistryDoc) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteFile {
                path: self.path.clone(),
                source: e,
            })?;
        }
        let content = serde_json::to_string_pretty(doc)?;
        std::fs::write(&self.path, content).map_err(|e| ConfigError::WriteFile {
            path: self.path.clone(),
            source: e,
        })
    }

    pub fn aliases(&self) -> Result<Vec<String>, ConfigError> {
        Ok(self
            .load()?
            .accounts
            .iter()
            .map(|a| a.alias.clone())
            .collect())
    }

    /// Resolves `alias`, falling back to the configured default and then the
    /// first account.
    pub fn get(&self, alias: Option<&str>) -> Result<Account, ConfigError> {
        let doc = self.load()?;
        if doc.accounts.is_empty() {
            return Err(ConfigError::NoAccounts);
        }

        let target = alias
            .map(str::to_string)
            .or_else(|| doc.default.clone())
            .unwrap_or_else(|| doc.accounts[0].alias.clone());

        doc.accounts
            .into_iter()
            .find(|a| a.alias == target)
            .ok_or(ConfigError::UnknownAccount { alias: target })
    }

    pub fn add(&self, account: Account) -> Result<(), ConfigError> {
        if account.alias.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: "account alias must not be empty".to_string(),
            });
        }
        let mut doc = self.load()?;
        if doc.accounts.iter().any(|a| a.alias == account.alias) {
            return Err(ConfigError::Validation {
                message: format!("account alias already exists: {}", account.alias),
            });
        }
        doc.accounts.push(account);
        self.save(&doc)
    }

    /// Applies a partial JSON patch onto the account matching `alias`.
    /// Unknown fields in the patch are rejected by deserialization.
    pub fn patch(&self, alias: &str, patch: &serde_json::Value) -> Result<(), ConfigError> {
        let patch_obj = patch.as_object().ok_or_else(|| ConfigError::Validation {
            message: "account patch must be a JSON object".to_string(),
        })?;

        let mut doc = self.load()?;
        let position = doc
            .accounts
            .iter()
            .position(|a| a.alias == alias)
            .ok_or_else(|| ConfigError::UnknownAccount {
                alias: alias.to_string(),
            })?;

        let mut merged = serde_json::to_value(&doc.accounts[position])?;
        if let Some(target) = merged.as_object_mut() {
            for (key, value) in patch_obj {
                target.insert(key.clone(), value.clone());
            }
        }
        doc.accounts[position] = serde_json::from_value(merged)?;
        self.save(&doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registry_with(doc: &RegistryDoc) -> (TempDir, AccountRegistry) {
        let tmp = TempDir::new().unwrap();
        let registry = AccountRegistry::new(tmp.path().join("accounts.json"));
        registry.save(doc).unwrap();
        (tmp, registry)
    }

    fn account(alias: &str) -> Account {
        Account {
            alias: alias.to_string(),
            email: format!("{alias}@example.com"),
            password: "secret".to_string(),
            publish_api_key: "key".to_string(),
            publish_base_url: "https://post.example/api".to_string(),
            proxy: None,
        }
    }

    #[test]
    fn test_missing_file_yields_empty_registry() {
        let tmp = TempDir::new().unwrap();
        let registry = AccountRegistry::new(tmp.path().join("missing.json"));
        let doc = registry.load().unwrap();
        assert!(doc.accounts.is_empty());
        assert!(doc.default.is_none());
    }

    #[test]
    fn test_get_resolves_explicit_alias() {
        let (_tmp, registry) = registry_with(&RegistryDoc {
            default: None,
            accounts: vec![account("acc1"), account("acc2")],
        });
        assert_eq!(registry.get(Some("acc2")).unwrap().alias, "acc2");
    }

    #[test]
    fn test_get_falls_back_to_default_then_first() {
        let (_tmp, registry) = registry_with(&RegistryDoc {
            default: Some("acc2".to_string()),
            accounts: vec![account("acc1"), account("acc2")],
        });
        assert_eq!(registry.get(None).unwrap().alias, "acc2");

        let (_tmp, registry) = registry_with(&RegistryDoc {
            default: None,
            accounts: vec![account("acc1"), account("acc2")],
        });
        assert_eq!(registry.get(None).unwrap().alias, "acc1");
    }

    #[test]
    fn test_get_unknown_alias_errors() {
        let (_tmp, registry) = registry_with(&RegistryDoc {
            default: None,
            accounts: vec![account("acc1")],
        });
        assert!(matches!(
            registry.get(Some("ghost")),
            Err(ConfigError::UnknownAccount { .. })
        ));
    }

    #[test]
    fn test_get_with_no_accounts_errors() {
        let (_tmp, registry) = registry_with(&RegistryDoc::default());
        assert!(matches!(registry.get(None), Err(ConfigError::NoAccounts)));
    }

    #[test]
    fn test_add_rejects_empty_alias_and_duplicates() {
        let (_tmp, registry) = registry_with(&RegistryDoc::default());
        assert!(registry.add(account("  ")).is_err());
        registry.add(account("acc1")).unwrap();
        assert!(registry.add(account("acc1")).is_err());
        assert_eq!(registry.aliases().unwrap(), vec!["acc1"]);
    }

    #[test]
    fn test_patch_merges_partial_fields() {
        let (_tmp, registry) = registry_with(&RegistryDoc {
            default: None,
            accounts: vec![account("acc1")],
        });

        let patch = serde_json::json!({ "email": "new@example.com" });
        registry.patch("acc1", &patch).unwrap();

        let updated = registry.get(Some("acc1")).unwrap();
        assert_eq!(updated.email, "new@example.com");
        assert_eq!(updated.password, "secret");
    }

    #[test]
    fn test_patch_unknown_alias_errors() {
        let (_tmp, registry) = registry_with(&RegistryDoc::default());
        let patch = serde_json::json!({ "email": "x@example.com" });
        assert!(matches!(
            registry.patch("ghost", &patch),
            Err(ConfigError::UnknownAccount { .. })
        ));
    }

    #[test]
    fn test_patch_rejects_non_object() {
        let (_tmp, registry) = registry_with(&RegistryDoc {
            default: None,
            accounts: vec![account("acc1")],
        });
        assert!(registry
            .patch("acc1", &serde_json::json!("not an object"))
            .is_err());
    }
}
