//! User config file
//!
//! Lives at `~/.debugduck/config.toml` (or `$DEBUGDUCK_HOME/config.toml`)
//! and holds the keys below. Edits go through `toml_edit` so comments and
//! layout the user added survive.

use crate::{DuckError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Environment variable overriding the config directory
pub const HOME_ENV: &str = "DEBUGDUCK_HOME";

/// Environment variable consulted for the API key
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Keys the config file understands
pub const CONFIG_KEYS: &[&str] = &["model_name", "openai_api_key"];

/// Parsed user config
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    pub model_name: Option<String>,
    pub openai_api_key: Option<String>,
}

/// Directory holding the config file
pub fn config_dir() -> Result<PathBuf> {
    if let Some(home) = std::env::var_os(HOME_ENV) {
        return Ok(PathBuf::from(home));
    }
    dirs::home_dir()
        .map(|home| home.join(".debugduck"))
        .ok_or_else(|| DuckError::Config("Could not find home directory".to_string()))
}

pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// Load the user config; a missing file is an empty config.
pub async fn load_config() -> Result<UserConfig> {
    load_config_from(&config_path()?).await
}

pub async fn load_config_from(path: &Path) -> Result<UserConfig> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No config file at {}", path.display());
            return Ok(UserConfig::default());
        }
        Err(e) => return Err(e.into()),
    };
    let table: toml::Table = toml::from_str(&text)?;
    for key in table.keys() {
        if !CONFIG_KEYS.contains(&key.as_str()) {
            warn!("Ignoring unknown config key {} in {}", key, path.display());
        }
    }
    Ok(toml::from_str(&text)?)
}

/// Set keys in the user config. An empty value deletes the key.
pub async fn update_config(updates: &BTreeMap<String, String>) -> Result<()> {
    update_config_at(&config_path()?, updates).await
}

pub async fn update_config_at(path: &Path, updates: &BTreeMap<String, String>) -> Result<()> {
    let existing = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };
    let mut doc: toml_edit::DocumentMut = existing
        .parse()
        .map_err(|e| DuckError::Config(format!("{}: {}", path.display(), e)))?;

    for (key, value) in updates {
        if !CONFIG_KEYS.contains(&key.as_str()) {
            warn!(
                "Unknown config key {}; recognized keys are {}",
                key,
                CONFIG_KEYS.join(", ")
            );
        }
        if value.is_empty() {
            if doc.remove(key).is_some() {
                info!("Removed {} from config", key);
            }
        } else {
            doc[key.as_str()] = toml_edit::value(value.as_str());
            info!("Set {} in config", key);
        }
    }

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, doc.to_string()).await?;
    Ok(())
}

/// Model to use: explicit, then config file, then template.
pub fn resolve_model_name(explicit: Option<&str>, config: &UserConfig, template_model: &str) -> String {
    explicit
        .or(config.model_name.as_deref())
        .unwrap_or(template_model)
        .to_string()
}

/// API key: explicit, then `OPENAI_API_KEY`, then config file.
pub fn resolve_api_key(explicit: Option<&str>, config: &UserConfig) -> Option<String> {
    let env = std::env::var(API_KEY_ENV).ok();
    pick_api_key(explicit, env.as_deref(), config)
}

fn pick_api_key(explicit: Option<&str>, env: Option<&str>, config: &UserConfig) -> Option<String> {
    [explicit, env, config.openai_api_key.as_deref()]
        .into_iter()
        .flatten()
        .find(|key| !key.trim().is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn updates(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("config.toml")).await.unwrap();
        assert_eq!(config, UserConfig::default());
    }

    #[tokio::test]
    async fn test_update_and_delete_model_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        update_config_at(&path, &updates(&[("model_name", "gpt-4")]))
            .await
            .unwrap();
        let config = load_config_from(&path).await.unwrap();
        assert_eq!(config.model_name.as_deref(), Some("gpt-4"));

        update_config_at(&path, &updates(&[("model_name", "")]))
            .await
            .unwrap();
        let config = load_config_from(&path).await.unwrap();
        assert_eq!(config.model_name, None);
    }

    #[tokio::test]
    async fn test_update_preserves_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        tokio::fs::write(&path, "# my settings\nopenai_api_key = \"sk-1\"\n")
            .await
            .unwrap();

        update_config_at(&path, &updates(&[("model_name", "gpt-4")]))
            .await
            .unwrap();
        let text = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(text.starts_with("# my settings\n"));
        assert!(text.contains("model_name = \"gpt-4\""));

        let config = load_config_from(&path).await.unwrap();
        assert_eq!(config.openai_api_key.as_deref(), Some("sk-1"));
    }

    #[tokio::test]
    async fn test_unknown_keys_are_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        tokio::fs::write(&path, "model_name = \"gpt-4\"\ncolour = \"red\"\n")
            .await
            .unwrap();
        let config = load_config_from(&path).await.unwrap();
        assert_eq!(config.model_name.as_deref(), Some("gpt-4"));
    }

    #[test]
    fn test_model_name_priority() {
        let config = UserConfig {
            model_name: Some("from-config".to_string()),
            openai_api_key: None,
        };
        assert_eq!(resolve_model_name(Some("explicit"), &config, "template"), "explicit");
        assert_eq!(resolve_model_name(None, &config, "template"), "from-config");
        assert_eq!(resolve_model_name(None, &UserConfig::default(), "template"), "template");
    }

    #[test]
    fn test_api_key_priority() {
        let config = UserConfig {
            model_name: None,
            openai_api_key: Some("sk-config".to_string()),
        };
        assert_eq!(pick_api_key(Some("sk-x"), Some("sk-env"), &config).as_deref(), Some("sk-x"));
        assert_eq!(pick_api_key(None, Some("sk-env"), &config).as_deref(), Some("sk-env"));
        assert_eq!(pick_api_key(None, Some(""), &config).as_deref(), Some("sk-config"));
        assert_eq!(pick_api_key(None, None, &UserConfig::default()), None);
    }
}
