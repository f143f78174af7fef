use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::settings::DefaultModels;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub settings: SettingsConfig,
    /// Builtin model defaults, read once at startup and handed to the settings store.
    pub default_models: DefaultModels,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsConfig {
    pub dir: PathBuf,
    pub default_models_path: PathBuf,
}

impl AppConfig {
    /// Reads the process environment. The binary loads `.env` into it first.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the config from any variable source, so tests don't touch the process env.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        let raw_max_connections = var("DATABASE_MAX_CONNECTIONS", "8");
        let max_connections = raw_max_connections
            .parse()
            .map_err(|_| ConfigError::NotANumber {
                name: "DATABASE_MAX_CONNECTIONS",
                value: raw_max_connections.clone(),
            })?;

        let settings = SettingsConfig {
            dir: PathBuf::from(var("SETTINGS_DIR", "user-settings")),
            default_models_path: PathBuf::from(var(
                "DEFAULT_MODELS_PATH",
                "config/default-models.json",
            )),
        };

        let default_models = load_default_models(&settings.default_models_path)?;

        Ok(AppConfig {
            database: DatabaseConfig {
                url: var("DATABASE_URL", "mindocean.db"),
                max_connections,
            },
            settings,
            default_models,
        })
    }
}

fn load_default_models(path: &Path) -> Result<DefaultModels, ConfigError> {
    DefaultModels::load(path).map_err(|source| ConfigError::DefaultModels {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("none.json");
        let config = AppConfig::from_lookup(lookup_from(&[(
            "DEFAULT_MODELS_PATH",
            missing.to_str().unwrap(),
        )]))
        .unwrap();

        assert_eq!(config.database.url, "mindocean.db");
        assert_eq!(config.database.max_connections, 8);
        assert_eq!(config.settings.dir, PathBuf::from("user-settings"));
        assert!(config.default_models.builtin_free.is_none());
    }

    #[test]
    fn bad_pool_size_is_reported() {
        let err = AppConfig::from_lookup(lookup_from(&[("DATABASE_MAX_CONNECTIONS", "lots")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::NotANumber {
                name: "DATABASE_MAX_CONNECTIONS",
                ..
            }
        ));
    }

    #[test]
    fn default_models_file_is_read_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("default-models.json");
        std::fs::write(
            &path,
            r#"{"builtin_free": {"api_key": "k", "base_url": "https://llm.local/v1", "model_name": "free-1"}}"#,
        )
        .unwrap();

        let config = AppConfig::from_lookup(lookup_from(&[(
            "DEFAULT_MODELS_PATH",
            path.to_str().unwrap(),
        )]))
        .unwrap();

        let builtin = config.default_models.builtin_free.unwrap();
        assert_eq!(builtin.model_name, "free-1");
        assert_eq!(builtin.provider, "builtin");
    }
}
