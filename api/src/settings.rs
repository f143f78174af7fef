//! Per-user provider settings kept as JSON files, one directory per user.
//!
//! LLM settings exist on disk in two layouts: an older single-provider object
//! and the multi-provider object written today. Both are read through
//! [`LlmSettingsLayout`] and converted once into [`LlmSettings`]; writes always
//! use the multi-provider layout.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::SettingsError;
use crate::now;

pub const BUILTIN_PROVIDER: &str = "builtin";
/// Api-key marker meaning "use whatever builtin model is configured".
pub const USE_DEFAULT_CONFIG: &str = "USE_DEFAULT_CONFIG";

const LLM_FILE: &str = "llm.json";
const CALENDAR_FILE: &str = "calendar.json";
const EMBEDDING_FILE: &str = "embedding.json";
const RERANKING_FILE: &str = "reranking.json";

// ── Builtin model defaults ──

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultModels {
    #[serde(default)]
    pub builtin_free: Option<BuiltinModel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuiltinModel {
    #[serde(default = "builtin_provider_name")]
    pub provider: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub base_url: String,
    pub model_name: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn builtin_provider_name() -> String {
    BUILTIN_PROVIDER.to_string()
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> u32 {
    2000
}

impl DefaultModels {
    /// A missing file means no builtin model is offered.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        match read_json(path)? {
            Some(models) => Ok(models),
            None => {
                warn!(path = %path.display(), "no default models file, builtin model disabled");
                Ok(DefaultModels::default())
            }
        }
    }
}

// ── Provider defaults ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderDefaults {
    pub base_url: &'static str,
    pub default_model: &'static str,
    pub api_key: Option<&'static str>,
    pub description: Option<&'static str>,
}

pub fn provider_defaults(provider: &str) -> ProviderDefaults {
    let (base_url, default_model) = match provider {
        "openai" => ("https://api.openai.com/v1", "gpt-4o-mini"),
        "anthropic" => ("https://api.anthropic.com", "claude-3-haiku-20240307"),
        "deepseek" => ("https://api.deepseek.com/v1", "deepseek-chat"),
        "google" => (
            "https://generativelanguage.googleapis.com/v1beta",
            "gemini-1.5-flash",
        ),
        "openrouter" => (
            "https://openrouter.ai/api/v1",
            "meta-llama/llama-3.2-3b-instruct:free",
        ),
        "ollama" => ("http://localhost:11434/v1", "llama3.2:3b"),
        BUILTIN_PROVIDER => {
            return ProviderDefaults {
                base_url: "",
                default_model: "builtin-free",
                api_key: Some("builtin-free-key"),
                description: Some("内置免费模型"),
            }
        }
        _ => ("", ""),
    };
    ProviderDefaults {
        base_url,
        default_model,
        api_key: None,
        description: None,
    }
}

// ── LLM settings ──

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub model_name: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MultiProviderLayout {
    pub current_provider: String,
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SingleProviderLayout {
    pub provider: String,
    #[serde(flatten)]
    pub config: ProviderConfig,
}

/// What an `llm.json` may contain.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LlmSettingsLayout {
    Multi(MultiProviderLayout),
    Single(SingleProviderLayout),
}

/// Canonical LLM settings; serializes as the multi-provider layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmSettings {
    pub current_provider: String,
    pub providers: BTreeMap<String, ProviderConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            current_provider: "none".to_string(),
            providers: BTreeMap::new(),
            updated_at: None,
        }
    }
}

impl From<LlmSettingsLayout> for LlmSettings {
    fn from(layout: LlmSettingsLayout) -> Self {
        match layout {
            LlmSettingsLayout::Multi(multi) => LlmSettings {
                current_provider: multi.current_provider,
                providers: multi.providers,
                updated_at: multi.updated_at,
            },
            LlmSettingsLayout::Single(single) => {
                let updated_at = single.config.updated_at.clone();
                let mut providers = BTreeMap::new();
                // A legacy builtin entry is stale by definition; the configured default wins.
                if single.provider != BUILTIN_PROVIDER {
                    providers.insert(single.provider.clone(), single.config);
                }
                LlmSettings {
                    current_provider: single.provider,
                    providers,
                    updated_at,
                }
            }
        }
    }
}

/// The provider a user's requests should go to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveLlm {
    pub provider: String,
    pub config: ProviderConfig,
    pub all_providers: BTreeMap<String, ProviderConfig>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveLlm {
    pub provider: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

// ── Embedding and reranking ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmbeddingSettings {
    pub provider: String,
    pub api_key: String,
    pub model: String,
    pub encoding_format: String,
    pub custom_endpoint: String,
    #[serde(rename = "updated_at", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: "siliconflow".into(),
            api_key: String::new(),
            model: "BAAI/bge-large-zh-v1.5".into(),
            encoding_format: "float".into(),
            custom_endpoint: String::new(),
            updated_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RerankingSettings {
    pub enable_reranking: bool,
    pub reranking_provider: String,
    pub reranking_model: String,
    pub initial_rerank_candidates: u32,
    pub final_rerank_top_n: u32,
    pub reranking_custom_endpoint: String,
    #[serde(rename = "updated_at", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl Default for RerankingSettings {
    fn default() -> Self {
        Self {
            enable_reranking: false,
            reranking_provider: "siliconflow".into(),
            reranking_model: "BAAI/bge-reranker-v2-m3".into(),
            initial_rerank_candidates: 100,
            final_rerank_top_n: 10,
            reranking_custom_endpoint: String::new(),
            updated_at: None,
        }
    }
}

// ── Mail and calendar accounts ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    Imap,
    Exchange,
    CalDav,
}

impl AccountKind {
    fn file_name(&self) -> &'static str {
        match self {
            AccountKind::Imap => "imap.json",
            AccountKind::Exchange => "exchange.json",
            AccountKind::CalDav => "caldav.json",
        }
    }
}

fn calendar_defaults() -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("default_view".into(), Value::from("month"));
    map.insert("week_start".into(), Value::from(1));
    map.insert("time_format".into(), Value::from("24h"));
    map.insert("first_day_of_week".into(), Value::from("monday"));
    map
}

#[derive(Debug, Clone, Serialize)]
pub struct SettingsOverview {
    pub user_id: String,
    pub llm: Option<Value>,
    pub calendar: Option<Value>,
    pub embedding: Option<Value>,
    pub reranking: Option<Value>,
    pub last_access: String,
}

// ── File helpers ──

fn io_error(path: &Path, source: std::io::Error) -> SettingsError {
    SettingsError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// `Ok(None)` when the file is missing or unreadable as JSON; the caller
/// falls back to defaults either way.
fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, SettingsError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_error(path, e)),
    };
    match serde_json::from_str(&text) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring malformed settings file");
            Ok(None)
        }
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), SettingsError> {
    let text = serde_json::to_string_pretty(value).map_err(|source| SettingsError::Json {
        path: path.display().to_string(),
        source,
    })?;
    // Write then rename so readers never see a half-written file.
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, text).map_err(|e| io_error(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| io_error(path, e))?;
    debug!(path = %path.display(), "settings saved");
    Ok(())
}

fn stamp(mut map: Map<String, Value>) -> Map<String, Value> {
    map.insert("updated_at".into(), Value::from(now()));
    map
}

// ── Store ──

#[derive(Debug, Clone)]
pub struct FileSettingsStore {
    base_dir: PathBuf,
    defaults: DefaultModels,
}

impl FileSettingsStore {
    pub fn new(base_dir: impl Into<PathBuf>, defaults: DefaultModels) -> Result<Self, SettingsError> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir).map_err(|e| io_error(&base_dir, e))?;
        info!(dir = %base_dir.display(), "settings store ready");
        Ok(Self { base_dir, defaults })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn user_path(&self, user_id: &str) -> Result<PathBuf, SettingsError> {
        let bad = user_id.is_empty()
            || user_id == "."
            || user_id.contains("..")
            || user_id.contains(['/', '\\', '\0']);
        if bad {
            return Err(SettingsError::InvalidUserId(user_id.to_string()));
        }
        Ok(self.base_dir.join(user_id))
    }

    /// The user's directory, created on demand.
    fn user_dir(&self, user_id: &str) -> Result<PathBuf, SettingsError> {
        let dir = self.user_path(user_id)?;
        fs::create_dir_all(&dir).map_err(|e| io_error(&dir, e))?;
        Ok(dir)
    }

    fn read<T: DeserializeOwned>(&self, user_id: &str, file: &str) -> Result<Option<T>, SettingsError> {
        read_json(&self.user_path(user_id)?.join(file))
    }

    fn write<T: Serialize>(&self, user_id: &str, file: &str, value: &T) -> Result<(), SettingsError> {
        write_json(&self.user_dir(user_id)?.join(file), value)
    }

    fn builtin(&self) -> Option<ProviderConfig> {
        self.defaults.builtin_free.as_ref().map(|m| ProviderConfig {
            api_key: m.api_key.clone(),
            model_name: m.model_name.clone(),
            base_url: m.base_url.clone(),
            description: m.description.clone(),
            updated_at: None,
        })
    }

    pub fn load_llm_settings(&self, user_id: &str) -> Result<Option<LlmSettings>, SettingsError> {
        Ok(self
            .read::<LlmSettingsLayout>(user_id, LLM_FILE)?
            .map(LlmSettings::from))
    }

    /// Resolves which provider the user's requests go to. Users without
    /// settings, or who picked the builtin model without a stored entry, get
    /// the configured builtin model.
    pub fn get_llm_settings(&self, user_id: &str) -> Result<Option<ActiveLlm>, SettingsError> {
        let Some(settings) = self.load_llm_settings(user_id)? else {
            debug!(user_id, "no llm settings, using builtin model");
            return Ok(self.builtin().map(|config| ActiveLlm {
                provider: BUILTIN_PROVIDER.to_string(),
                config,
                all_providers: BTreeMap::new(),
                updated_at: None,
            }));
        };

        let config = match settings.providers.get(&settings.current_provider) {
            Some(config) => Some(config.clone()),
            None if settings.current_provider == BUILTIN_PROVIDER => self.builtin(),
            None => None,
        };
        Ok(config.map(|config| ActiveLlm {
            provider: settings.current_provider.clone(),
            config,
            all_providers: settings.providers,
            updated_at: settings.updated_at,
        }))
    }

    /// Stores a provider's settings and makes it current. Other providers'
    /// entries are kept so switching back restores them.
    pub fn save_llm_settings(&self, user_id: &str, req: SaveLlm) -> Result<LlmSettings, SettingsError> {
        let provider = req.provider.trim();
        if provider.is_empty() {
            return Err(SettingsError::InvalidInput("provider is required".into()));
        }

        let mut settings = self.load_llm_settings(user_id)?.unwrap_or_default();
        let ts = now();

        if provider == BUILTIN_PROVIDER && req.api_key.as_deref() == Some(USE_DEFAULT_CONFIG) {
            // Nothing stored; reads resolve to whatever builtin model is configured.
            settings.providers.remove(BUILTIN_PROVIDER);
        } else {
            let defaults = provider_defaults(provider);
            let entry = if provider == BUILTIN_PROVIDER {
                ProviderConfig {
                    api_key: defaults.api_key.unwrap_or_default().to_string(),
                    model_name: defaults.default_model.to_string(),
                    base_url: defaults.base_url.to_string(),
                    description: defaults.description.map(str::to_string),
                    updated_at: Some(ts.clone()),
                }
            } else {
                let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
                ProviderConfig {
                    api_key: req.api_key.unwrap_or_default(),
                    model_name: non_empty(req.model_name)
                        .unwrap_or_else(|| defaults.default_model.to_string()),
                    base_url: non_empty(req.base_url)
                        .unwrap_or_else(|| defaults.base_url.to_string()),
                    description: None,
                    updated_at: Some(ts.clone()),
                }
            };
            info!(user_id, provider, base_url = %entry.base_url, "llm provider saved");
            settings.providers.insert(provider.to_string(), entry);
        }

        settings.current_provider = provider.to_string();
        settings.updated_at = Some(ts);
        self.write(user_id, LLM_FILE, &settings)?;
        Ok(settings)
    }

    pub fn get_calendar_settings(&self, user_id: &str) -> Result<Map<String, Value>, SettingsError> {
        Ok(self
            .read(user_id, CALENDAR_FILE)?
            .unwrap_or_else(calendar_defaults))
    }

    /// Shallow merge over the stored (or default) calendar settings.
    pub fn save_calendar_settings(
        &self,
        user_id: &str,
        changes: Map<String, Value>,
    ) -> Result<Map<String, Value>, SettingsError> {
        let mut merged = self.get_calendar_settings(user_id)?;
        debug!(user_id, keys = ?changes.keys().collect::<Vec<_>>(), "merging calendar settings");
        merged.extend(changes);
        let merged = stamp(merged);
        self.write(user_id, CALENDAR_FILE, &merged)?;
        Ok(merged)
    }

    pub fn get_account_settings(
        &self,
        user_id: &str,
        kind: AccountKind,
    ) -> Result<Map<String, Value>, SettingsError> {
        Ok(self.read(user_id, kind.file_name())?.unwrap_or_default())
    }

    /// Replaces the stored account object.
    pub fn save_account_settings(
        &self,
        user_id: &str,
        kind: AccountKind,
        settings: Map<String, Value>,
    ) -> Result<Map<String, Value>, SettingsError> {
        let settings = stamp(settings);
        self.write(user_id, kind.file_name(), &settings)?;
        info!(user_id, kind = ?kind, "account settings saved");
        Ok(settings)
    }

    pub fn get_embedding_settings(&self, user_id: &str) -> Result<EmbeddingSettings, SettingsError> {
        Ok(self.read(user_id, EMBEDDING_FILE)?.unwrap_or_default())
    }

    pub fn save_embedding_settings(
        &self,
        user_id: &str,
        mut settings: EmbeddingSettings,
    ) -> Result<EmbeddingSettings, SettingsError> {
        settings.updated_at = Some(now());
        self.write(user_id, EMBEDDING_FILE, &settings)?;
        Ok(settings)
    }

    pub fn get_reranking_settings(&self, user_id: &str) -> Result<RerankingSettings, SettingsError> {
        Ok(self.read(user_id, RERANKING_FILE)?.unwrap_or_default())
    }

    pub fn save_reranking_settings(
        &self,
        user_id: &str,
        mut settings: RerankingSettings,
    ) -> Result<RerankingSettings, SettingsError> {
        settings.updated_at = Some(now());
        self.write(user_id, RERANKING_FILE, &settings)?;
        Ok(settings)
    }

    /// Removes every settings file of the user. `false` when there was nothing.
    pub fn delete_user_settings(&self, user_id: &str) -> Result<bool, SettingsError> {
        let dir = self.user_path(user_id)?;
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                info!(user_id, "user settings deleted");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(&dir, e)),
        }
    }

    /// Ids of users that have a settings directory, sorted.
    pub fn list_users(&self) -> Result<Vec<String>, SettingsError> {
        let entries = fs::read_dir(&self.base_dir).map_err(|e| io_error(&self.base_dir, e))?;
        let mut users = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_error(&self.base_dir, e))?;
            let is_dir = entry
                .file_type()
                .map_err(|e| io_error(&entry.path(), e))?
                .is_dir();
            if is_dir {
                users.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        users.sort();
        Ok(users)
    }

    /// Raw stored files, for support and admin views.
    pub fn overview(&self, user_id: &str) -> Result<SettingsOverview, SettingsError> {
        Ok(SettingsOverview {
            user_id: user_id.to_string(),
            llm: self.read(user_id, LLM_FILE)?,
            calendar: self.read(user_id, CALENDAR_FILE)?,
            embedding: self.read(user_id, EMBEDDING_FILE)?,
            reranking: self.read(user_id, RERANKING_FILE)?,
            last_access: now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn builtin_defaults() -> DefaultModels {
        DefaultModels {
            builtin_free: Some(BuiltinModel {
                provider: BUILTIN_PROVIDER.into(),
                api_key: "free-key".into(),
                base_url: "https://free.llm/v1".into(),
                model_name: "free-chat".into(),
                temperature: 0.7,
                max_tokens: 2000,
                description: Some("free tier".into()),
            }),
        }
    }

    fn store() -> (FileSettingsStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = FileSettingsStore::new(dir.path().join("user-settings"), builtin_defaults())
            .unwrap();
        (store, dir)
    }

    fn write_raw(store: &FileSettingsStore, user: &str, file: &str, value: Value) {
        let dir = store.base_dir().join(user);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(file), value.to_string()).unwrap();
    }

    #[test]
    fn new_users_get_the_builtin_model() {
        let (store, _dir) = store();
        let active = store.get_llm_settings("u1").unwrap().unwrap();
        assert_eq!(active.provider, BUILTIN_PROVIDER);
        assert_eq!(active.config.model_name, "free-chat");
    }

    #[test]
    fn without_builtin_defaults_new_users_get_nothing() {
        let dir = TempDir::new().unwrap();
        let store = FileSettingsStore::new(dir.path(), DefaultModels::default()).unwrap();
        assert!(store.get_llm_settings("u1").unwrap().is_none());
    }

    #[test]
    fn legacy_single_provider_file_is_understood() {
        let (store, _dir) = store();
        write_raw(
            &store,
            "u1",
            LLM_FILE,
            json!({
                "provider": "deepseek",
                "api_key": "sk-1",
                "model_name": "deepseek-chat",
                "base_url": "https://api.deepseek.com/v1"
            }),
        );

        let active = store.get_llm_settings("u1").unwrap().unwrap();
        assert_eq!(active.provider, "deepseek");
        assert_eq!(active.config.api_key, "sk-1");

        write_raw(&store, "u2", LLM_FILE, json!({"provider": "builtin", "api_key": "old"}));
        let active = store.get_llm_settings("u2").unwrap().unwrap();
        assert_eq!(active.config.api_key, "free-key");
    }

    #[test]
    fn saving_keeps_other_providers_and_fills_defaults() {
        let (store, _dir) = store();
        store
            .save_llm_settings(
                "u1",
                SaveLlm {
                    provider: "openai".into(),
                    api_key: Some("sk-openai".into()),
                    model_name: None,
                    base_url: Some("".into()),
                },
            )
            .unwrap();
        let saved = store
            .save_llm_settings(
                "u1",
                SaveLlm {
                    provider: "ollama".into(),
                    api_key: None,
                    model_name: Some("qwen2.5:7b".into()),
                    base_url: Some("http://gpu-box:11434/v1".into()),
                },
            )
            .unwrap();

        assert_eq!(saved.current_provider, "ollama");
        let openai = &saved.providers["openai"];
        assert_eq!(openai.model_name, "gpt-4o-mini");
        assert_eq!(openai.base_url, "https://api.openai.com/v1");

        let active = store.get_llm_settings("u1").unwrap().unwrap();
        assert_eq!(active.provider, "ollama");
        assert_eq!(active.config.base_url, "http://gpu-box:11434/v1");
        assert_eq!(active.all_providers.len(), 2);
    }

    #[test]
    fn use_default_config_defers_to_configured_builtin() {
        let (store, _dir) = store();
        store
            .save_llm_settings(
                "u1",
                SaveLlm {
                    provider: "builtin".into(),
                    api_key: None,
                    model_name: None,
                    base_url: None,
                },
            )
            .unwrap();
        let saved = store
            .save_llm_settings(
                "u1",
                SaveLlm {
                    provider: "builtin".into(),
                    api_key: Some(USE_DEFAULT_CONFIG.into()),
                    model_name: None,
                    base_url: None,
                },
            )
            .unwrap();
        assert!(!saved.providers.contains_key(BUILTIN_PROVIDER));

        let active = store.get_llm_settings("u1").unwrap().unwrap();
        assert_eq!(active.provider, BUILTIN_PROVIDER);
        assert_eq!(active.config.model_name, "free-chat");
    }

    #[test]
    fn calendar_settings_merge_over_defaults() {
        let (store, _dir) = store();
        let defaults = store.get_calendar_settings("u1").unwrap();
        assert_eq!(defaults["default_view"], "month");

        let mut changes = Map::new();
        changes.insert("default_view".into(), json!("week"));
        changes.insert("caldav_enabled".into(), json!(true));
        store.save_calendar_settings("u1", changes).unwrap();

        let stored = store.get_calendar_settings("u1").unwrap();
        assert_eq!(stored["default_view"], "week");
        assert_eq!(stored["time_format"], "24h");
        assert_eq!(stored["caldav_enabled"], true);
        assert!(stored.contains_key("updated_at"));
    }

    #[test]
    fn typed_settings_fall_back_to_defaults() {
        let (store, _dir) = store();
        assert_eq!(store.get_reranking_settings("u1").unwrap().final_rerank_top_n, 10);

        write_raw(&store, "u1", EMBEDDING_FILE, json!({"provider": "openai", "apiKey": "k"}));
        let embedding = store.get_embedding_settings("u1").unwrap();
        assert_eq!(embedding.provider, "openai");
        assert_eq!(embedding.api_key, "k");
        assert_eq!(embedding.encoding_format, "float");

        write_raw(&store, "u2", EMBEDDING_FILE, json!("not an object"));
        assert_eq!(
            store.get_embedding_settings("u2").unwrap(),
            EmbeddingSettings::default()
        );
    }

    #[test]
    fn account_settings_round_trip() {
        let (store, _dir) = store();
        assert!(store
            .get_account_settings("u1", AccountKind::Imap)
            .unwrap()
            .is_empty());

        let mut imap = Map::new();
        imap.insert("email".into(), json!("me@example.com"));
        imap.insert("port".into(), json!(993));
        store
            .save_account_settings("u1", AccountKind::Imap, imap)
            .unwrap();

        let stored = store.get_account_settings("u1", AccountKind::Imap).unwrap();
        assert_eq!(stored["port"], 993);
        assert!(store
            .get_account_settings("u1", AccountKind::CalDav)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn user_ids_cannot_escape_the_base_dir() {
        let (store, _dir) = store();
        for bad in ["", "..", "../etc", "a/b", "a\\b"] {
            assert!(matches!(
                store.get_embedding_settings(bad),
                Err(SettingsError::InvalidUserId(_))
            ));
        }
    }

    #[test]
    fn listing_and_deleting_users() {
        let (store, _dir) = store();
        store
            .save_embedding_settings("bob", EmbeddingSettings::default())
            .unwrap();
        store
            .save_reranking_settings("alice", RerankingSettings::default())
            .unwrap();
        assert_eq!(store.list_users().unwrap(), vec!["alice", "bob"]);

        let overview = store.overview("alice").unwrap();
        assert!(overview.reranking.is_some());
        assert!(overview.llm.is_none());

        assert!(store.delete_user_settings("bob").unwrap());
        assert!(!store.delete_user_settings("bob").unwrap());
        assert_eq!(store.list_users().unwrap(), vec!["alice"]);
    }
}
