pub mod error;
pub mod field;
pub mod resolve;
pub mod rules;
pub mod store;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::PathBuf;

pub use error::CoreError;
pub use field::{FieldGroup, ForceField};
pub use resolve::{compute_forced_fields, compute_forced_fields_since, ForcedFields};
pub use rules::{ForceRule, RulesetRegistry, RulesetVersion};
pub use store::{FileStore, MemoryStore, RecordStore};

// --- Records ---

/// A plant record as the store holds it.
///
/// `ruleset_version` is the version the generated attributes were last
/// produced under; `None` means the record was never generated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlantRecord {
    pub id: String,
    pub scientific_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ruleset_version: Option<i64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<ForceField, serde_json::Value>,
}

impl PlantRecord {
    pub fn new(id: impl Into<String>, scientific_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            scientific_name: scientific_name.into(),
            common_name: None,
            ruleset_version: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_common_name(mut self, name: impl Into<String>) -> Self {
        self.common_name = Some(name.into());
        self
    }

    pub fn with_ruleset_version(mut self, version: i64) -> Self {
        self.ruleset_version = Some(version);
        self
    }

    pub fn attribute(&self, field: ForceField) -> Option<&serde_json::Value> {
        self.attributes.get(&field)
    }

    /// Drop anything that must not reach storage.
    pub fn retain_persisted(&mut self) {
        self.attributes.retain(|field, _| field.is_persisted());
    }
}

// --- Storage location ---

/// Resolve the Fernbook data directory (~/.fernbook/).
pub fn fernbook_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".fernbook")
}

// --- Generator settings ---

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 900;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct GeneratorSettings {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout_ms: u64,
    pub max_output_tokens: u32,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
        }
    }
}

impl GeneratorSettings {
    /// Apply `FERNBOOK_*` environment overrides. `OPENAI_API_KEY` is the key fallback.
    pub fn with_env_overrides(mut self) -> Self {
        let key = env_non_empty("FERNBOOK_API_KEY").or_else(|| env_non_empty("OPENAI_API_KEY"));
        if let Some(key) = key {
            self.api_key = key;
        }
        if let Some(model) = env_non_empty("FERNBOOK_MODEL") {
            self.model = model;
        }
        if let Some(url) = env_non_empty("FERNBOOK_BASE_URL") {
            self.base_url = url;
        }
        self
    }
}

fn env_non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn settings_path() -> PathBuf {
    fernbook_dir().join("settings.json")
}

/// Settings from ~/.fernbook/settings.json, defaults when missing or unreadable.
pub fn read_settings() -> GeneratorSettings {
    let path = settings_path();
    if !path.exists() {
        return GeneratorSettings::default();
    }
    match fs::read_to_string(&path).map(|s| serde_json::from_str(&s)) {
        Ok(Ok(settings)) => settings,
        Ok(Err(e)) => {
            tracing::warn!("ignoring malformed {}: {}", path.display(), e);
            GeneratorSettings::default()
        }
        Err(e) => {
            tracing::warn!("cannot read {}: {}", path.display(), e);
            GeneratorSettings::default()
        }
    }
}

pub fn write_settings(settings: &GeneratorSettings) -> Result<(), CoreError> {
    let dir = fernbook_dir();
    fs::create_dir_all(&dir).map_err(|e| CoreError::io(&dir, e))?;
    let json = serde_json::to_string_pretty(settings)?;
    let path = settings_path();
    fs::write(&path, json).map_err(|e| CoreError::io(&path, e))
}

pub fn generator_configured(settings: &GeneratorSettings) -> bool {
    !settings.model.is_empty() && !settings.api_key.is_empty()
}
