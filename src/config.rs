use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_SERVICE_URL: &str = "http://127.0.0.1:5000";
pub const DEFAULT_ENDPOINT_PATH: &str = "/api/restore";
pub const DEFAULT_PRESET: &str = "balanced";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Values sent with every request as the `h`, `clahe` and `sharp` fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresetValues {
    pub h: f64,
    pub clahe: f64,
    pub sharp: f64,
}

impl Default for PresetValues {
    fn default() -> Self {
        Self {
            h: 10.0,
            clahe: 2.0,
            sharp: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preset {
    pub name: String,
    #[serde(flatten)]
    pub values: PresetValues,
}

impl Preset {
    pub fn new(name: impl Into<String>, h: f64, clahe: f64, sharp: f64) -> Self {
        Self {
            name: name.into(),
            values: PresetValues { h, clahe, sharp },
        }
    }
}

pub fn builtin_presets() -> Vec<Preset> {
    vec![
        Preset::new("gentle", 6.0, 1.5, 0.8),
        Preset::new(DEFAULT_PRESET, 10.0, 2.0, 1.0),
        Preset::new("strong", 15.0, 3.0, 1.5),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    #[serde(default = "default_service_url")]
    pub service_url: String,
    #[serde(default = "default_endpoint_path")]
    pub endpoint_path: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "builtin_presets")]
    pub presets: Vec<Preset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_preset: Option<String>,
}

fn default_service_url() -> String {
    DEFAULT_SERVICE_URL.to_string()
}

fn default_endpoint_path() -> String {
    DEFAULT_ENDPOINT_PATH.to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            service_url: default_service_url(),
            endpoint_path: default_endpoint_path(),
            timeout_secs: default_timeout_secs(),
            presets: builtin_presets(),
            default_preset: Some(DEFAULT_PRESET.to_string()),
        }
    }
}

impl ClientConfig {
    pub fn normalize(mut self) -> Self {
        self.service_url = self.service_url.trim().to_string();
        if self.service_url.is_empty() {
            self.service_url = default_service_url();
        }
        self.endpoint_path = self.endpoint_path.trim().to_string();
        if self.endpoint_path.is_empty() {
            self.endpoint_path = default_endpoint_path();
        }
        if self.timeout_secs == 0 {
            self.timeout_secs = default_timeout_secs();
        }
        for preset in &mut self.presets {
            preset.name = preset.name.trim().to_string();
        }
        self.presets.retain(|preset| !preset.name.is_empty());
        if let Some(name) = self.default_preset.take() {
            let trimmed = name.trim();
            if !trimmed.is_empty() {
                self.default_preset = Some(trimmed.to_string());
            }
        }
        self
    }

    pub fn preset(&self, name: &str) -> Option<&Preset> {
        self.presets
            .iter()
            .find(|preset| preset.name.eq_ignore_ascii_case(name.trim()))
    }

    pub fn initial_preset(&self) -> Option<&Preset> {
        self.default_preset
            .as_deref()
            .and_then(|name| self.preset(name))
    }
}

pub fn load_config(path: &Path) -> Result<ClientConfig, ConfigError> {
    let bytes = fs::read(path)?;
    let config: ClientConfig = serde_json::from_slice(&bytes)?;
    Ok(config.normalize())
}

pub fn save_config(path: &Path, config: &ClientConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec_pretty(config)?;
    fs::write(path, json)?;
    Ok(())
}

pub fn default_config_path(root: &Path) -> PathBuf {
    root.join("restore_studio.json")
}
