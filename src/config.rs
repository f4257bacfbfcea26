use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-3-flash-preview";
pub const DEFAULT_MODEL_VERSION: &str = "v3.0-flash-pro-inference";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Environment variables checked, in order, for an API key override.
const API_KEY_VARS: &[&str] = &["GEMINI_API_KEY", "API_KEY"];

/// Top-level application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub gemini_api_key: String,
    /// Gemini model name used in the generateContent path
    pub model: String,
    pub base_url: String,
    pub request_timeout_secs: u64,
    /// Tag stored on every recorded test
    pub model_version: String,
    /// Where patients, tests and audio copies live. Defaults to the
    /// platform data directory.
    pub data_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gemini_api_key: String::new(),
            model: DEFAULT_MODEL.into(),
            base_url: DEFAULT_BASE_URL.into(),
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            model_version: DEFAULT_MODEL_VERSION.into(),
            data_dir: None,
        }
    }
}

impl Config {
    /// Directory: ~/.config/neurovoice/
    fn dir() -> PathBuf {
        let mut p = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        p.push("neurovoice");
        p
    }

    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load from the default location and apply environment overrides.
    pub fn load() -> Self {
        let mut config = Self::load_from(&Self::path());
        config.apply_env(|name| std::env::var(name).ok());
        config
    }

    /// Load from disk, returning defaults if the file doesn't exist or is invalid.
    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(data) => serde_json::from_str(&data).unwrap_or_else(|e| {
                log::warn!("Ignoring invalid config {}: {e}", path.display());
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Replace the stored API key with the first non-empty override.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = API_KEY_VARS
            .iter()
            .filter_map(|name| lookup(name))
            .find(|v| !v.trim().is_empty())
        {
            self.gemini_api_key = key;
        }
    }

    /// Data directory: configured value or ~/.local/share/neurovoice/
    pub fn data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        let mut p = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        p.push("neurovoice");
        p
    }

    pub fn save_to(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let data = serde_json::to_string_pretty(self)?;
        fs::write(path, data)?;
        Ok(())
    }

    /// API key with all but the last four characters hidden.
    pub fn masked_api_key(&self) -> String {
        let key = self.gemini_api_key.trim();
        if key.is_empty() {
            return "(not set)".into();
        }
        let visible: String = key
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("****{visible}")
    }
}
