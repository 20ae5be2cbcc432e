use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_MAX_TOKEN: u32 = 1024;

/// Which persistence backend backs the message and event tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Sqlite,
}

/// Process configuration, built once at startup and passed by reference from
/// then on. A TOML file supplies the base; the environment variables the
/// original deployment used override individual fields.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Shared secret for the webhook challenge signature.
    pub token: String,
    /// Account credentials, carried for parity with the hosted deployment.
    /// The plain-text callback flow never reads them.
    pub app_id: String,
    pub app_secret: String,
    pub encoding_aes_key: String,
    pub openai_key: String,
    pub model: String,
    /// Prompt-window token budget, also sent as the completion max_tokens.
    pub max_token: u32,
    pub api_base: String,
    pub bind: String,
    pub storage: StorageBackend,
    pub database_path: PathBuf,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            token: String::new(),
            app_id: String::new(),
            app_secret: String::new(),
            encoding_aes_key: String::new(),
            openai_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            max_token: DEFAULT_MAX_TOKEN,
            api_base: "https://api.openai.com".to_string(),
            bind: "0.0.0.0:8080".to_string(),
            storage: StorageBackend::Sqlite,
            database_path: PathBuf::from("wxbridge.db"),
            request_timeout_secs: 50,
        }
    }
}

impl Config {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file {}", path.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("failed to parse config file {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(v) = get("TOKEN") {
            self.token = v;
        }
        if let Some(v) = get("APP_ID") {
            self.app_id = v;
        }
        if let Some(v) = get("APP_SECRET") {
            self.app_secret = v;
        }
        if let Some(v) = get("ENCODING_AES_KEY") {
            self.encoding_aes_key = v;
        }
        if let Some(v) = get("OPENAI_KEY") {
            self.openai_key = v;
        }
        if let Some(v) = get("MODEL") {
            self.model = v;
        }
        if let Some(v) = get("MAX_TOKEN") {
            match v.parse() {
                Ok(parsed) => self.max_token = parsed,
                Err(_) => tracing::warn!(value = %v, "ignoring unparseable MAX_TOKEN override"),
            }
        }
        if let Some(v) = get("BIND") {
            self.bind = v;
        }
        if let Some(v) = get("DATABASE_PATH") {
            self.database_path = PathBuf::from(v);
        }
    }
}
