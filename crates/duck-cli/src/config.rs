//! Configuration file support

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use duck_ai::{ClientConfig, HistoryStore, ModelType};

/// Configuration for duck
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default model, by name ("Claude") or wire string
    pub model: Option<String>,
    /// Start in streaming mode
    pub stream: Option<bool>,
    /// Save the conversation after every exchange
    pub autosave: Option<bool>,
    /// Where saved conversations live
    pub history_dir: Option<PathBuf>,
    /// Backend endpoint root
    pub base_url: Option<String>,
    /// User agent sent to the backend
    pub user_agent: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: Option<u64>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("duck-chat")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("DUCK_CHAT_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from the default path
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load config from `path`, falling back to defaults
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to parse config file {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save config to `path`
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let default_config = Config {
            model: Some(ModelType::default().name().to_string()),
            stream: Some(false),
            autosave: Some(true),
            ..Default::default()
        };

        default_config.save_to(&path)?;
        Ok(path)
    }

    /// Resolve the configured model. Unknown names fall back to the default
    /// with a warning.
    pub fn model(&self) -> ModelType {
        match self.model.as_deref() {
            None => ModelType::default(),
            Some(name) => name.parse().unwrap_or_else(|e| {
                tracing::warn!("{}; using {}", e, ModelType::default().name());
                ModelType::default()
            }),
        }
    }

    /// Client settings with config overrides applied
    pub fn client_config(&self) -> ClientConfig {
        let defaults = ClientConfig::default();
        ClientConfig {
            base_url: self.base_url.clone().unwrap_or(defaults.base_url),
            user_agent: self.user_agent.clone().unwrap_or(defaults.user_agent),
            timeout: self.timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn history_store(&self) -> HistoryStore {
        match &self.history_dir {
            Some(dir) => HistoryStore::new(dir.clone()),
            None => HistoryStore::default(),
        }
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# duck configuration file
# Place at ~/.config/duck-chat/config.toml (Linux) or set DUCK_CHAT_CONFIG_PATH

# Default model (Claude, Llama, GPT4oMini, Mixtral)
model = "Claude"

# Print replies as they arrive
stream = false

# Save the conversation after every exchange
autosave = true

# Directory for saved conversations (optional)
# history_dir = "~/.local/share/duck-chat/histories"

# Request timeout in seconds (optional)
# timeout_secs = 60
"#
}
