//! Configuration management for pilot.toml

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Name of the configuration file searched for in the working tree
pub const CONFIG_FILE: &str = "pilot.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub browser: BrowserSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upper bound for a single chat completion; local inference can be slow
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// Identical consecutive actions tolerated before the guard steps in
    #[serde(default = "default_repeat_tolerance")]
    pub repeat_tolerance: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrowserSection {
    #[serde(default)]
    pub headless: bool,
    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,
    #[serde(default = "default_viewport_height")]
    pub viewport_height: u32,
    #[serde(default = "default_action_timeout")]
    pub action_timeout_secs: u64,
    /// Longest `wait` the model may ask for
    #[serde(default = "default_max_wait")]
    pub max_wait_secs: u64,
    #[serde(default = "default_read_page_chars")]
    pub read_page_chars: usize,
    /// Chromium executable; auto-detected when unset
    #[serde(default)]
    pub executable: Option<PathBuf>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    11434
}

fn default_request_timeout() -> u64 {
    120
}

fn default_model() -> String {
    "llama3.1:8b".to_string()
}

fn default_max_steps() -> usize {
    12
}

fn default_repeat_tolerance() -> u32 {
    2
}

fn default_viewport_width() -> u32 {
    1400
}

fn default_viewport_height() -> u32 {
    900
}

fn default_action_timeout() -> u64 {
    30
}

fn default_max_wait() -> u64 {
    30
}

fn default_read_page_chars() -> usize {
    4000
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_steps: default_max_steps(),
            repeat_tolerance: default_repeat_tolerance(),
        }
    }
}

impl Default for BrowserSection {
    fn default() -> Self {
        Self {
            headless: false,
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
            action_timeout_secs: default_action_timeout(),
            max_wait_secs: default_max_wait(),
            read_page_chars: default_read_page_chars(),
            executable: None,
        }
    }
}

impl Config {
    /// Load configuration from pilot.toml
    pub fn load() -> Result<Self> {
        Self::load_from(Self::find_config_path()?)
    }

    /// Try to load configuration, returning None if not found or invalid
    pub fn try_load() -> Option<Self> {
        Self::try_load_from(Self::find_config_path().ok()?)
    }

    /// Load a config file that is known to exist, warning when it is invalid
    pub fn try_load_from(path: impl AsRef<Path>) -> Option<Self> {
        match Self::load_from(path.as_ref()) {
            Ok(config) => Some(config),
            Err(e) => {
                warn!(
                    path = %path.as_ref().display(),
                    error = %format!("{:#}", e),
                    "Ignoring invalid config file, using defaults"
                );
                None
            }
        }
    }

    /// Create a default configuration for when pilot.toml is missing
    pub fn default_minimal() -> Self {
        Self {
            ollama: OllamaConfig::default(),
            agent: AgentSection::default(),
            browser: BrowserSection::default(),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read {}", path.as_ref().display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.as_ref().display()))
    }

    /// Find pilot.toml by searching current directory and parents
    pub fn find_config_path() -> Result<PathBuf> {
        let mut current = std::env::current_dir()?;

        for _ in 0..10 {
            let candidate = current.join(CONFIG_FILE);
            if candidate.exists() {
                return Ok(candidate);
            }
            if !current.pop() {
                break;
            }
        }

        anyhow::bail!("{} not found in current directory or parents", CONFIG_FILE)
    }

    /// Get Ollama base URL
    pub fn ollama_url(&self) -> String {
        format!("http://{}:{}", self.ollama.host, self.ollama.port)
    }
}
