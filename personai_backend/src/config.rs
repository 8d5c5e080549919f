use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Sampling options forwarded verbatim to the backend's `options` object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    #[serde(default = "default_repeat_penalty")]
    pub repeat_penalty: f32,
    /// Context window, in tokens.
    #[serde(default = "default_num_ctx")]
    pub num_ctx: u32,
    /// Maximum number of generated tokens.
    #[serde(default = "default_num_predict")]
    pub num_predict: u32,
}

fn default_temperature() -> f32 {
    0.8
}

fn default_top_p() -> f32 {
    0.9
}

fn default_top_k() -> u32 {
    40
}

fn default_repeat_penalty() -> f32 {
    1.1
}

fn default_num_ctx() -> u32 {
    4096
}

fn default_num_predict() -> u32 {
    512
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_p: default_top_p(),
            top_k: default_top_k(),
            repeat_penalty: default_repeat_penalty(),
            num_ctx: default_num_ctx(),
            num_predict: default_num_predict(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_recent_limit")]
    pub recent_limit: usize,
    #[serde(default)]
    pub characters_file: Option<String>,
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_history_limit() -> usize {
    100
}

fn default_recent_limit() -> usize {
    10
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            history_limit: default_history_limit(),
            recent_limit: default_recent_limit(),
            characters_file: None,
        }
    }
}

impl StorageConfig {
    pub fn history_dir(&self) -> PathBuf {
        Path::new(&self.data_dir).join("history")
    }

    pub fn recent_chats_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join("recent_chats.json")
    }

    pub fn characters_path(&self) -> PathBuf {
        match self.characters_file.as_deref() {
            Some(path) if !path.trim().is_empty() => PathBuf::from(path),
            _ => Path::new(&self.data_dir).join("characters.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetConfig {
    /// Directory the web UI serves static files from.
    #[serde(default = "default_public_dir")]
    pub public_dir: String,
    #[serde(default = "default_asset_prefix")]
    pub asset_prefix: String,
    #[serde(default = "default_image")]
    pub default_image: String,
}

fn default_public_dir() -> String {
    "public".to_string()
}

fn default_asset_prefix() -> String {
    "/assets/characters/".to_string()
}

fn default_image() -> String {
    "/assets/characters/placeholder.png".to_string()
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            public_dir: default_public_dir(),
            asset_prefix: default_asset_prefix(),
            default_image: default_image(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    /// How many trailing memory entries are summarized into the prompt.
    #[serde(default = "default_memory_window")]
    pub memory_window: usize,
    /// Assistant turns are cut to this many characters in the summary.
    #[serde(default = "default_assistant_excerpt_chars")]
    pub assistant_excerpt_chars: usize,
    #[serde(default = "default_length_target")]
    pub length_target: String,
}

fn default_memory_window() -> usize {
    5
}

fn default_assistant_excerpt_chars() -> usize {
    100
}

fn default_length_target() -> String {
    "Keep the reply between 2 and 4 short paragraphs".to_string()
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            memory_window: default_memory_window(),
            assistant_excerpt_chars: default_assistant_excerpt_chars(),
            length_target: default_length_target(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,

    // Inference backend (Ollama `/api/generate`)
    #[serde(default = "default_llm_url")]
    pub llm_api_url: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub llm_timeout_secs: u64,
    #[serde(default)]
    pub generation: GenerationOptions,
    #[serde(default)]
    pub enable_system_proxy: bool,

    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub assets: AssetConfig,
}

fn default_bind_addr() -> String {
    "127.0.0.1:5050".to_string()
}

fn default_service_name() -> String {
    "PersonAI LLM Service".to_string()
}

fn default_llm_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_llm_model() -> String {
    "vicuna:latest".to_string()
}

fn default_llm_timeout_secs() -> u64 {
    60
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            service_name: default_service_name(),
            llm_api_url: default_llm_url(),
            llm_model: default_llm_model(),
            llm_timeout_secs: default_llm_timeout_secs(),
            generation: GenerationOptions::default(),
            enable_system_proxy: false,
            prompt: PromptConfig::default(),
            storage: StorageConfig::default(),
            assets: AssetConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Get the directory containing the executable
    fn get_base_dir() -> PathBuf {
        match std::env::current_exe() {
            Ok(exe_path) => exe_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            Err(_) => PathBuf::from("."),
        }
    }

    /// Get the path to the config file (relative to executable)
    pub fn config_path() -> PathBuf {
        Self::get_base_dir().join("personai_config.toml")
    }

    /// Load config from personai_config.toml (next to executable), falling back to the
    /// working directory and finally to defaults + env vars.
    pub fn load() -> Self {
        let candidates = [Self::config_path(), PathBuf::from("personai_config.toml")];

        for path in candidates.iter() {
            let Ok(contents) = fs::read_to_string(path) else {
                continue;
            };
            match toml::from_str::<ServiceConfig>(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {:?}", path);
                    return config.with_env_overrides();
                }
                Err(e) => {
                    tracing::error!("Failed to parse {:?}: {}", path, e);
                }
            }
        }

        tracing::warn!("No config file found, using defaults + env vars");
        Self::from_env()
    }

    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Environment variables win over file values.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(addr) = env::var("PERSONAI_BIND") {
            if !addr.trim().is_empty() {
                self.bind_addr = addr;
            }
        }

        if let Ok(url) = env::var("LLM_API_URL") {
            self.llm_api_url = url;
        }

        if let Ok(model) = env::var("LLM_MODEL") {
            self.llm_model = model;
        }

        if let Ok(timeout) = env::var("LLM_TIMEOUT_SECS") {
            if let Ok(seconds) = timeout.parse() {
                self.llm_timeout_secs = seconds;
            }
        }

        if let Ok(dir) = env::var("PERSONAI_DATA_DIR") {
            if !dir.trim().is_empty() {
                self.storage.data_dir = dir;
            }
        }

        if let Ok(dir) = env::var("PERSONAI_PUBLIC_DIR") {
            if !dir.trim().is_empty() {
                self.assets.public_dir = dir;
            }
        }

        if let Ok(path) = env::var("PERSONAI_CHARACTERS_FILE") {
            if !path.trim().is_empty() {
                self.storage.characters_file = Some(path);
            }
        }

        if let Ok(limit) = env::var("PERSONAI_HISTORY_LIMIT") {
            if let Ok(limit) = limit.parse() {
                self.storage.history_limit = limit;
            }
        }

        if let Ok(limit) = env::var("PERSONAI_RECENT_LIMIT") {
            if let Ok(limit) = limit.parse() {
                self.storage.recent_limit = limit;
            }
        }

        if let Ok(enabled) = env::var("PERSONAI_ENABLE_SYSTEM_PROXY") {
            self.enable_system_proxy = enabled.eq_ignore_ascii_case("1")
                || enabled.eq_ignore_ascii_case("true")
                || enabled.eq_ignore_ascii_case("yes");
        }

        self
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_backend_expectations() {
        let config = ServiceConfig::default();
        assert_eq!(config.llm_model, "vicuna:latest");
        assert_eq!(config.llm_timeout(), Duration::from_secs(60));
        assert_eq!(config.generation.top_k, 40);
        assert_eq!(config.generation.num_ctx, 4096);
        assert_eq!(config.storage.history_limit, 100);
        assert_eq!(config.storage.recent_limit, 10);
        assert_eq!(config.prompt.memory_window, 5);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: ServiceConfig = toml::from_str(
            r#"
            llm_model = "mistral"

            [generation]
            temperature = 0.2

            [storage]
            data_dir = "/var/lib/personai"
            "#,
        )
        .expect("parse config");

        assert_eq!(config.llm_model, "mistral");
        assert_eq!(config.generation.temperature, 0.2);
        assert_eq!(config.generation.top_p, 0.9);
        assert_eq!(config.storage.history_limit, 100);
        assert_eq!(
            config.storage.history_dir(),
            PathBuf::from("/var/lib/personai/history")
        );
        assert_eq!(
            config.storage.characters_path(),
            PathBuf::from("/var/lib/personai/characters.json")
        );
        assert_eq!(config.bind_addr, "127.0.0.1:5050");
    }

    #[test]
    fn timeout_never_drops_to_zero() {
        let config = ServiceConfig {
            llm_timeout_secs: 0,
            ..ServiceConfig::default()
        };
        assert_eq!(config.llm_timeout(), Duration::from_secs(1));
    }
}
