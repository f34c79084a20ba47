//! Configuration
//!
//! Generation parameters, streaming limits and engine connection settings.
//! The conductor receives a [`ChatConfig`] by value at construction time; there
//! is no process-wide configuration singleton.
//!
//! # Configuration Priority
//!
//! Values are resolved with the following priority (highest first):
//! 1. Environment variables
//! 2. TOML configuration file
//! 3. Default values
//!
//! # XDG Base Directory Compliance
//!
//! The configuration file lives at
//! `$XDG_CONFIG_HOME/chat-conductor/config.toml` (typically
//! `~/.config/chat-conductor/config.toml`).
//!
//! # Example Configuration
//!
//! ```toml
//! [generation]
//! max_completion_tokens = 10240
//! max_prompt_tokens = 20480
//! temperature = 0.1
//! top_p = 0.1
//!
//! [streaming]
//! response_timeout_secs = 30
//! truncation_last_messages = 5
//! queue_warning_threshold = 100
//!
//! [tools]
//! rls_tool_server_label = "SalesAnalysisMcpServer"
//!
//! [engine]
//! endpoint = "https://example.services.ai.azure.com/api/projects/demo"
//! api_version = "v1"
//! agent_id = "asst_123"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Runtime Configuration
// =============================================================================

/// Settings consumed by the chat conductor
#[derive(Clone, Debug, PartialEq)]
pub struct ChatConfig {
    /// Completion token budget per run
    pub max_completion_tokens: Option<u32>,
    /// Prompt token budget per run
    pub max_prompt_tokens: Option<u32>,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Nucleus sampling mass
    pub top_p: Option<f32>,
    /// Maximum wait for the next stream item
    pub response_timeout: Duration,
    /// Number of trailing thread messages sent to the engine per run
    pub truncation_last_messages: u32,
    /// Handoff queue depth above which a warning is logged
    pub queue_warning_threshold: usize,
    /// How long cleanup waits for a cancelled producer before aborting it
    pub producer_shutdown_grace: Duration,
    /// Label of the tool server that receives the RLS header
    pub rls_tool_server_label: String,
    /// Header carrying the RLS principal to that tool server
    pub rls_header_name: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_completion_tokens: Some(10240),
            max_prompt_tokens: Some(20480),
            temperature: Some(0.1),
            top_p: Some(0.1),
            response_timeout: Duration::from_secs(30),
            truncation_last_messages: 5,
            queue_warning_threshold: 100,
            producer_shutdown_grace: Duration::from_secs(5),
            rls_tool_server_label: "SalesAnalysisMcpServer".to_string(),
            rls_header_name: "x-rls-user-id".to_string(),
        }
    }
}

impl ChatConfig {
    /// Defaults overridden by environment variables
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Set the per-item response timeout
    #[must_use]
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Set the truncation window
    #[must_use]
    pub fn with_truncation_last_messages(mut self, count: u32) -> Self {
        self.truncation_last_messages = count;
        self
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(ConfigError::ValidationError(format!(
                    "temperature must be within 0.0..=2.0, got {t}"
                )));
            }
        }
        if let Some(p) = self.top_p {
            if !(0.0..=1.0).contains(&p) {
                return Err(ConfigError::ValidationError(format!(
                    "top_p must be within 0.0..=1.0, got {p}"
                )));
            }
        }
        if self.response_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "response_timeout_secs must be positive".to_string(),
            ));
        }
        if self.truncation_last_messages == 0 {
            return Err(ConfigError::ValidationError(
                "truncation_last_messages must be positive".to_string(),
            ));
        }
        if self.rls_header_name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "rls_header_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    fn apply_toml(&mut self, file: &ConfigToml) {
        let g = &file.generation;
        if g.max_completion_tokens.is_some() {
            self.max_completion_tokens = g.max_completion_tokens;
        }
        if g.max_prompt_tokens.is_some() {
            self.max_prompt_tokens = g.max_prompt_tokens;
        }
        if g.temperature.is_some() {
            self.temperature = g.temperature;
        }
        if g.top_p.is_some() {
            self.top_p = g.top_p;
        }

        let s = &file.streaming;
        if let Some(secs) = s.response_timeout_secs {
            self.response_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = s.truncation_last_messages {
            self.truncation_last_messages = n;
        }
        if let Some(n) = s.queue_warning_threshold {
            self.queue_warning_threshold = n;
        }
        if let Some(ms) = s.producer_shutdown_grace_ms {
            self.producer_shutdown_grace = Duration::from_millis(ms);
        }

        if let Some(ref label) = file.tools.rls_tool_server_label {
            self.rls_tool_server_label.clone_from(label);
        }
        if let Some(ref header) = file.tools.rls_header_name {
            self.rls_header_name.clone_from(header);
        }
    }

    fn apply_env(&mut self) {
        if let Some(v) = env_parse("CHAT_MAX_COMPLETION_TOKENS") {
            self.max_completion_tokens = Some(v);
        }
        if let Some(v) = env_parse("CHAT_MAX_PROMPT_TOKENS") {
            self.max_prompt_tokens = Some(v);
        }
        if let Some(v) = env_parse("CHAT_TEMPERATURE") {
            self.temperature = Some(v);
        }
        if let Some(v) = env_parse("CHAT_TOP_P") {
            self.top_p = Some(v);
        }
        if let Some(v) = env_parse("CHAT_RESPONSE_TIMEOUT_SECS") {
            self.response_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_parse("CHAT_TRUNCATION_LAST_MESSAGES") {
            self.truncation_last_messages = v;
        }
        if let Some(v) = env_parse("CHAT_QUEUE_WARNING_THRESHOLD") {
            self.queue_warning_threshold = v;
        }
        if let Ok(v) = std::env::var("CHAT_RLS_TOOL_SERVER_LABEL") {
            self.rls_tool_server_label = v;
        }
    }
}

/// Connection settings for the HTTP agent engine
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineSettings {
    /// Project endpoint, without a trailing slash
    pub endpoint: String,
    /// Value of the `api-version` query parameter
    pub api_version: String,
    /// Bearer token
    pub api_key: Option<String>,
    /// Agent to run against
    pub agent_id: Option<String>,
    /// Timeout for non-streaming calls
    pub request_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080".to_string(),
            api_version: "v1".to_string(),
            api_key: None,
            agent_id: None,
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl EngineSettings {
    fn apply_toml(&mut self, engine: &EngineToml) {
        if let Some(ref endpoint) = engine.endpoint {
            self.endpoint = endpoint.trim_end_matches('/').to_string();
        }
        if let Some(ref version) = engine.api_version {
            self.api_version.clone_from(version);
        }
        if engine.agent_id.is_some() {
            self.agent_id.clone_from(&engine.agent_id);
        }
        if let Some(secs) = engine.request_timeout_secs {
            self.request_timeout = Duration::from_secs(secs);
        }
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("CHAT_ENGINE_ENDPOINT") {
            self.endpoint = v.trim_end_matches('/').to_string();
        }
        if let Ok(v) = std::env::var("CHAT_ENGINE_API_VERSION") {
            self.api_version = v;
        }
        if let Ok(v) = std::env::var("CHAT_ENGINE_API_KEY") {
            self.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("CHAT_AGENT_ID") {
            self.agent_id = Some(v);
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[generation]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationToml {
    /// Completion token budget
    pub max_completion_tokens: Option<u32>,
    /// Prompt token budget
    pub max_prompt_tokens: Option<u32>,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Nucleus sampling mass
    pub top_p: Option<f32>,
}

/// `[streaming]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingToml {
    /// Per-item response timeout in seconds
    pub response_timeout_secs: Option<u64>,
    /// Truncation window in messages
    pub truncation_last_messages: Option<u32>,
    /// Queue depth warning threshold
    pub queue_warning_threshold: Option<usize>,
    /// Producer shutdown grace in milliseconds
    pub producer_shutdown_grace_ms: Option<u64>,
}

/// `[tools]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsToml {
    /// Tool server label receiving the RLS header
    pub rls_tool_server_label: Option<String>,
    /// RLS header name
    pub rls_header_name: Option<String>,
}

/// `[engine]` section (the API key is only read from the environment)
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineToml {
    /// Project endpoint
    pub endpoint: Option<String>,
    /// API version
    pub api_version: Option<String>,
    /// Agent identifier
    pub agent_id: Option<String>,
    /// Timeout for non-streaming calls in seconds
    pub request_timeout_secs: Option<u64>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigToml {
    /// Generation parameters
    pub generation: GenerationToml,
    /// Streaming limits
    pub streaming: StreamingToml,
    /// Request-scoped tool settings
    pub tools: ToolsToml,
    /// Engine connection
    pub engine: EngineToml,
}

// =============================================================================
// Loading
// =============================================================================

/// Fully resolved configuration
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LoadedConfig {
    /// Conductor settings
    pub chat: ChatConfig,
    /// Engine client settings
    pub engine: EngineSettings,
    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,
}

/// Default configuration file location
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("chat-conductor").join("config.toml"))
}

/// Load configuration from the default path, falling back to defaults when no
/// file exists, then apply environment overrides
pub fn load_config() -> Result<LoadedConfig, ConfigError> {
    match default_config_path() {
        Some(path) if path.exists() => load_config_from_path(&path),
        _ => {
            let mut loaded = LoadedConfig::default();
            loaded.chat.apply_env();
            loaded.engine.apply_env();
            loaded.chat.validate()?;
            Ok(loaded)
        }
    }
}

/// Load configuration from a specific TOML file, then apply environment overrides
pub fn load_config_from_path(path: &Path) -> Result<LoadedConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;

    let mut loaded = parse_config(&content)?;
    loaded.config_file_path = Some(path.to_path_buf());
    loaded.chat.apply_env();
    loaded.engine.apply_env();
    loaded.chat.validate()?;

    tracing::debug!(path = %path.display(), "Loaded configuration file");
    Ok(loaded)
}

/// Parse TOML text over the defaults (no environment overrides)
pub fn parse_config(content: &str) -> Result<LoadedConfig, ConfigError> {
    let file: ConfigToml = toml::from_str(content)?;
    let mut loaded = LoadedConfig::default();
    loaded.chat.apply_toml(&file);
    loaded.engine.apply_toml(&file.engine);
    loaded.chat.validate()?;
    Ok(loaded)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparseable environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ChatConfig::default();
        assert_eq!(config.response_timeout, Duration::from_secs(30));
        assert_eq!(config.truncation_last_messages, 5);
        assert_eq!(config.queue_warning_threshold, 100);
        assert_eq!(config.rls_header_name, "x-rls-user-id");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_toml() {
        let loaded = parse_config(
            r#"
            [generation]
            temperature = 0.7

            [streaming]
            response_timeout_secs = 5
            truncation_last_messages = 8

            [engine]
            endpoint = "https://agents.example.com/api/"
            agent_id = "asst_1"
            "#,
        )
        .unwrap();

        assert_eq!(loaded.chat.temperature, Some(0.7));
        assert_eq!(loaded.chat.top_p, Some(0.1));
        assert_eq!(loaded.chat.response_timeout, Duration::from_secs(5));
        assert_eq!(loaded.chat.truncation_last_messages, 8);
        assert_eq!(loaded.engine.endpoint, "https://agents.example.com/api");
        assert_eq!(loaded.engine.agent_id.as_deref(), Some("asst_1"));
    }

    #[test]
    fn test_empty_toml_is_defaults() {
        let loaded = parse_config("").unwrap();
        assert_eq!(loaded.chat, ChatConfig::default());
        assert_eq!(loaded.engine, EngineSettings::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = parse_config("[generation]\ntop_p = 1.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));

        let err = parse_config("[streaming]\nresponse_timeout_secs = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_malformed_toml() {
        let err = parse_config("[generation\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_load_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[streaming]\nqueue_warning_threshold = 7").unwrap();

        let loaded = load_config_from_path(file.path()).unwrap();
        assert_eq!(loaded.chat.queue_warning_threshold, 7);
        assert_eq!(loaded.config_file_path.as_deref(), Some(file.path()));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = load_config_from_path(Path::new("/nonexistent/chat-conductor.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }

    #[test]
    fn test_builders() {
        let config = ChatConfig::default()
            .with_response_timeout(Duration::from_millis(250))
            .with_truncation_last_messages(3);
        assert_eq!(config.response_timeout, Duration::from_millis(250));
        assert_eq!(config.truncation_last_messages, 3);
    }
}
