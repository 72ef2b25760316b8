use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::Validation(_) => None,
        }
    }
}

/// Which LLM API answers prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Gemini,
    #[default]
    Groq,
    Ollama,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Gemini => "gemini",
            Provider::Groq => "groq",
            Provider::Ollama => "ollama",
        }
    }
}

/// Connection parameters for the optional remote row store. Absent means
/// local file persistence.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteStoreConfig {
    pub url: String,
    pub api_key: String,
}

#[derive(Deserialize)]
struct ConfigFile {
    telegram_bot_token: String,
    /// Display name of the privileged admin (leading @ optional).
    admin: String,
    /// Requests allowed per window. Deployments run 30 or 50.
    #[serde(default = "default_ceiling")]
    request_ceiling: u32,
    #[serde(default = "default_window")]
    window_secs: i64,
    /// Conversation entries kept per user.
    #[serde(default = "default_history")]
    history_limit: usize,
    #[serde(default)]
    provider: Provider,
    #[serde(default)]
    gemini_api_key: String,
    #[serde(default)]
    groq_api_key: String,
    #[serde(default = "default_ollama_url")]
    ollama_url: String,
    #[serde(default = "default_ollama_model")]
    ollama_model: String,
    /// Directory for state files (logs, counters, conversations).
    data_dir: Option<String>,
    remote_store: Option<RemoteStoreConfig>,
}

fn default_ceiling() -> u32 {
    30
}

fn default_window() -> i64 {
    1800
}

fn default_history() -> usize {
    30
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "llama3.2:1b".to_string()
}

pub struct Config {
    pub telegram_bot_token: String,
    pub admin: String,
    pub request_ceiling: u32,
    pub window_secs: i64,
    pub history_limit: usize,
    pub provider: Provider,
    pub gemini_api_key: String,
    pub groq_api_key: String,
    pub ollama_url: String,
    pub ollama_model: String,
    pub data_dir: PathBuf,
    pub remote_store: Option<RemoteStoreConfig>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        // Validate required fields
        if file.telegram_bot_token.is_empty() {
            return Err(ConfigError::Validation("telegram_bot_token is required".into()));
        }
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = file.telegram_bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(
                "telegram_bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into()
            ));
        }
        if file.admin.trim_start_matches('@').is_empty() {
            return Err(ConfigError::Validation("admin is required".into()));
        }
        if file.request_ceiling == 0 {
            return Err(ConfigError::Validation("request_ceiling must be at least 1".into()));
        }
        match file.provider {
            Provider::Gemini if file.gemini_api_key.is_empty() => {
                return Err(ConfigError::Validation(
                    "gemini_api_key is required for the gemini provider".into(),
                ));
            }
            Provider::Groq if file.groq_api_key.is_empty() => {
                return Err(ConfigError::Validation(
                    "groq_api_key is required for the groq provider".into(),
                ));
            }
            _ => {}
        }

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            telegram_bot_token: file.telegram_bot_token,
            admin: file.admin,
            request_ceiling: file.request_ceiling,
            window_secs: file.window_secs,
            history_limit: file.history_limit,
            provider: file.provider,
            gemini_api_key: file.gemini_api_key,
            groq_api_key: file.groq_api_key,
            ollama_url: file.ollama_url,
            ollama_model: file.ollama_model,
            data_dir,
            remote_store: file.remote_store,
        })
    }

    pub fn is_admin(&self, display_name: &str) -> bool {
        admin_matches(display_name, &self.admin)
    }
}

/// Compare display names ignoring a leading `@` on either side.
pub fn admin_matches(name: &str, admin: &str) -> bool {
    name.trim_start_matches('@') == admin.trim_start_matches('@')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn assert_err<T>(result: Result<T, ConfigError>) -> ConfigError {
        match result {
            Ok(_) => panic!("expected error, got Ok"),
            Err(e) => e,
        }
    }

    #[test]
    fn test_valid_config_with_defaults() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdefGHIjklMNOpqrsTUVwxyz",
            "admin": "@GustyxPower",
            "groq_api_key": "gsk_test"
        }"#);
        let config = Config::load(file.path()).expect("should load valid config");
        assert_eq!(config.admin, "@GustyxPower");
        assert_eq!(config.request_ceiling, 30);
        assert_eq!(config.window_secs, 1800);
        assert_eq!(config.history_limit, 30);
        assert_eq!(config.provider, Provider::Groq);
        assert!(config.remote_store.is_none());
    }

    #[test]
    fn test_explicit_ceiling_and_provider() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdef",
            "admin": "boss",
            "request_ceiling": 50,
            "provider": "ollama",
            "window_secs": 600
        }"#);
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.request_ceiling, 50);
        assert_eq!(config.window_secs, 600);
        assert_eq!(config.provider, Provider::Ollama);
        assert_eq!(config.ollama_url, "http://localhost:11434");
    }

    #[test]
    fn test_remote_store_config() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdef",
            "admin": "boss",
            "groq_api_key": "k",
            "remote_store": { "url": "https://example.supabase.co", "api_key": "anon" }
        }"#);
        let config = Config::load(file.path()).unwrap();
        let remote = config.remote_store.expect("remote store should be set");
        assert_eq!(remote.url, "https://example.supabase.co");
    }

    #[test]
    fn test_empty_token() {
        let file = write_config(r#"{
            "telegram_bot_token": "",
            "admin": "boss"
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("telegram_bot_token"));
    }

    #[test]
    fn test_invalid_token_format_no_colon() {
        let file = write_config(r#"{
            "telegram_bot_token": "invalid_token_no_colon",
            "admin": "boss"
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("invalid"));
    }

    #[test]
    fn test_invalid_token_format_non_numeric_id() {
        let file = write_config(r#"{
            "telegram_bot_token": "notanumber:ABCdef",
            "admin": "boss"
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_missing_admin() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdef",
            "admin": "@"
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("admin"));
    }

    #[test]
    fn test_provider_requires_its_key() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdef",
            "admin": "boss",
            "provider": "gemini"
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(err.to_string().contains("gemini_api_key"));
    }

    #[test]
    fn test_zero_ceiling_rejected() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdef",
            "admin": "boss",
            "groq_api_key": "k",
            "request_ceiling": 0
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_file_not_found() {
        let err = assert_err(Config::load("/nonexistent/path/config.json"));
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_invalid_json() {
        let file = write_config("{ invalid json }");
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::ParseJson { .. }));
    }

    #[test]
    fn test_admin_matches_ignores_at() {
        assert!(admin_matches("GustyxPower", "@GustyxPower"));
        assert!(admin_matches("@GustyxPower", "GustyxPower"));
        assert!(!admin_matches("someone", "@GustyxPower"));
    }
}
