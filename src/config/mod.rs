// flowlink — Workflow automation glue in Rust
// License: Apache-2.0

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("home directory not found")]
    NoHomeDir,
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Process-wide settings, sourced once at startup and handed to connector
/// constructors. Connectors never read the environment themselves.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub openai: OpenAIConfig,
    #[serde(default)]
    pub google_sheets: GoogleSheetsConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub web: WebConfig,
}

// ---------------------------------------------------------------------------
// OpenAI
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_openai_base")]
    pub api_base: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_openai_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub simulate: bool,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: default_openai_base(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_openai_timeout(),
            simulate: false,
        }
    }
}

fn default_openai_base() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_max_tokens() -> u32 {
    150
}
fn default_temperature() -> f64 {
    0.7
}
fn default_openai_timeout() -> u64 {
    60
}

// ---------------------------------------------------------------------------
// Google Sheets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleSheetsConfig {
    #[serde(default = "default_client_secret_file")]
    pub client_secret_file: String,
    #[serde(default = "default_token_file")]
    pub token_file: String,
    #[serde(default = "default_sheets_base")]
    pub api_base: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default = "default_sheets_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub simulate: bool,
}

impl Default for GoogleSheetsConfig {
    fn default() -> Self {
        Self {
            client_secret_file: default_client_secret_file(),
            token_file: default_token_file(),
            api_base: default_sheets_base(),
            token_uri: default_token_uri(),
            timeout_secs: default_sheets_timeout(),
            simulate: false,
        }
    }
}

fn default_client_secret_file() -> String {
    "credentials.json".to_string()
}
fn default_token_file() -> String {
    "token.json".to_string()
}
fn default_sheets_base() -> String {
    "https://sheets.googleapis.com/v4".to_string()
}
fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}
fn default_sheets_timeout() -> u64 {
    30
}

// ---------------------------------------------------------------------------
// Email
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub smtp_user: String,
    #[serde(default)]
    pub smtp_password: String,
    /// Defaults to `smtp_user` when empty.
    #[serde(default)]
    pub sender_email: String,
    #[serde(default = "default_true")]
    pub use_tls: bool,
    #[serde(default = "default_smtp_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub simulate: bool,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: String::new(),
            smtp_port: default_smtp_port(),
            smtp_user: String::new(),
            smtp_password: String::new(),
            sender_email: String::new(),
            use_tls: true,
            timeout_secs: default_smtp_timeout(),
            simulate: false,
        }
    }
}

fn default_smtp_port() -> u16 {
    587
}
fn default_smtp_timeout() -> u64 {
    10
}
fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Engine / Web
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    /// Share one connector instance between actions with the same `connector_id`.
    #[serde(default)]
    pub reuse_connectors: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_web_host")]
    pub host: String,
    #[serde(default = "default_web_port")]
    pub port: u16,
    #[serde(default = "default_workflow_path")]
    pub workflow_path: String,
    /// Origins allowed to call the API from a browser. Empty means same-origin only.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: default_web_host(),
            port: default_web_port(),
            workflow_path: default_workflow_path(),
            allowed_origins: Vec::new(),
        }
    }
}

fn default_web_host() -> String {
    "127.0.0.1".to_string()
}
fn default_web_port() -> u16 {
    5000
}
fn default_workflow_path() -> String {
    "workflows/example.json".to_string()
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a JSON file, falling back to defaults, then
    /// apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            serde_json::from_str(&contents)?
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Config::default()
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// Variable names follow the conventional names used by each service
    /// (`OPENAI_API_KEY`, `SMTP_HOST`, ...).
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // OpenAI
        if let Some(v) = lookup("OPENAI_API_KEY") {
            self.openai.api_key = v;
        }
        if let Some(v) = lookup("OPENAI_API_BASE") {
            self.openai.api_base = v;
        }
        if let Some(v) = lookup("OPENAI_MODEL") {
            self.openai.model = v;
        }
        if let Some(v) = lookup("OPENAI_API_SIMULATE") {
            self.openai.simulate = parse_flag(&v);
        }
        // Google Sheets
        if let Some(v) = lookup("GOOGLE_CLIENT_SECRET_FILE") {
            self.google_sheets.client_secret_file = v;
        }
        if let Some(v) = lookup("GOOGLE_TOKEN_FILE_PATH") {
            self.google_sheets.token_file = v;
        }
        if let Some(v) = lookup("GOOGLE_SHEETS_SIMULATE_API_CALLS") {
            self.google_sheets.simulate = parse_flag(&v);
        }
        // Email
        if let Some(v) = lookup("SMTP_HOST") {
            self.email.smtp_host = v;
        }
        if let Some(v) = lookup("SMTP_PORT") {
            self.email.smtp_port = v.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "SMTP_PORT".into(),
                value: v.clone(),
            })?;
        }
        if let Some(v) = lookup("SMTP_USER") {
            self.email.smtp_user = v;
        }
        if let Some(v) = lookup("SMTP_PASSWORD") {
            self.email.smtp_password = v;
        }
        if let Some(v) = lookup("SENDER_EMAIL") {
            self.email.sender_email = v;
        }
        if let Some(v) = lookup("EMAIL_SIMULATE") {
            self.email.simulate = parse_flag(&v);
        }
        // Engine
        if let Some(v) = lookup("FLOWLINK_REUSE_CONNECTORS") {
            self.engine.reuse_connectors = parse_flag(&v);
        }
        Ok(())
    }

    /// Switch every connector into simulation mode.
    pub fn simulate_all(&mut self) {
        self.openai.simulate = true;
        self.google_sheets.simulate = true;
        self.email.simulate = true;
    }

    /// Get the default config file path: ~/.flowlink/config.json
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(home.join(".flowlink").join("config.json"))
    }

    /// JSON view of the configuration with secrets masked, safe to log.
    pub fn redacted(&self) -> Value {
        json!({
            "openai": {
                "api_key": mask(&self.openai.api_key),
                "api_base": self.openai.api_base,
                "model": self.openai.model,
                "max_tokens": self.openai.max_tokens,
                "temperature": self.openai.temperature,
                "simulate": self.openai.simulate,
            },
            "google_sheets": {
                "client_secret_file": self.google_sheets.client_secret_file,
                "token_file": self.google_sheets.token_file,
                "api_base": self.google_sheets.api_base,
                "simulate": self.google_sheets.simulate,
            },
            "email": {
                "smtp_host": self.email.smtp_host,
                "smtp_port": self.email.smtp_port,
                "smtp_user": self.email.smtp_user,
                "smtp_password": mask(&self.email.smtp_password),
                "sender_email": self.email.sender_email,
                "use_tls": self.email.use_tls,
                "simulate": self.email.simulate,
            },
            "engine": {
                "reuse_connectors": self.engine.reuse_connectors,
            },
            "web": {
                "host": self.web.host,
                "port": self.web.port,
                "workflow_path": self.web.workflow_path,
                "allowed_origins": self.web.allowed_origins,
            },
        })
    }
}

/// Interpret a boolean-ish environment value (`true`, `1`, `yes`).
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes"
    )
}

fn mask(secret: &str) -> &'static str {
    if secret.is_empty() {
        ""
    } else {
        "******"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.openai.model, "gpt-3.5-turbo");
        assert_eq!(cfg.openai.max_tokens, 150);
        assert_eq!(cfg.email.smtp_port, 587);
        assert!(cfg.email.use_tls);
        assert!(!cfg.engine.reuse_connectors);
        assert_eq!(cfg.web.port, 5000);
    }

    #[test]
    fn test_parse_minimal_json() {
        let json = r#"{"openai": {"model": "gpt-4o"}}"#;
        let cfg: Config = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.openai.model, "gpt-4o");
        assert_eq!(cfg.openai.api_base, "https://api.openai.com/v1");
        assert_eq!(cfg.google_sheets.token_file, "token.json");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("OPENAI_API_KEY", "sk-env"),
            ("SMTP_PORT", "465"),
            ("EMAIL_SIMULATE", "TRUE"),
            ("GOOGLE_SHEETS_SIMULATE_API_CALLS", "false"),
        ]
        .into_iter()
        .collect();

        let mut cfg = Config::default();
        cfg.apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(cfg.openai.api_key, "sk-env");
        assert_eq!(cfg.email.smtp_port, 465);
        assert!(cfg.email.simulate);
        assert!(!cfg.google_sheets.simulate);
    }

    #[test]
    fn test_invalid_smtp_port_is_rejected() {
        let mut cfg = Config::default();
        let err = cfg
            .apply_overrides(|k| (k == "SMTP_PORT").then(|| "not-a-port".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("SMTP_PORT"));
    }

    #[test]
    fn test_redacted_masks_secrets() {
        let mut cfg = Config::default();
        cfg.openai.api_key = "sk-secret".into();
        cfg.email.smtp_password = "hunter2".into();

        let view = cfg.redacted().to_string();
        assert!(!view.contains("sk-secret"));
        assert!(!view.contains("hunter2"));
        assert!(view.contains("******"));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = Config::load(&tmp.path().join("nope.json")).unwrap();
        assert_eq!(cfg.web.host, "127.0.0.1");
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("true"));
        assert!(parse_flag(" Yes "));
        assert!(parse_flag("1"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag(""));
    }
}
