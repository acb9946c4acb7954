//! Configuration types, built from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::{LlmBackend, LlmConfig};

/// Default database location.
pub const DEFAULT_DB_PATH: &str = "./data/rfp-intake.db";

/// Top-level application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    /// `None` when `IMAP_HOST` is unset (listener disabled).
    pub imap: Option<ImapConfig>,
    pub intake: IntakeConfig,
    /// Directory for rolling log files; stderr only when unset.
    pub log_dir: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let db_path = std::env::var("RFP_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DB_PATH));

        Ok(Self {
            db_path,
            imap: ImapConfig::from_env()?,
            intake: IntakeConfig::from_env(),
            log_dir: std::env::var("RFP_LOG_DIR").ok().map(PathBuf::from),
        })
    }
}

/// IMAP mailbox configuration.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub mailbox: String,
    pub poll_interval: Duration,
    /// Socket read timeout for a single IMAP session.
    pub timeout: Duration,
}

impl ImapConfig {
    /// Build from environment variables.
    /// Returns `Ok(None)` if `IMAP_HOST` is not set.
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let Ok(host) = std::env::var("IMAP_HOST") else {
            return Ok(None);
        };

        let port = parse_env("IMAP_PORT", 993_u16)?;

        let username = std::env::var("IMAP_USER").map_err(|_| ConfigError::MissingRequired {
            key: "IMAP_USER".into(),
            hint: "Set IMAP_USER and IMAP_PASSWORD to enable the proposal listener".into(),
        })?;
        let password = std::env::var("IMAP_PASSWORD").map_err(|_| ConfigError::MissingRequired {
            key: "IMAP_PASSWORD".into(),
            hint: "Set IMAP_USER and IMAP_PASSWORD to enable the proposal listener".into(),
        })?;

        let mailbox = std::env::var("IMAP_MAILBOX").unwrap_or_else(|_| "INBOX".to_string());
        let poll_secs = parse_env("IMAP_POLL_INTERVAL_SECS", 60_u64)?;
        let timeout_secs = parse_env("IMAP_TIMEOUT_SECS", 30_u64)?;

        if poll_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "IMAP_POLL_INTERVAL_SECS".into(),
                message: "must be greater than zero".into(),
            });
        }

        Ok(Some(Self {
            host,
            port,
            username,
            password: SecretString::from(password),
            mailbox,
            poll_interval: Duration::from_secs(poll_secs),
            timeout: Duration::from_secs(timeout_secs),
        }))
    }
}

/// Proposal-ingestion tuning.
#[derive(Debug, Clone)]
pub struct IntakeConfig {
    /// Maximum characters of email body sent to the parser.
    pub max_body_chars: usize,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            max_body_chars: 8000,
        }
    }
}

impl IntakeConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_body_chars: std::env::var("INTAKE_MAX_BODY_CHARS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_body_chars),
        }
    }
}

/// Build the LLM configuration. Only required by commands that call the model.
pub fn llm_config_from_env() -> Result<LlmConfig, ConfigError> {
    let backend = match std::env::var("LLM_BACKEND")
        .unwrap_or_else(|_| "anthropic".to_string())
        .to_lowercase()
        .as_str()
    {
        "anthropic" => LlmBackend::Anthropic,
        "openai" => LlmBackend::OpenAi,
        other => {
            return Err(ConfigError::InvalidValue {
                key: "LLM_BACKEND".into(),
                message: format!("unknown backend '{other}' (expected anthropic or openai)"),
            });
        }
    };

    let key_var = match backend {
        LlmBackend::Anthropic => "ANTHROPIC_API_KEY",
        LlmBackend::OpenAi => "OPENAI_API_KEY",
    };
    let api_key =
        std::env::var(key_var).map_err(|_| ConfigError::MissingEnvVar(key_var.to_string()))?;

    let model = std::env::var("RFP_MODEL").unwrap_or_else(|_| backend.default_model().to_string());

    Ok(LlmConfig {
        backend,
        api_key: SecretString::from(api_key),
        model,
    })
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("cannot parse '{raw}'"),
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intake_defaults() {
        let config = IntakeConfig::default();
        assert_eq!(config.max_body_chars, 8000);
    }

    #[test]
    fn parse_env_falls_back_to_default() {
        let value: u64 = parse_env("RFP_INTAKE_TEST_UNSET_VAR", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn parse_env_rejects_garbage() {
        // SAFETY: the variable name is unique to this test.
        unsafe { std::env::set_var("RFP_INTAKE_TEST_BAD_PORT", "not-a-port") };
        let result: Result<u16, _> = parse_env("RFP_INTAKE_TEST_BAD_PORT", 993);
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
        unsafe { std::env::remove_var("RFP_INTAKE_TEST_BAD_PORT") };
    }
}
