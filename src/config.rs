/// Configuration management for PayFlow
///
/// All settings are loaded once from the environment at startup and
/// passed by reference into each component; no ambient lookups from
/// business logic.
use crate::error::{PayflowError, PayflowResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

/// Top-level application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub database: DatabaseConfig,
    pub provider: ProviderConfig,
    pub security: SecurityConfig,
    pub smtp: SmtpConfig,
    pub polling: PollingConfig,
    pub logging: LoggingConfig,
}

/// Inbound HTTP API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

/// Conta Azul OAuth2 and API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub auth_url: String,
    pub token_url: String,
    pub api_base_url: String,
}

/// Security configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Base64-encoded 256-bit master key for token encryption at rest
    pub master_key: String,
}

/// SMTP delivery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
    pub reply_to: Option<String>,
    /// STARTTLS on the submission port (587)
    pub use_starttls: bool,
    /// Implicit TLS (465)
    pub use_ssl: bool,
    pub timeout_secs: u64,
}

/// Polling cycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    pub interval_secs: u64,
    pub initial_lookback_days: i64,
    /// Trailing window subtracted from the checkpoint on every query,
    /// tolerating eventual consistency in the provider
    pub safety_window_minutes: i64,
    /// Customer-name to recipient-email fallback map (JSON object)
    pub recipient_fallback: HashMap<String, String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> PayflowResult<Self> {
        dotenv::dotenv().ok();

        let host = env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("API_PORT")
            .unwrap_or_else(|_| "8000".to_string())
            .parse()
            .map_err(|_| PayflowError::Config("Invalid API_PORT".to_string()))?;

        let database_path: PathBuf = env::var("DATABASE_PATH")
            .unwrap_or_else(|_| "./data/payflow.db".to_string())
            .into();

        let client_id = require("CONTA_AZUL_CLIENT_ID")?;
        let client_secret = require("CONTA_AZUL_CLIENT_SECRET")?;
        let redirect_uri = require("CONTA_AZUL_REDIRECT_URI")?;
        let auth_url = env::var("CONTA_AZUL_AUTH_URL")
            .unwrap_or_else(|_| "https://auth.contaazul.com/login".to_string());
        let token_url = env::var("CONTA_AZUL_TOKEN_URL")
            .unwrap_or_else(|_| "https://auth.contaazul.com/oauth2/token".to_string());
        let api_base_url = env::var("CONTA_AZUL_API_BASE_URL")
            .unwrap_or_else(|_| "https://api-v2.contaazul.com".to_string());

        let master_key = require("MASTER_KEY")?;

        let smtp = SmtpConfig {
            host: require("SMTP_HOST")?,
            port: env::var("SMTP_PORT")
                .unwrap_or_else(|_| "587".to_string())
                .parse()
                .map_err(|_| PayflowError::Config("Invalid SMTP_PORT".to_string()))?,
            username: require("SMTP_USER")?,
            password: require("SMTP_PASSWORD")?,
            from_address: require("SMTP_FROM")?,
            reply_to: env::var("SMTP_REPLY_TO").ok().filter(|s| !s.is_empty()),
            use_starttls: parse_bool("SMTP_USE_TLS", true),
            use_ssl: parse_bool("SMTP_USE_SSL", false),
            timeout_secs: env::var("SMTP_TIMEOUT")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),
        };

        let recipient_fallback: HashMap<String, String> = serde_json::from_str(
            &env::var("RECIPIENTS_FALLBACK_JSON").unwrap_or_else(|_| "{}".to_string()),
        )
        .map_err(|e| PayflowError::Config(format!("Invalid RECIPIENTS_FALLBACK_JSON: {}", e)))?;

        let polling = PollingConfig {
            interval_secs: env::var("POLLING_INTERVAL_SECONDS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .unwrap_or(300),
            initial_lookback_days: env::var("POLLING_INITIAL_LOOKBACK_DAYS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .unwrap_or(30),
            safety_window_minutes: env::var("POLLING_SAFETY_WINDOW_MINUTES")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),
            recipient_fallback,
        };

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Ok(AppConfig {
            api: ApiConfig { host, port },
            database: DatabaseConfig {
                path: database_path,
            },
            provider: ProviderConfig {
                client_id,
                client_secret,
                redirect_uri,
                auth_url,
                token_url,
                api_base_url,
            },
            security: SecurityConfig { master_key },
            smtp,
            polling,
            logging: LoggingConfig { level: log_level },
        })
    }

    /// Validate configuration; failures here are fatal at startup
    pub fn validate(&self) -> PayflowResult<()> {
        if self.provider.client_id.is_empty() || self.provider.client_secret.is_empty() {
            return Err(PayflowError::Config(
                "Provider client credentials cannot be empty".to_string(),
            ));
        }

        use base64::Engine;
        let decoded = base64::engine::general_purpose::URL_SAFE
            .decode(&self.security.master_key)
            .or_else(|_| {
                base64::engine::general_purpose::STANDARD.decode(&self.security.master_key)
            })
            .map_err(|_| PayflowError::Config("MASTER_KEY is not valid base64".to_string()))?;
        if decoded.len() != 32 {
            return Err(PayflowError::Config(format!(
                "MASTER_KEY must decode to 32 bytes, got {}",
                decoded.len()
            )));
        }

        if !self.smtp.from_address.contains('@') {
            return Err(PayflowError::Config(format!(
                "SMTP_FROM is not an email address: {}",
                self.smtp.from_address
            )));
        }

        Ok(())
    }
}

fn require(name: &str) -> PayflowResult<String> {
    env::var(name).map_err(|_| PayflowError::Config(format!("{} is required", name)))
}

fn parse_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
