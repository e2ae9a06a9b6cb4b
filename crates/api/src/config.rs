//! Application configuration loaded from environment variables.

use payments::{CallbackVerifier, MpesaConfig};
use thiserror::Error;

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Errors raised for configuration that cannot be used.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("AUTH_JWT_SECRET must be set")]
    MissingJwtSecret,

    #[error("CALLBACK_HMAC_SECRET or CALLBACK_TOKEN must be set when M-Pesa is configured")]
    MissingCallbackSecret,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` (default `"0.0.0.0"`), `PORT` (default `3000`)
/// - `RUST_LOG` tracing filter (default `"info"`), `LOG_FORMAT` (`json` or text)
/// - `DATABASE_URL`; without it orders are kept in memory
/// - `AUTH_JWT_SECRET`, `AUTH_ISSUER`
/// - `CALLBACK_HMAC_SECRET` or `CALLBACK_TOKEN` for provider callbacks,
///   required once live Daraja credentials are set
/// - `MPESA_*` Daraja credentials; without them payments use the sandbox gateway
/// - `CHARGE_CLAIM_TTL_SECS` (default `120`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub jwt_secret: Option<String>,
    pub jwt_issuer: Option<String>,
    pub callback_token: Option<String>,
    pub callback_hmac_secret: Option<String>,
    pub mpesa: Option<MpesaConfig>,
    pub charge_claim_ttl_secs: i64,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary variable source.
    ///
    /// Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let host = var("HOST").unwrap_or(defaults.host);
        let port = var("PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(defaults.port);

        let mpesa = match (
            var("MPESA_CONSUMER_KEY"),
            var("MPESA_CONSUMER_SECRET"),
            var("MPESA_SHORTCODE"),
            var("MPESA_PASSKEY"),
        ) {
            (Some(key), Some(secret), Some(shortcode), Some(passkey)) => {
                let callback_url = var("MPESA_CALLBACK_URL")
                    .unwrap_or_else(|| format!("http://{host}:{port}/payments/mpesa/callback"));
                let config = MpesaConfig::new(key, secret, shortcode, passkey, callback_url);
                Some(match var("MPESA_BASE_URL") {
                    Some(base_url) => config.with_base_url(base_url),
                    None => config,
                })
            }
            _ => None,
        };

        Self {
            log_level: var("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match var("LOG_FORMAT").as_deref() {
                Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            database_url: var("DATABASE_URL"),
            jwt_secret: var("AUTH_JWT_SECRET"),
            jwt_issuer: var("AUTH_ISSUER"),
            callback_token: var("CALLBACK_TOKEN"),
            callback_hmac_secret: var("CALLBACK_HMAC_SECRET"),
            mpesa,
            charge_claim_ttl_secs: var("CHARGE_CLAIM_TTL_SECS")
                .and_then(|v| v.parse().ok())
                .filter(|secs: &i64| *secs > 0)
                .unwrap_or(defaults.charge_claim_ttl_secs),
            host,
            port,
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the secret bearer tokens are signed with.
    pub fn require_jwt_secret(&self) -> Result<&str, ConfigError> {
        self.jwt_secret
            .as_deref()
            .ok_or(ConfigError::MissingJwtSecret)
    }

    /// Builds the callback verifier; an HMAC secret wins over a shared token.
    pub fn callback_verifier(&self) -> CallbackVerifier {
        match (&self.callback_hmac_secret, &self.callback_token) {
            (Some(secret), _) => CallbackVerifier::HmacSha256(secret.clone()),
            (None, Some(token)) => CallbackVerifier::SharedToken(token.clone()),
            (None, None) => CallbackVerifier::Disabled,
        }
    }

    /// Builds the callback verifier, refusing to accept unauthenticated
    /// callbacks while a live provider is configured.
    pub fn require_callback_verifier(&self) -> Result<CallbackVerifier, ConfigError> {
        let verifier = self.callback_verifier();
        if self.mpesa.is_some() && !verifier.is_enabled() {
            return Err(ConfigError::MissingCallbackSecret);
        }
        Ok(verifier)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            jwt_secret: None,
            jwt_issuer: None,
            callback_token: None,
            callback_hmac_secret: None,
            mpesa: None,
            charge_claim_ttl_secs: 120,
        }
    }
}
