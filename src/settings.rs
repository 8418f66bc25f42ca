use figment::{
    providers::{Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct StripeSettings {
    pub api_key: String,
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub stripe_version: String,
    #[serde(default = "default_stripe_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_stripe_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub webhook_secret: String,
    #[serde(default = "default_webhook_tolerance_seconds")]
    pub webhook_tolerance_seconds: i64,
}

impl Default for StripeSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            account_id: String::new(),
            stripe_version: String::new(),
            timeout_ms: default_stripe_timeout_ms(),
            max_retries: default_stripe_max_retries(),
            webhook_secret: String::new(),
            webhook_tolerance_seconds: default_webhook_tolerance_seconds(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub stripe: StripeSettings,
    pub server_port: u16,
    pub database_path: String,
    /// Upper bound for a single gateway operation, retries included.
    #[serde(default = "default_gateway_timeout", with = "humantime_serde")]
    pub gateway_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stripe: StripeSettings::default(),
            server_port: 3004,
            database_path: "data/payments.redb".to_string(),
            gateway_timeout: default_gateway_timeout(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("STRIPE_SECRET_KEY is not set")]
    MissingSecretKey,
    #[error("STRIPE_WEBHOOK_SECRET is not set")]
    MissingWebhookSecret,
    #[error("gateway timeout must be greater than zero")]
    ZeroGatewayTimeout,
}

impl Config {
    /// Load from config.toml (if present) and environment variables.
    /// Environment variables override file values.
    /// Supported env keys: STRIPE_SECRET_KEY (or STRIPE_API_KEY), STRIPE_ACCOUNT_ID,
    /// STRIPE_VERSION, STRIPE_TIMEOUT_MS, STRIPE_MAX_RETRIES, STRIPE_WEBHOOK_SECRET,
    /// STRIPE_WEBHOOK_TOLERANCE_SECONDS, PORT, DATABASE_PATH, GATEWAY_TIMEOUT
    pub fn load() -> Self {
        let base: Config = Default::default();
        let mut fig = Figment::from(Serialized::defaults(base));
        if std::path::Path::new("config.toml").exists() {
            fig = fig.merge(Toml::file("config.toml"));
        }
        let mut cfg: Config = fig.extract().unwrap_or_default();

        if let Ok(v) = std::env::var("STRIPE_API_KEY") {
            cfg.stripe.api_key = v;
        }
        if let Ok(v) = std::env::var("STRIPE_SECRET_KEY") {
            cfg.stripe.api_key = v;
        }
        if let Ok(v) = std::env::var("STRIPE_ACCOUNT_ID") {
            cfg.stripe.account_id = v;
        }
        if let Ok(v) = std::env::var("STRIPE_VERSION") {
            cfg.stripe.stripe_version = v;
        }
        if let Ok(v) = std::env::var("STRIPE_TIMEOUT_MS") {
            cfg.stripe.timeout_ms = v.parse().unwrap_or(cfg.stripe.timeout_ms);
        }
        if let Ok(v) = std::env::var("STRIPE_MAX_RETRIES") {
            cfg.stripe.max_retries = v.parse().unwrap_or(cfg.stripe.max_retries);
        }
        if let Ok(v) = std::env::var("STRIPE_WEBHOOK_SECRET") {
            cfg.stripe.webhook_secret = v;
        }
        if let Ok(v) = std::env::var("STRIPE_WEBHOOK_TOLERANCE_SECONDS") {
            cfg.stripe.webhook_tolerance_seconds =
                v.parse().unwrap_or(cfg.stripe.webhook_tolerance_seconds);
        }
        if let Ok(v) = std::env::var("PORT") {
            cfg.server_port = v.parse().unwrap_or(cfg.server_port);
        }
        if let Ok(v) = std::env::var("DATABASE_PATH") {
            cfg.database_path = v;
        }
        if let Ok(v) = std::env::var("GATEWAY_TIMEOUT") {
            cfg.gateway_timeout = parse_duration_env(&v, cfg.gateway_timeout);
        }

        cfg
    }

    /// Reject configurations the service cannot run with, before any client is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stripe.api_key.trim().is_empty() {
            return Err(ConfigError::MissingSecretKey);
        }
        if self.stripe.webhook_secret.trim().is_empty() {
            return Err(ConfigError::MissingWebhookSecret);
        }
        if self.gateway_timeout.is_zero() {
            return Err(ConfigError::ZeroGatewayTimeout);
        }
        Ok(())
    }
}

fn parse_duration_env(value: &str, current: Duration) -> Duration {
    humantime::parse_duration(value).unwrap_or(current)
}

fn default_stripe_timeout_ms() -> u64 {
    15_000
}

fn default_stripe_max_retries() -> u32 {
    3
}

fn default_webhook_tolerance_seconds() -> i64 {
    300 // 5 minutes
}

fn default_gateway_timeout() -> Duration {
    Duration::from_secs(20)
}
