use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB connect timeout (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,

    /// Shared secret of the identity provider used to sign session tokens
    #[validate(length(min = 32), custom = "validate_jwt_secret")]
    pub jwt_secret: String,

    /// Expected `iss` claim
    #[serde(default = "default_auth_issuer")]
    pub auth_issuer: String,

    /// Expected `aud` claim
    #[serde(default = "default_auth_audience")]
    pub auth_audience: String,

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Payment provider REST base URL
    #[serde(default = "default_provider_base_url")]
    #[validate(url)]
    pub payment_provider_base_url: String,

    /// Payment provider access token (bearer credential)
    #[serde(default)]
    pub payment_provider_access_token: Option<String>,

    /// Timeout applied to every outbound provider call
    #[serde(default = "default_provider_timeout_secs")]
    #[validate(range(min = 1, max = 120))]
    pub payment_provider_timeout_secs: u64,

    /// Lifetime of a hosted payment session
    #[serde(default = "default_session_expiry_minutes")]
    #[validate(range(min = 1, max = 1440))]
    pub payment_session_expiry_minutes: i64,

    /// ISO currency billed by the provider
    #[serde(default = "default_currency")]
    #[validate(length(equal = 3))]
    pub payment_currency: String,

    /// Public URL of the storefront, used to build redirect and notification URLs
    #[validate(url)]
    pub public_base_url: String,

    /// HMAC secret for inbound provider webhooks; verification is skipped when unset
    #[serde(default)]
    pub webhook_secret: Option<String>,

    /// Allowed clock skew for signed webhooks (seconds)
    #[serde(default = "default_webhook_tolerance_secs")]
    pub webhook_tolerance_secs: u64,

    /// Prefix of human-facing order numbers
    #[serde(default = "default_order_number_prefix")]
    #[validate(length(min = 1, max = 10))]
    pub order_number_prefix: String,

    /// TTL of the display-only receipt snapshots
    #[serde(default = "default_receipt_cache_ttl_secs")]
    pub receipt_cache_ttl_secs: u64,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    #[validate(range(min = 1))]
    pub event_channel_capacity: usize,
}

impl AppConfig {
    /// Creates a configuration with defaults for every optional setting
    pub fn new(
        database_url: String,
        jwt_secret: String,
        host: String,
        port: u16,
        environment: String,
        public_base_url: String,
    ) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            jwt_secret,
            auth_issuer: default_auth_issuer(),
            auth_audience: default_auth_audience(),
            cors_allowed_origins: None,
            payment_provider_base_url: default_provider_base_url(),
            payment_provider_access_token: None,
            payment_provider_timeout_secs: default_provider_timeout_secs(),
            payment_session_expiry_minutes: default_session_expiry_minutes(),
            payment_currency: default_currency(),
            public_base_url,
            webhook_secret: None,
            webhook_tolerance_secs: default_webhook_tolerance_secs(),
            order_number_prefix: default_order_number_prefix(),
            receipt_cache_ttl_secs: default_receipt_cache_ttl_secs(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.payment_provider_timeout_secs)
    }

    pub fn receipt_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.receipt_cache_ttl_secs)
    }

    /// Absolute URL of a storefront path, e.g. `checkout/success`.
    pub fn public_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.public_base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Checks that only make sense across fields or environments.
    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.is_production() {
            if self
                .payment_provider_access_token
                .as_deref()
                .map_or(true, |t| t.trim().is_empty())
            {
                let mut err = ValidationError::new("payment_provider_access_token");
                err.message = Some("A provider access token is required in production".into());
                errors.add("payment_provider_access_token", err);
            }

            if self.webhook_secret.is_none() {
                let mut err = ValidationError::new("webhook_secret");
                err.message = Some("Webhook signatures must be verified in production".into());
                errors.add("webhook_secret", err);
            }
        }

        if self.db_min_connections > self.db_max_connections {
            let mut err = ValidationError::new("db_min_connections");
            err.message = Some("db_min_connections cannot exceed db_max_connections".into());
            errors.add("db_min_connections", err);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_min_connections() -> u32 {
    1
}

fn default_db_connect_timeout_secs() -> u64 {
    30
}

fn default_auth_issuer() -> String {
    "storefront-auth".to_string()
}

fn default_auth_audience() -> String {
    "authenticated".to_string()
}

fn default_provider_base_url() -> String {
    "https://api.mercadopago.com".to_string()
}

fn default_provider_timeout_secs() -> u64 {
    15
}

fn default_session_expiry_minutes() -> i64 {
    30
}

fn default_currency() -> String {
    "ARS".to_string()
}

fn default_webhook_tolerance_secs() -> u64 {
    300
}

fn default_order_number_prefix() -> String {
    "ORD".to_string()
}

fn default_receipt_cache_ttl_secs() -> u64 {
    24 * 3600
}

fn default_event_channel_capacity() -> usize {
    1024
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_jwt_secret(secret: &str) -> Result<(), ValidationError> {
    const DISALLOWED: [&str; 3] = [
        "CHANGE_THIS_SECRET_IN_PRODUCTION",
        "your-secret-key",
        "default-secret-key",
    ];
    let trimmed = secret.trim();
    let unique_chars: std::collections::HashSet<char> = trimmed.chars().collect();

    let message = if DISALLOWED.iter().any(|&bad| trimmed.eq_ignore_ascii_case(bad)) {
        "JWT secret must be overridden with a secure random value"
    } else if unique_chars.len() < 10 {
        "JWT secret must have at least 10 unique characters"
    } else {
        return Ok(());
    };

    let mut err = ValidationError::new("jwt_secret");
    err.message = Some(message.into());
    Err(err)
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("storefront_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    // jwt_secret has no default; it must come from a file or APP__JWT_SECRET.
    let config = Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", run_env.as_str())?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .set_default("public_base_url", "http://localhost:3000")?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    if config.get_string("jwt_secret").is_err() {
        error!("JWT secret is not configured. Set APP__JWT_SECRET to the identity provider's signing secret.");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "jwt_secret is required but not configured. Set APP__JWT_SECRET environment variable."
                .into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
