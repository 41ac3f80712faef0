//! Storefront configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `STOREFRONT_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//! - `STOREFRONT_BASE_URL` - Public URL for the storefront
//! - `IYZICO_API_KEY` - Payment gateway API key
//! - `IYZICO_SECRET_KEY` - Payment gateway secret key (high entropy)
//!
//! ## Optional
//! - `STOREFRONT_HOST` - Bind address (default: 127.0.0.1)
//! - `STOREFRONT_PORT` - Listen port (default: 3000)
//! - `CHECKOUT_SUCCESS_URL` - Redirect after payment (default: `{base}/checkout/success`)
//! - `CHECKOUT_ERROR_URL` - Redirect after a failed payment (default: `{base}/checkout/error`)
//! - `IYZICO_BASE_URL` - Gateway endpoint (default: <https://sandbox-api.iyzipay.com>)
//! - `PAYMENT_CALLBACK_URL` - Callback given to the gateway (default: `{base}/api/payment/callback`)
//! - `STORAGE_ROOT` - Object storage directory (default: ./storage)
//! - `UPLOAD_MAX_BYTES` - Upload ceiling (default: 52428800)
//! - `IMAGE_TRANSFORM_TIMEOUT_SECS` - Transform latency bound (default: 10)
//! - `IMAGE_MEMORY_CACHE_BYTES` - Hot cache capacity for derived images (default: 67108864)
//! - `RATE_LIMIT_BACKEND` - `postgres` or `memory` (default: postgres)
//! - `RATE_LIMIT_MAX_REQUESTS` - Requests per window per client (default: 30)
//! - `RATE_LIMIT_WINDOW_SECS` - Window length (default: 60)
//! - `SMTP_HOST`, `SMTP_PORT`, `SMTP_USERNAME`, `SMTP_PASSWORD`, `EMAIL_FROM` - Order
//!   confirmation email; when `SMTP_HOST` is unset confirmations are only logged
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment tag
//! - `SENTRY_SAMPLE_RATE` - Error sample rate (default: 1.0)
//! - `SENTRY_TRACES_SAMPLE_RATE` - Trace sample rate (default: 0.0)

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;

const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

const DEFAULT_IYZICO_BASE_URL: &str = "https://sandbox-api.iyzipay.com";

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Storefront application configuration.
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Public base URL for the storefront, without trailing slash
    pub base_url: String,
    /// Where the payment callback sends the customer
    pub checkout: CheckoutConfig,
    /// Payment gateway credentials
    pub payment: PaymentConfig,
    /// Object storage and image pipeline settings
    pub images: ImageConfig,
    /// Request rate limiting
    pub rate_limit: RateLimitConfig,
    /// SMTP delivery for order confirmations
    pub smtp: Option<SmtpConfig>,
    /// Error tracking
    pub sentry: SentryConfig,
}

/// Redirect targets for the payment callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutConfig {
    pub success_url: String,
    pub error_url: String,
}

/// Payment gateway configuration.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct PaymentConfig {
    pub api_key: SecretString,
    pub secret_key: SecretString,
    /// Gateway origin, without trailing slash
    pub base_url: String,
    /// Callback URL handed to the gateway with each checkout form
    pub callback_url: String,
}

impl std::fmt::Debug for PaymentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentConfig")
            .field("api_key", &"[REDACTED]")
            .field("secret_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("callback_url", &self.callback_url)
            .finish()
    }
}

/// Object storage and image derivation settings.
#[derive(Debug, Clone)]
pub struct ImageConfig {
    pub storage_root: PathBuf,
    pub upload_max_bytes: usize,
    pub transform_timeout: Duration,
    pub memory_cache_bytes: u64,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("./storage"),
            upload_max_bytes: 50 * 1024 * 1024,
            transform_timeout: Duration::from_secs(10),
            memory_cache_bytes: 64 * 1024 * 1024,
        }
    }
}

/// Where rate-limit counters live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitBackend {
    /// Shared counters in Postgres, falling back to memory on errors.
    Postgres,
    /// Per-process counters only.
    Memory,
}

impl FromStr for RateLimitBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "pg" => Ok(Self::Postgres),
            "memory" | "in-memory" => Ok(Self::Memory),
            other => Err(format!("expected 'postgres' or 'memory', got '{other}'")),
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub backend: RateLimitBackend,
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            backend: RateLimitBackend::Postgres,
            max_requests: 30,
            window: Duration::from_secs(60),
        }
    }
}

/// SMTP configuration for order confirmation email.
///
/// Implements `Debug` manually to redact the password.
#[derive(Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub from: String,
}

impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("from", &self.from)
            .finish()
    }
}

/// Sentry configuration.
#[derive(Debug, Clone, Default)]
pub struct SentryConfig {
    pub dsn: Option<String>,
    pub environment: Option<String>,
    pub sample_rate: f32,
    pub traces_sample_rate: f32,
}

impl StorefrontConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if secrets fail validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_database_url("STOREFRONT_DATABASE_URL")?;
        let host = get_parsed_or_default("STOREFRONT_HOST", "127.0.0.1")?;
        let port = get_parsed_or_default("STOREFRONT_PORT", "3000")?;
        let base_url = trim_trailing_slash(&get_required_env("STOREFRONT_BASE_URL")?);

        let checkout = CheckoutConfig {
            success_url: get_optional_env("CHECKOUT_SUCCESS_URL")
                .unwrap_or_else(|| format!("{base_url}/checkout/success")),
            error_url: get_optional_env("CHECKOUT_ERROR_URL")
                .unwrap_or_else(|| format!("{base_url}/checkout/error")),
        };

        let payment = PaymentConfig {
            api_key: get_required_secret("IYZICO_API_KEY")?,
            secret_key: get_validated_secret("IYZICO_SECRET_KEY")?,
            base_url: trim_trailing_slash(&get_env_or_default(
                "IYZICO_BASE_URL",
                DEFAULT_IYZICO_BASE_URL,
            )),
            callback_url: get_optional_env("PAYMENT_CALLBACK_URL")
                .unwrap_or_else(|| format!("{base_url}/api/payment/callback")),
        };

        let images = ImageConfig {
            storage_root: PathBuf::from(get_env_or_default("STORAGE_ROOT", "./storage")),
            upload_max_bytes: get_parsed_or_default("UPLOAD_MAX_BYTES", "52428800")?,
            transform_timeout: Duration::from_secs(get_parsed_or_default(
                "IMAGE_TRANSFORM_TIMEOUT_SECS",
                "10",
            )?),
            memory_cache_bytes: get_parsed_or_default("IMAGE_MEMORY_CACHE_BYTES", "67108864")?,
        };

        let rate_limit = RateLimitConfig {
            backend: get_parsed_or_default("RATE_LIMIT_BACKEND", "postgres")?,
            max_requests: get_parsed_or_default("RATE_LIMIT_MAX_REQUESTS", "30")?,
            window: Duration::from_secs(get_parsed_or_default("RATE_LIMIT_WINDOW_SECS", "60")?),
        };
        if rate_limit.max_requests == 0 || rate_limit.window.is_zero() {
            return Err(ConfigError::InvalidEnvVar(
                "RATE_LIMIT_MAX_REQUESTS".to_string(),
                "limit and window must be positive".to_string(),
            ));
        }

        let smtp = SmtpConfig::from_env()?;

        let sentry = SentryConfig {
            dsn: get_optional_env("SENTRY_DSN"),
            environment: get_optional_env("SENTRY_ENVIRONMENT"),
            sample_rate: get_parsed_or_default("SENTRY_SAMPLE_RATE", "1.0")?,
            traces_sample_rate: get_parsed_or_default("SENTRY_TRACES_SAMPLE_RATE", "0.0")?,
        };

        Ok(Self {
            database_url,
            host,
            port,
            base_url,
            checkout,
            payment,
            images,
            rate_limit,
            smtp,
            sentry,
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl SmtpConfig {
    fn from_env() -> Result<Option<Self>, ConfigError> {
        let Some(host) = get_optional_env("SMTP_HOST") else {
            return Ok(None);
        };

        Ok(Some(Self {
            host,
            port: get_parsed_or_default("SMTP_PORT", "587")?,
            username: get_optional_env("SMTP_USERNAME"),
            password: get_optional_env("SMTP_PASSWORD").map(SecretString::from),
            from: get_required_env("EMAIL_FROM")?,
        }))
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get a required environment variable as a secret.
fn get_required_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    Ok(SecretString::from(value))
}

/// Get database URL with fallback to generic `DATABASE_URL` (used by Fly.io postgres attach).
fn get_database_url(primary_key: &str) -> Result<SecretString, ConfigError> {
    if let Ok(value) = std::env::var(primary_key) {
        return Ok(SecretString::from(value));
    }

    if let Ok(value) = std::env::var("DATABASE_URL") {
        return Ok(SecretString::from(value));
    }

    Err(ConfigError::MissingEnvVar(primary_key.to_string()))
}

/// Get an optional environment variable. Empty values count as unset.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    get_optional_env(key).unwrap_or_else(|| default.to_string())
}

/// Parse an environment variable, falling back to `default` when unset.
fn get_parsed_or_default<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env_or_default(key, default)
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

fn trim_trailing_slash(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use the key issued by the gateway."
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret from environment.
fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}
