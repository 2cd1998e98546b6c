//! Application configuration structs
//!
//! Loads configuration from environment variables (and an optional `.env` file).

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub app: AppSettings,
    pub gateway: GatewayConfig,
    pub sharding: ShardingConfig,
    pub rest: RestConfig,
}

/// General application settings
#[derive(Debug, Clone)]
pub struct AppSettings {
    pub name: String,
    pub env: Environment,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            env: Environment::default(),
        }
    }
}

/// Environment type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    #[must_use]
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "production" => Some(Self::Production),
            "staging" => Some(Self::Staging),
            "development" => Some(Self::Development),
            _ => None,
        }
    }
}

/// Gateway connection settings shared by every shard
#[derive(Clone)]
pub struct GatewayConfig {
    /// Bot token, sent in Identify/Resume
    pub token: String,
    /// Base websocket URL, without query string
    pub url: String,
    /// Gateway protocol version (`v=` query parameter)
    pub api_version: u8,
    /// Total shard count; 0 means "ask the REST API"
    pub shard_count: u32,
    /// Gateway intents bitfield
    pub intents: u64,
    /// Member count above which guilds are sent without offline members
    pub large_threshold: u32,
    /// Request zlib-stream transport compression
    pub compress: bool,
    /// `$os` identify property
    pub os: String,
    /// `$browser` identify property
    pub browser: String,
    /// `$device` identify property
    pub device: String,
}

impl GatewayConfig {
    /// Full connect URL for `base`, including encoding/version/compression query
    #[must_use]
    pub fn connect_url(&self, base: &str) -> String {
        let base = base.trim_end_matches('/');
        if self.compress {
            format!(
                "{base}/?compress=zlib-stream&encoding=json&v={}",
                self.api_version
            )
        } else {
            format!("{base}/?encoding=json&v={}", self.api_version)
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            url: default_gateway_url(),
            api_version: default_api_version(),
            shard_count: 1,
            intents: 0,
            large_threshold: default_large_threshold(),
            compress: true,
            os: env::consts::OS.to_string(),
            browser: default_library_name(),
            device: default_library_name(),
        }
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("token", &"<redacted>")
            .field("url", &self.url)
            .field("api_version", &self.api_version)
            .field("shard_count", &self.shard_count)
            .field("intents", &self.intents)
            .field("large_threshold", &self.large_threshold)
            .field("compress", &self.compress)
            .finish()
    }
}

/// Timing knobs for the shard manager and each shard
#[derive(Debug, Clone)]
pub struct ShardingConfig {
    /// Minimum spacing between two Identify handshakes across all shards
    pub identify_interval: Duration,
    /// Deadline for a connect attempt to reach `online`
    pub connect_timeout: Duration,
    /// Manager sweep cadence
    pub sweep_interval: Duration,
    /// Max silence on an open socket before the sweep force-closes it
    pub liveness_timeout: Duration,
    /// Paced write queue flush cadence
    pub flush_interval: Duration,
    /// Frames written per flush tick
    pub flush_batch: usize,
    /// Heartbeat ACK deadline as a multiple of the heartbeat interval
    pub ack_timeout_factor: f64,
    /// Lower bound of the re-identify delay after a non-resumable Invalid Session
    pub invalid_session_delay_min: Duration,
    /// Upper bound of the re-identify delay after a non-resumable Invalid Session
    pub invalid_session_delay_max: Duration,
}

impl Default for ShardingConfig {
    fn default() -> Self {
        Self {
            identify_interval: Duration::from_millis(6_000),
            connect_timeout: Duration::from_millis(20_000),
            sweep_interval: Duration::from_millis(100),
            liveness_timeout: Duration::from_millis(90_000),
            flush_interval: Duration::from_millis(600),
            flush_batch: 1,
            ack_timeout_factor: 1.5,
            invalid_session_delay_min: Duration::from_millis(1_000),
            invalid_session_delay_max: Duration::from_millis(5_000),
        }
    }
}

/// REST dispatcher settings
#[derive(Clone)]
pub struct RestConfig {
    /// Bot token, sent as `Authorization: Bot <token>`
    pub token: String,
    /// API base URL, e.g. `https://discord.com/api/v10`
    pub base_url: String,
    /// `User-Agent` header value
    pub user_agent: String,
    /// How many times a 429 is retried before surfacing to the caller
    pub max_rate_limit_retries: u32,
    /// Per-request transport timeout
    pub request_timeout: Duration,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            base_url: default_api_url(),
            user_agent: default_user_agent(),
            max_rate_limit_retries: 3,
            request_timeout: Duration::from_secs(15),
        }
    }
}

impl fmt::Debug for RestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestConfig")
            .field("token", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("user_agent", &self.user_agent)
            .field("max_rate_limit_retries", &self.max_rate_limit_retries)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

// Default value functions
fn default_app_name() -> String {
    "shardline".to_string()
}

fn default_library_name() -> String {
    "shardline".to_string()
}

fn default_gateway_url() -> String {
    "wss://gateway.discord.gg".to_string()
}

fn default_api_url() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_user_agent() -> String {
    format!(
        "DiscordBot (https://github.com/shardline/shardline, {})",
        env!("CARGO_PKG_VERSION")
    )
}

fn default_api_version() -> u8 {
    10
}

fn default_large_threshold() -> u32 {
    250
}

/// Parse an optional variable, falling back to `default` when unset.
fn parse_var<T, F>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(name, raw)),
        None => Ok(default),
    }
}

fn parse_millis<F>(lookup: &F, name: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parse_var(lookup, name, default.as_millis() as u64).map(Duration::from_millis)
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if `SHARDLINE_TOKEN` is missing or a value fails to parse
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = lookup("SHARDLINE_TOKEN")
            .filter(|t| !t.trim().is_empty())
            .ok_or(ConfigError::MissingVar("SHARDLINE_TOKEN"))?;

        let gateway_defaults = GatewayConfig::default();
        let sharding_defaults = ShardingConfig::default();
        let rest_defaults = RestConfig::default();

        let config = Self {
            app: AppSettings {
                name: lookup("APP_NAME").unwrap_or_else(default_app_name),
                env: lookup("APP_ENV")
                    .as_deref()
                    .and_then(Environment::parse)
                    .unwrap_or_default(),
            },
            gateway: GatewayConfig {
                token: token.clone(),
                url: lookup("SHARDLINE_GATEWAY_URL").unwrap_or(gateway_defaults.url),
                api_version: parse_var(&lookup, "SHARDLINE_API_VERSION", gateway_defaults.api_version)?,
                shard_count: parse_var(&lookup, "SHARDLINE_SHARD_COUNT", gateway_defaults.shard_count)?,
                intents: parse_var(&lookup, "SHARDLINE_INTENTS", gateway_defaults.intents)?,
                large_threshold: parse_var(
                    &lookup,
                    "SHARDLINE_LARGE_THRESHOLD",
                    gateway_defaults.large_threshold,
                )?,
                compress: parse_var(&lookup, "SHARDLINE_COMPRESS", gateway_defaults.compress)?,
                os: gateway_defaults.os,
                browser: gateway_defaults.browser,
                device: gateway_defaults.device,
            },
            sharding: ShardingConfig {
                identify_interval: parse_millis(
                    &lookup,
                    "SHARDLINE_IDENTIFY_INTERVAL_MS",
                    sharding_defaults.identify_interval,
                )?,
                connect_timeout: parse_millis(
                    &lookup,
                    "SHARDLINE_CONNECT_TIMEOUT_MS",
                    sharding_defaults.connect_timeout,
                )?,
                sweep_interval: parse_millis(
                    &lookup,
                    "SHARDLINE_SWEEP_INTERVAL_MS",
                    sharding_defaults.sweep_interval,
                )?,
                liveness_timeout: parse_millis(
                    &lookup,
                    "SHARDLINE_LIVENESS_TIMEOUT_MS",
                    sharding_defaults.liveness_timeout,
                )?,
                flush_interval: parse_millis(
                    &lookup,
                    "SHARDLINE_FLUSH_INTERVAL_MS",
                    sharding_defaults.flush_interval,
                )?,
                flush_batch: parse_var(&lookup, "SHARDLINE_FLUSH_BATCH", sharding_defaults.flush_batch)?,
                ack_timeout_factor: parse_var(
                    &lookup,
                    "SHARDLINE_ACK_TIMEOUT_FACTOR",
                    sharding_defaults.ack_timeout_factor,
                )?,
                invalid_session_delay_min: parse_millis(
                    &lookup,
                    "SHARDLINE_INVALID_SESSION_MIN_MS",
                    sharding_defaults.invalid_session_delay_min,
                )?,
                invalid_session_delay_max: parse_millis(
                    &lookup,
                    "SHARDLINE_INVALID_SESSION_MAX_MS",
                    sharding_defaults.invalid_session_delay_max,
                )?,
            },
            rest: RestConfig {
                token,
                base_url: lookup("SHARDLINE_API_URL").unwrap_or(rest_defaults.base_url),
                user_agent: lookup("SHARDLINE_USER_AGENT").unwrap_or(rest_defaults.user_agent),
                max_rate_limit_retries: parse_var(
                    &lookup,
                    "SHARDLINE_RATE_LIMIT_RETRIES",
                    rest_defaults.max_rate_limit_retries,
                )?,
                request_timeout: rest_defaults.request_timeout,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sharding = &self.sharding;

        if sharding.ack_timeout_factor <= 1.0 {
            return Err(ConfigError::InvalidValue(
                "SHARDLINE_ACK_TIMEOUT_FACTOR",
                "must be greater than 1.0".to_string(),
            ));
        }

        if sharding.invalid_session_delay_min > sharding.invalid_session_delay_max {
            return Err(ConfigError::InvalidValue(
                "SHARDLINE_INVALID_SESSION_MIN_MS",
                "must not exceed SHARDLINE_INVALID_SESSION_MAX_MS".to_string(),
            ));
        }

        if sharding.flush_batch == 0 {
            return Err(ConfigError::InvalidValue(
                "SHARDLINE_FLUSH_BATCH",
                "must be at least 1".to_string(),
            ));
        }

        if sharding.sweep_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "SHARDLINE_SWEEP_INTERVAL_MS",
                "must be non-zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}
