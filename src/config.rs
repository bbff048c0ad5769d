use chrono::NaiveTime;
use chrono_tz::Tz;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::info;
use validator::{Validate, ValidationError};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_TIMEZONE: &str = "Asia/Ho_Chi_Minh";
const DEFAULT_DEADLINE_POLL_SECS: u64 = 60;
const DEFAULT_EXTENSION_SWEEP_TIME: &str = "00:05";
const DEFAULT_ID_LOCK_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_ID_LOCK_MAX_RETRIES: u32 = 3;

/// Process-level configuration.
///
/// The tenant-wide warehouse rules (working hours, deadlines, extension
/// limits) live in the `warehouse_configuration` table instead, so they can
/// change while the scheduler is running.
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

    /// Seed the warehouse configuration row when none exists
    #[serde(default = "default_true_bool")]
    pub seed_warehouse_configuration: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// IANA zone every date and time-of-day comparison is made in
    #[serde(default = "default_timezone")]
    #[validate(custom = "validate_timezone")]
    pub operating_timezone: String,

    /// Run the background sweep and recurrence jobs in this process
    #[serde(default = "default_true_bool")]
    pub scheduler_enabled: bool,

    /// Poll interval of the deadline sweep (seconds)
    #[serde(default = "default_deadline_poll_interval_secs")]
    #[validate(range(min = 1, max = 3600))]
    pub deadline_poll_interval_secs: u64,

    /// Local time of day (`HH:MM`) at which the extension sweep runs
    #[serde(default = "default_extension_sweep_time")]
    #[validate(custom = "validate_time_of_day")]
    pub extension_sweep_time: String,

    /// How long one attempt waits for the per-day identifier lock
    #[serde(default = "default_id_lock_timeout_ms")]
    #[validate(range(min = 1))]
    pub id_lock_timeout_ms: u64,

    /// Attempts before identifier allocation gives up with a conflict
    #[serde(default = "default_id_lock_max_retries")]
    #[validate(range(min = 1, max = 20))]
    pub id_lock_max_retries: u32,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    #[validate(range(min = 1))]
    pub event_channel_capacity: usize,
}

impl AppConfig {
    /// Creates a configuration with defaults for everything but the essentials.
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            seed_warehouse_configuration: true,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            operating_timezone: default_timezone(),
            scheduler_enabled: true,
            deadline_poll_interval_secs: default_deadline_poll_interval_secs(),
            extension_sweep_time: default_extension_sweep_time(),
            id_lock_timeout_ms: default_id_lock_timeout_ms(),
            id_lock_max_retries: default_id_lock_max_retries(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }

    /// Gets database URL reference
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// The operating timezone. Falls back to UTC only if validation was skipped.
    pub fn timezone(&self) -> Tz {
        self.operating_timezone.parse().unwrap_or(Tz::UTC)
    }

    /// Local time of day the extension sweep fires.
    pub fn extension_sweep_at(&self) -> NaiveTime {
        parse_time_of_day(&self.extension_sweep_time)
            .unwrap_or_else(|| NaiveTime::from_hms_opt(0, 5, 0).unwrap_or(NaiveTime::MIN))
    }

    pub fn deadline_poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.deadline_poll_interval_secs)
    }

    pub fn id_lock_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.id_lock_timeout_ms)
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_true_bool() -> bool {
    true
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

fn default_deadline_poll_interval_secs() -> u64 {
    DEFAULT_DEADLINE_POLL_SECS
}

fn default_extension_sweep_time() -> String {
    DEFAULT_EXTENSION_SWEEP_TIME.to_string()
}

fn default_id_lock_timeout_ms() -> u64 {
    DEFAULT_ID_LOCK_TIMEOUT_MS
}

fn default_id_lock_max_retries() -> u32 {
    DEFAULT_ID_LOCK_MAX_RETRIES
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn parse_time_of_day(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value.trim(), "%H:%M:%S"))
        .ok()
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

fn validate_timezone(value: &str) -> Result<(), ValidationError> {
    match value.parse::<Tz>() {
        Ok(_) => Ok(()),
        Err(_) => {
            let mut err = ValidationError::new("operating_timezone");
            err.message = Some("Must be an IANA timezone name such as Asia/Ho_Chi_Minh".into());
            Err(err)
        }
    }
}

fn validate_time_of_day(value: &str) -> Result<(), ValidationError> {
    if parse_time_of_day(value).is_some() {
        Ok(())
    } else {
        let mut err = ValidationError::new("extension_sweep_time");
        err.message = Some("Must be a local time of day formatted HH:MM".into());
        Err(err)
    }
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("warehouse_ops={},tower_http=info", level);
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

    let config = Config::builder()
        .set_default("database_url", "sqlite://warehouse_ops.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;
    app_config.validate()?;

    info!(
        timezone = %app_config.operating_timezone,
        scheduler_enabled = app_config.scheduler_enabled,
        "Configuration loaded successfully"
    );
    Ok(app_config)
}
