//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, num::NonZeroU32, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::application::health::HealthThresholds;
use crate::application::logger::LogLevel;
use crate::resilience::{CircuitBreakerConfig, RetryPolicy};
use crate::revalidation::RevalidationConfig;
use crate::webhook::{DEFAULT_MAX_BODY_BYTES, DEFAULT_USER_AGENT_HINT, WebhookSecret};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "revalidator";
const ENV_PREFIX: &str = "REVALIDATOR";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_ADMIN_HOST: &str = "127.0.0.1";
const DEFAULT_PUBLIC_PORT: u16 = 3000;
const DEFAULT_ADMIN_PORT: u16 = 3001;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_WEBHOOK_LIMIT: u64 = 30;
const DEFAULT_FAILED_SIGNATURE_LIMIT: u64 = 5;
const DEFAULT_HEALTH_LIMIT: u64 = 60;
const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;
const DEFAULT_RATE_LIMIT_SWEEP_SECS: u64 = 60;
const DEFAULT_WEBHOOK_BREAKER_THRESHOLD: u64 = 5;
const DEFAULT_WEBHOOK_BREAKER_RESET_SECS: u64 = 60;
const DEFAULT_REVALIDATION_BREAKER_THRESHOLD: u64 = 3;
const DEFAULT_REVALIDATION_BREAKER_RESET_SECS: u64 = 30;
const DEFAULT_BREAKER_MONITORING_SECS: u64 = 10;
const DEFAULT_PATH_MAX_RETRIES: u32 = 2;
const DEFAULT_PATH_BASE_DELAY_MS: u64 = 500;
const DEFAULT_PATH_MAX_DELAY_MS: u64 = 5_000;
const DEFAULT_PATH_BACKOFF_MULTIPLIER: f64 = 2.0;
const DEFAULT_BATCH_ATTEMPTS: u32 = 3;
const DEFAULT_BATCH_DELAY_MS: u64 = 1_000;
const DEFAULT_DEBOUNCE_MS: u64 = 1_000;
const DEFAULT_QUEUE_DEGRADED: usize = 10;
const DEFAULT_QUEUE_UNHEALTHY: usize = 50;
const DEFAULT_CONTENT_STORE_API_VERSION: &str = "2024-01-01";
const DEFAULT_CONTENT_STORE_DATASET: &str = "production";
const DEFAULT_CONTENT_STORE_TIMEOUT_SECS: u64 = 5;
const DEFAULT_INVALIDATOR_TIMEOUT_SECS: u64 = 10;
const DEFAULT_WATCHER_CADENCE_SECS: u64 = 300;

/// Command-line arguments for the revalidator server.
#[derive(Debug, Parser)]
#[command(
    name = "revalidator",
    version,
    about = "Webhook-driven cache revalidation service"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "REVALIDATOR_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the webhook and admin HTTP listeners.
    Serve(Box<ServeArgs>),
    /// Resolve and validate configuration, print a redacted summary, and exit.
    #[command(name = "check-config")]
    CheckConfig(Box<ServeArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the public listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the administrative listener host.
    #[arg(long = "server-admin-host", value_name = "HOST")]
    pub server_admin_host: Option<String>,

    /// Override the public listener port.
    #[arg(long = "server-public-port", value_name = "PORT")]
    pub public_port: Option<u16>,

    /// Override the administrative listener port.
    #[arg(long = "server-admin-port", value_name = "PORT")]
    pub admin_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Minimum level for webhook/revalidation/security event entries.
    #[arg(long = "log-event-level", value_name = "LEVEL")]
    pub log_event_level: Option<String>,

    /// Shared secret used to verify webhook signatures.
    #[arg(long = "webhook-secret", value_name = "SECRET", hide_env_values = true)]
    pub webhook_secret: Option<String>,

    /// Override the maximum accepted webhook body size in bytes.
    #[arg(long = "webhook-max-body-bytes", value_name = "BYTES")]
    pub webhook_max_body_bytes: Option<u64>,

    /// Override the rate limit window size.
    #[arg(long = "rate-limit-window-seconds", value_name = "SECONDS")]
    pub rate_limit_window_seconds: Option<u64>,

    /// Override the per-source webhook request ceiling.
    #[arg(long = "rate-limit-webhook-max", value_name = "COUNT")]
    pub rate_limit_webhook_max: Option<u64>,

    /// Base URL of the content store query API.
    #[arg(long = "content-store-url", value_name = "URL")]
    pub content_store_url: Option<String>,

    /// Content store dataset name.
    #[arg(long = "content-store-dataset", value_name = "NAME")]
    pub content_store_dataset: Option<String>,

    /// Bearer token for the content store.
    #[arg(long = "content-store-token", value_name = "TOKEN")]
    pub content_store_token: Option<String>,

    /// Endpoint that invalidates a single cached path.
    #[arg(long = "invalidator-url", value_name = "URL")]
    pub invalidator_url: Option<String>,

    /// Bearer token for the invalidation endpoint.
    #[arg(long = "invalidator-token", value_name = "TOKEN")]
    pub invalidator_token: Option<String>,

    /// Toggle the content watcher.
    #[arg(
        long = "watcher-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub watcher_enabled: Option<bool>,

    /// Override the content watcher poll cadence.
    #[arg(long = "watcher-cadence-seconds", value_name = "SECONDS")]
    pub watcher_cadence_seconds: Option<u64>,

    /// Bearer token required for administrative health actions.
    #[arg(long = "admin-token", value_name = "TOKEN")]
    pub admin_token: Option<String>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub webhook: WebhookSettings,
    pub rate_limit: RateLimitSettings,
    pub breakers: BreakerSettings,
    pub revalidation: RevalidationConfig,
    pub health: HealthThresholds,
    pub content_store: Option<ContentStoreSettings>,
    pub invalidator: Option<InvalidatorSettings>,
    pub watcher: WatcherSettings,
    pub admin: AdminSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub public_addr: SocketAddr,
    pub admin_addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
    pub event_level: LogLevel,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct WebhookSettings {
    /// `None` makes every webhook answer 500 until configured.
    pub secret: Option<WebhookSecret>,
    pub max_body_bytes: usize,
    pub user_agent_hint: String,
}

#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub webhook: NonZeroU32,
    pub failed_signature: NonZeroU32,
    pub health: NonZeroU32,
    pub window: Duration,
    pub sweep_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct BreakerSettings {
    pub webhook: CircuitBreakerConfig,
    pub revalidation: CircuitBreakerConfig,
}

#[derive(Debug, Clone)]
pub struct ContentStoreSettings {
    pub base_url: Url,
    pub dataset: String,
    pub api_version: String,
    pub token: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct InvalidatorSettings {
    pub url: Url,
    pub token: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct WatcherSettings {
    pub enabled: bool,
    pub cadence: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct AdminSettings {
    pub token: Option<String>,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error("missing required configuration `{key}`")]
    Missing { key: &'static str },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

impl Settings {
    /// Content store settings, required to serve.
    pub fn require_content_store(&self) -> Result<&ContentStoreSettings, LoadError> {
        self.content_store.as_ref().ok_or(LoadError::Missing {
            key: "content_store.base_url",
        })
    }

    /// Invalidator settings, required to serve.
    pub fn require_invalidator(&self) -> Result<&InvalidatorSettings, LoadError> {
        self.invalidator
            .as_ref()
            .ok_or(LoadError::Missing { key: "invalidator.url" })
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) | Some(Command::CheckConfig(args)) => {
            raw.apply_serve_overrides(&args.overrides)
        }
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    webhook: RawWebhookSettings,
    rate_limit: RawRateLimitSettings,
    breakers: RawBreakerSettings,
    revalidation: RawRevalidationSettings,
    health: RawHealthSettings,
    content_store: RawContentStoreSettings,
    invalidator: RawInvalidatorSettings,
    watcher: RawWatcherSettings,
    admin: RawAdminSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(host) = overrides.server_admin_host.as_ref() {
            self.server.admin_host = Some(host.clone());
        }
        if let Some(port) = overrides.public_port {
            self.server.public_port = Some(port);
        }
        if let Some(port) = overrides.admin_port {
            self.server.admin_port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(level) = overrides.log_event_level.as_ref() {
            self.logging.event_level = Some(level.clone());
        }
        if let Some(secret) = overrides.webhook_secret.as_ref() {
            self.webhook.secret = Some(secret.clone());
        }
        if let Some(bytes) = overrides.webhook_max_body_bytes {
            self.webhook.max_body_bytes = Some(bytes);
        }
        if let Some(window) = overrides.rate_limit_window_seconds {
            self.rate_limit.window_seconds = Some(window);
        }
        if let Some(max) = overrides.rate_limit_webhook_max {
            self.rate_limit.webhook_max_requests = Some(max);
        }
        if let Some(url) = overrides.content_store_url.as_ref() {
            self.content_store.base_url = Some(url.clone());
        }
        if let Some(dataset) = overrides.content_store_dataset.as_ref() {
            self.content_store.dataset = Some(dataset.clone());
        }
        if let Some(token) = overrides.content_store_token.as_ref() {
            self.content_store.token = Some(token.clone());
        }
        if let Some(url) = overrides.invalidator_url.as_ref() {
            self.invalidator.url = Some(url.clone());
        }
        if let Some(token) = overrides.invalidator_token.as_ref() {
            self.invalidator.token = Some(token.clone());
        }
        if let Some(enabled) = overrides.watcher_enabled {
            self.watcher.enabled = Some(enabled);
        }
        if let Some(cadence) = overrides.watcher_cadence_seconds {
            self.watcher.cadence_seconds = Some(cadence);
        }
        if let Some(token) = overrides.admin_token.as_ref() {
            self.admin.token = Some(token.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            webhook,
            rate_limit,
            breakers,
            revalidation,
            health,
            content_store,
            invalidator,
            watcher,
            admin,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            webhook: build_webhook_settings(webhook)?,
            rate_limit: build_rate_limit_settings(rate_limit)?,
            breakers: build_breaker_settings(breakers)?,
            revalidation: build_revalidation_settings(revalidation)?,
            health: build_health_settings(health)?,
            content_store: build_content_store_settings(content_store)?,
            invalidator: build_invalidator_settings(invalidator)?,
            watcher: build_watcher_settings(watcher)?,
            admin: AdminSettings {
                token: non_blank(admin.token),
            },
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let admin_host = server
        .admin_host
        .unwrap_or_else(|| DEFAULT_ADMIN_HOST.to_string());

    let public_port = server.public_port.unwrap_or(DEFAULT_PUBLIC_PORT);
    if public_port == 0 {
        return Err(LoadError::invalid(
            "server.public_port",
            "port must be greater than zero",
        ));
    }

    let admin_port = server.admin_port.unwrap_or(DEFAULT_ADMIN_PORT);
    if admin_port == 0 {
        return Err(LoadError::invalid(
            "server.admin_port",
            "port must be greater than zero",
        ));
    }

    let public_addr = parse_socket_addr(&host, public_port)
        .map_err(|reason| LoadError::invalid("server.public_addr", reason))?;
    let admin_addr = parse_socket_addr(&admin_host, admin_port)
        .map_err(|reason| LoadError::invalid("server.admin_addr", reason))?;
    if public_addr == admin_addr {
        return Err(LoadError::invalid(
            "server.admin_port",
            "admin listener must not share the public address",
        ));
    }

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    let graceful_shutdown = positive_secs(graceful_secs, "server.graceful_shutdown_seconds")?;

    Ok(ServerSettings {
        public_addr,
        admin_addr,
        graceful_shutdown,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    let event_level = match logging.event_level {
        Some(level) => LogLevel::from_str(&level)
            .map_err(|reason| LoadError::invalid("logging.event_level", reason))?,
        None => LogLevel::Info,
    };

    Ok(LoggingSettings {
        level,
        format,
        event_level,
    })
}

fn build_webhook_settings(webhook: RawWebhookSettings) -> Result<WebhookSettings, LoadError> {
    let secret = non_blank(webhook.secret)
        .map(WebhookSecret::new)
        .transpose()
        .map_err(|err| LoadError::invalid("webhook.secret", err.to_string()))?;

    let max_body_bytes = webhook
        .max_body_bytes
        .unwrap_or(DEFAULT_MAX_BODY_BYTES as u64);
    if max_body_bytes == 0 {
        return Err(LoadError::invalid(
            "webhook.max_body_bytes",
            "must be greater than zero",
        ));
    }
    let max_body_bytes = usize::try_from(max_body_bytes).map_err(|_| {
        LoadError::invalid(
            "webhook.max_body_bytes",
            "value exceeds supported range for usize",
        )
    })?;

    let user_agent_hint =
        non_blank(webhook.user_agent_hint).unwrap_or_else(|| DEFAULT_USER_AGENT_HINT.to_string());

    Ok(WebhookSettings {
        secret,
        max_body_bytes,
        user_agent_hint,
    })
}

fn build_rate_limit_settings(
    rate_limit: RawRateLimitSettings,
) -> Result<RateLimitSettings, LoadError> {
    Ok(RateLimitSettings {
        webhook: non_zero_u32(
            rate_limit
                .webhook_max_requests
                .unwrap_or(DEFAULT_WEBHOOK_LIMIT),
            "rate_limit.webhook_max_requests",
        )?,
        failed_signature: non_zero_u32(
            rate_limit
                .failed_signature_max_requests
                .unwrap_or(DEFAULT_FAILED_SIGNATURE_LIMIT),
            "rate_limit.failed_signature_max_requests",
        )?,
        health: non_zero_u32(
            rate_limit
                .health_max_requests
                .unwrap_or(DEFAULT_HEALTH_LIMIT),
            "rate_limit.health_max_requests",
        )?,
        window: positive_secs(
            rate_limit
                .window_seconds
                .unwrap_or(DEFAULT_RATE_LIMIT_WINDOW_SECS),
            "rate_limit.window_seconds",
        )?,
        sweep_interval: positive_secs(
            rate_limit
                .sweep_interval_seconds
                .unwrap_or(DEFAULT_RATE_LIMIT_SWEEP_SECS),
            "rate_limit.sweep_interval_seconds",
        )?,
    })
}

fn build_breaker_settings(breakers: RawBreakerSettings) -> Result<BreakerSettings, LoadError> {
    let webhook = CircuitBreakerConfig {
        failure_threshold: non_zero_u32(
            breakers
                .webhook_failure_threshold
                .unwrap_or(DEFAULT_WEBHOOK_BREAKER_THRESHOLD),
            "breakers.webhook_failure_threshold",
        )?
        .get(),
        reset_timeout: positive_secs(
            breakers
                .webhook_reset_timeout_seconds
                .unwrap_or(DEFAULT_WEBHOOK_BREAKER_RESET_SECS),
            "breakers.webhook_reset_timeout_seconds",
        )?,
        monitoring_period: positive_secs(
            breakers
                .webhook_monitoring_period_seconds
                .unwrap_or(DEFAULT_BREAKER_MONITORING_SECS),
            "breakers.webhook_monitoring_period_seconds",
        )?,
    };

    let revalidation = CircuitBreakerConfig {
        failure_threshold: non_zero_u32(
            breakers
                .revalidation_failure_threshold
                .unwrap_or(DEFAULT_REVALIDATION_BREAKER_THRESHOLD),
            "breakers.revalidation_failure_threshold",
        )?
        .get(),
        reset_timeout: positive_secs(
            breakers
                .revalidation_reset_timeout_seconds
                .unwrap_or(DEFAULT_REVALIDATION_BREAKER_RESET_SECS),
            "breakers.revalidation_reset_timeout_seconds",
        )?,
        monitoring_period: positive_secs(
            breakers
                .revalidation_monitoring_period_seconds
                .unwrap_or(DEFAULT_BREAKER_MONITORING_SECS),
            "breakers.revalidation_monitoring_period_seconds",
        )?,
    };

    Ok(BreakerSettings {
        webhook,
        revalidation,
    })
}

fn build_revalidation_settings(
    revalidation: RawRevalidationSettings,
) -> Result<RevalidationConfig, LoadError> {
    let path_retry = RetryPolicy::new(
        revalidation
            .path_max_retries
            .unwrap_or(DEFAULT_PATH_MAX_RETRIES),
        Duration::from_millis(
            revalidation
                .path_base_delay_ms
                .unwrap_or(DEFAULT_PATH_BASE_DELAY_MS),
        ),
        Duration::from_millis(
            revalidation
                .path_max_delay_ms
                .unwrap_or(DEFAULT_PATH_MAX_DELAY_MS),
        ),
        revalidation
            .path_backoff_multiplier
            .unwrap_or(DEFAULT_PATH_BACKOFF_MULTIPLIER),
        revalidation.path_jitter.unwrap_or(true),
    )
    .map_err(|err| LoadError::invalid("revalidation.path_retry", err.to_string()))?;

    let batch_attempts = revalidation
        .batch_attempts
        .unwrap_or(DEFAULT_BATCH_ATTEMPTS);
    if batch_attempts == 0 {
        return Err(LoadError::invalid(
            "revalidation.batch_attempts",
            "must be greater than zero",
        ));
    }

    Ok(RevalidationConfig {
        path_retry,
        batch_attempts,
        batch_delay: Duration::from_millis(
            revalidation
                .batch_delay_ms
                .unwrap_or(DEFAULT_BATCH_DELAY_MS),
        ),
        debounce: Duration::from_millis(revalidation.debounce_ms.unwrap_or(DEFAULT_DEBOUNCE_MS)),
    })
}

fn build_health_settings(health: RawHealthSettings) -> Result<HealthThresholds, LoadError> {
    let queue_degraded = health.queue_degraded.unwrap_or(DEFAULT_QUEUE_DEGRADED);
    let queue_unhealthy = health.queue_unhealthy.unwrap_or(DEFAULT_QUEUE_UNHEALTHY);
    if queue_unhealthy < queue_degraded {
        return Err(LoadError::invalid(
            "health.queue_unhealthy",
            format!("must be at least health.queue_degraded ({queue_degraded})"),
        ));
    }
    Ok(HealthThresholds {
        queue_degraded,
        queue_unhealthy,
    })
}

fn build_content_store_settings(
    store: RawContentStoreSettings,
) -> Result<Option<ContentStoreSettings>, LoadError> {
    let Some(base_url) = non_blank(store.base_url) else {
        return Ok(None);
    };
    let base_url = parse_url(&base_url, "content_store.base_url")?;

    let dataset =
        non_blank(store.dataset).unwrap_or_else(|| DEFAULT_CONTENT_STORE_DATASET.to_string());
    if !crate::domain::is_identifier(&dataset) {
        return Err(LoadError::invalid(
            "content_store.dataset",
            "must contain only letters, digits, hyphens and underscores",
        ));
    }

    Ok(Some(ContentStoreSettings {
        base_url,
        dataset,
        api_version: non_blank(store.api_version)
            .unwrap_or_else(|| DEFAULT_CONTENT_STORE_API_VERSION.to_string()),
        token: non_blank(store.token),
        timeout: positive_secs(
            store
                .timeout_seconds
                .unwrap_or(DEFAULT_CONTENT_STORE_TIMEOUT_SECS),
            "content_store.timeout_seconds",
        )?,
    }))
}

fn build_invalidator_settings(
    invalidator: RawInvalidatorSettings,
) -> Result<Option<InvalidatorSettings>, LoadError> {
    let Some(url) = non_blank(invalidator.url) else {
        return Ok(None);
    };

    Ok(Some(InvalidatorSettings {
        url: parse_url(&url, "invalidator.url")?,
        token: non_blank(invalidator.token),
        timeout: positive_secs(
            invalidator
                .timeout_seconds
                .unwrap_or(DEFAULT_INVALIDATOR_TIMEOUT_SECS),
            "invalidator.timeout_seconds",
        )?,
    }))
}

fn build_watcher_settings(watcher: RawWatcherSettings) -> Result<WatcherSettings, LoadError> {
    Ok(WatcherSettings {
        enabled: watcher.enabled.unwrap_or(true),
        cadence: positive_secs(
            watcher
                .cadence_seconds
                .unwrap_or(DEFAULT_WATCHER_CADENCE_SECS),
            "watcher.cadence_seconds",
        )?,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    admin_host: Option<String>,
    public_port: Option<u16>,
    admin_port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
    event_level: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawWebhookSettings {
    secret: Option<String>,
    max_body_bytes: Option<u64>,
    user_agent_hint: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRateLimitSettings {
    webhook_max_requests: Option<u64>,
    failed_signature_max_requests: Option<u64>,
    health_max_requests: Option<u64>,
    window_seconds: Option<u64>,
    sweep_interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBreakerSettings {
    webhook_failure_threshold: Option<u64>,
    webhook_reset_timeout_seconds: Option<u64>,
    webhook_monitoring_period_seconds: Option<u64>,
    revalidation_failure_threshold: Option<u64>,
    revalidation_reset_timeout_seconds: Option<u64>,
    revalidation_monitoring_period_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRevalidationSettings {
    path_max_retries: Option<u32>,
    path_base_delay_ms: Option<u64>,
    path_max_delay_ms: Option<u64>,
    path_backoff_multiplier: Option<f64>,
    path_jitter: Option<bool>,
    batch_attempts: Option<u32>,
    batch_delay_ms: Option<u64>,
    debounce_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawHealthSettings {
    queue_degraded: Option<usize>,
    queue_unhealthy: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawContentStoreSettings {
    base_url: Option<String>,
    dataset: Option<String>,
    api_version: Option<String>,
    token: Option<String>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawInvalidatorSettings {
    url: Option<String>,
    token: Option<String>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawWatcherSettings {
    enabled: Option<bool>,
    cadence_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawAdminSettings {
    token: Option<String>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn parse_url(value: &str, key: &'static str) -> Result<Url, LoadError> {
    let url = Url::parse(value).map_err(|err| LoadError::invalid(key, err.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(LoadError::invalid(
            key,
            format!("unsupported scheme `{other}`"),
        )),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn positive_secs(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
