//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, num::NonZeroU32, path::PathBuf, str::FromStr, time::Duration};

use apalis_cron::Schedule;
use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

mod cli;

pub use cli::{BuilderOverrides, CliArgs, Command, ReapArgs, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "pressroom";
const ENV_PREFIX: &str = "PRESSROOM";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_CACHE_BINARY_TTL_SECS: u64 = 24 * 60 * 60;
const DEFAULT_CACHE_SOURCE_TTL_SECS: u64 = 12 * 60 * 60;
const DEFAULT_RATE_LIMIT_REQUESTS_PER_MINUTE: u64 = 60;
const DEFAULT_RATE_LIMIT_BURST_SIZE: u64 = 10;
const DEFAULT_RATE_LIMIT_STATE_TTL_SECS: u64 = 60;
const DEFAULT_ADAPTIVE_MIN_RATE: f64 = 10.0;
const DEFAULT_ADAPTIVE_MAX_RATE: f64 = 300.0;
const DEFAULT_RESPONSE_TIME_HIGH_SECS: f64 = 5.0;
const DEFAULT_RESPONSE_TIME_MEDIUM_SECS: f64 = 2.0;
const DEFAULT_ACTIVE_REQUESTS_HIGH: u64 = 50;
const DEFAULT_ACTIVE_REQUESTS_MEDIUM: u64 = 20;
const DEFAULT_CACHE_HIT_RATE_HIGH: f64 = 0.8;
const DEFAULT_CACHE_HIT_RATE_MEDIUM: f64 = 0.5;
const DEFAULT_RESPONSE_TIME_HIGH_FACTOR: f64 = 0.5;
const DEFAULT_RESPONSE_TIME_MEDIUM_FACTOR: f64 = 0.7;
const DEFAULT_ACTIVE_REQUESTS_HIGH_FACTOR: f64 = 0.6;
const DEFAULT_ACTIVE_REQUESTS_MEDIUM_FACTOR: f64 = 0.8;
const DEFAULT_CACHE_HIT_RATE_HIGH_FACTOR: f64 = 1.2;
const DEFAULT_CACHE_HIT_RATE_MEDIUM_FACTOR: f64 = 1.1;
const DEFAULT_BUILD_CONCURRENCY: u64 = 2;
const DEFAULT_RENDER_CONCURRENCY: u64 = 2;
const DEFAULT_BATCH_CONCURRENCY: u64 = 1;
const DEFAULT_CLEANUP_CONCURRENCY: u64 = 1;
const DEFAULT_MAX_TASKS_PER_WORKER: u64 = 50;
const DEFAULT_RETRY_BASE_DELAY_SECS: u64 = 2;
const DEFAULT_RETRY_MAX_DELAY_SECS: u64 = 300;
const DEFAULT_SOFT_TIME_LIMIT_SECS: u64 = 240;
const DEFAULT_HARD_TIME_LIMIT_SECS: u64 = 300;
const DEFAULT_RESULT_HORIZON_SECS: u64 = 60 * 60;
const DEFAULT_BUILDER_COMMAND: &str = "pressroom-build";
const DEFAULT_TEMPLATES_DIR: &str = "templates";
const DEFAULT_SCRATCH_DIR: &str = "/tmp/pressroom";
const DEFAULT_REAPER_MAX_AGE_SECS: u64 = 2 * 60 * 60;
const DEFAULT_REAPER_SCHEDULE: &str = "0 */30 * * * *";

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub rate_limit: RateLimitSettings,
    pub adaptive: AdaptiveSettings,
    pub tasks: TasksSettings,
    pub builder: BuilderSettings,
    pub reaper: ReaperSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub binary_ttl: Duration,
    pub source_ttl: Duration,
    pub schema_version: u32,
}

#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub enabled: bool,
    pub requests_per_minute: NonZeroU32,
    pub burst_size: NonZeroU32,
    pub state_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct AdaptiveSettings {
    pub enabled: bool,
    pub min_rate: f64,
    pub max_rate: f64,
    pub response_time_high_secs: f64,
    pub response_time_medium_secs: f64,
    pub active_requests_high: u64,
    pub active_requests_medium: u64,
    pub cache_hit_rate_high: f64,
    pub cache_hit_rate_medium: f64,
    pub response_time_high_factor: f64,
    pub response_time_medium_factor: f64,
    pub active_requests_high_factor: f64,
    pub active_requests_medium_factor: f64,
    pub cache_hit_rate_high_factor: f64,
    pub cache_hit_rate_medium_factor: f64,
}

#[derive(Debug, Clone)]
pub struct TasksSettings {
    pub build_concurrency: NonZeroU32,
    pub render_concurrency: NonZeroU32,
    pub batch_concurrency: NonZeroU32,
    pub cleanup_concurrency: NonZeroU32,
    pub max_tasks_per_worker: NonZeroU32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub soft_time_limit: Duration,
    pub hard_time_limit: Duration,
    pub result_horizon: Duration,
}

#[derive(Debug, Clone)]
pub struct BuilderSettings {
    pub command: PathBuf,
    pub templates_dir: PathBuf,
    pub scratch_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ReaperSettings {
    pub enabled: bool,
    pub directory: PathBuf,
    pub max_age: Duration,
    pub schedule: Schedule,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
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
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Reap(args)) => raw.apply_reap_overrides(args),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    rate_limit: RawRateLimitSettings,
    adaptive: RawAdaptiveSettings,
    tasks: RawTasksSettings,
    builder: RawBuilderSettings,
    reaper: RawReaperSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        self.apply_builder_overrides(&overrides.builder);

        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
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
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(enabled) = overrides.rate_limit_enabled {
            self.rate_limit.enabled = Some(enabled);
        }
        if let Some(rpm) = overrides.rate_limit_requests_per_minute {
            self.rate_limit.requests_per_minute = Some(rpm);
        }
        if let Some(burst) = overrides.rate_limit_burst_size {
            self.rate_limit.burst_size = Some(burst);
        }
        if let Some(enabled) = overrides.adaptive_enabled {
            self.adaptive.enabled = Some(enabled);
        }
        if let Some(count) = overrides.tasks_build_concurrency {
            self.tasks.build_concurrency = Some(u64::from(count));
        }
        if let Some(count) = overrides.tasks_render_concurrency {
            self.tasks.render_concurrency = Some(u64::from(count));
        }
        if let Some(schedule) = overrides.reaper_schedule.as_ref() {
            self.reaper.schedule = Some(schedule.clone());
        }
    }

    fn apply_builder_overrides(&mut self, overrides: &BuilderOverrides) {
        if let Some(command) = overrides.command.as_ref() {
            self.builder.command = Some(command.clone());
        }
        if let Some(dir) = overrides.templates_dir.as_ref() {
            self.builder.templates_dir = Some(dir.clone());
        }
        if let Some(dir) = overrides.scratch_dir.as_ref() {
            self.builder.scratch_dir = Some(dir.clone());
        }
    }

    fn apply_reap_overrides(&mut self, args: &ReapArgs) {
        if let Some(dir) = args.directory.as_ref() {
            self.reaper.directory = Some(dir.clone());
        }
        if let Some(seconds) = args.max_age_seconds {
            self.reaper.max_age_seconds = Some(seconds);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            cache,
            rate_limit,
            adaptive,
            tasks,
            builder,
            reaper,
        } = raw;

        let builder = build_builder_settings(builder);
        let reaper = build_reaper_settings(reaper, &builder)?;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            cache: build_cache_settings(cache)?,
            rate_limit: build_rate_limit_settings(rate_limit)?,
            adaptive: build_adaptive_settings(adaptive)?,
            tasks: build_tasks_settings(tasks)?,
            builder,
            reaper,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    let addr = parse_socket_addr(&host, port).map_err(|err| LoadError::invalid("server.host", err))?;

    let graceful_shutdown = Duration::from_secs(
        server
            .graceful_shutdown_seconds
            .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS),
    );

    Ok(ServerSettings {
        addr,
        graceful_shutdown,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level.as_deref() {
        Some(value) => LevelFilter::from_str(value)
            .map_err(|_| LoadError::invalid("logging.level", format!("unknown level `{value}`")))?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let binary_ttl_secs = cache
        .binary_ttl_seconds
        .unwrap_or(DEFAULT_CACHE_BINARY_TTL_SECS);
    if binary_ttl_secs == 0 {
        return Err(LoadError::invalid(
            "cache.binary_ttl_seconds",
            "must be greater than zero",
        ));
    }

    let source_ttl_secs = cache
        .source_ttl_seconds
        .unwrap_or(DEFAULT_CACHE_SOURCE_TTL_SECS);
    if source_ttl_secs == 0 {
        return Err(LoadError::invalid(
            "cache.source_ttl_seconds",
            "must be greater than zero",
        ));
    }

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        binary_ttl: Duration::from_secs(binary_ttl_secs),
        source_ttl: Duration::from_secs(source_ttl_secs),
        schema_version: cache
            .schema_version
            .unwrap_or(crate::cache::DEFAULT_SCHEMA_VERSION),
    })
}

fn build_rate_limit_settings(
    rate_limit: RawRateLimitSettings,
) -> Result<RateLimitSettings, LoadError> {
    let requests_per_minute = non_zero_u32(
        rate_limit
            .requests_per_minute
            .unwrap_or(DEFAULT_RATE_LIMIT_REQUESTS_PER_MINUTE),
        "rate_limit.requests_per_minute",
    )?;
    let burst_size = non_zero_u32(
        rate_limit
            .burst_size
            .unwrap_or(DEFAULT_RATE_LIMIT_BURST_SIZE),
        "rate_limit.burst_size",
    )?;

    let state_ttl_secs = rate_limit
        .state_ttl_seconds
        .unwrap_or(DEFAULT_RATE_LIMIT_STATE_TTL_SECS);
    if state_ttl_secs == 0 {
        return Err(LoadError::invalid(
            "rate_limit.state_ttl_seconds",
            "must be greater than zero",
        ));
    }

    Ok(RateLimitSettings {
        enabled: rate_limit.enabled.unwrap_or(true),
        requests_per_minute,
        burst_size,
        state_ttl: Duration::from_secs(state_ttl_secs),
    })
}

fn build_adaptive_settings(adaptive: RawAdaptiveSettings) -> Result<AdaptiveSettings, LoadError> {
    let min_rate = adaptive.min_rate.unwrap_or(DEFAULT_ADAPTIVE_MIN_RATE);
    let max_rate = adaptive.max_rate.unwrap_or(DEFAULT_ADAPTIVE_MAX_RATE);
    if min_rate.is_nan() || min_rate <= 0.0 {
        return Err(LoadError::invalid(
            "adaptive.min_rate",
            "must be greater than zero",
        ));
    }
    if max_rate.is_nan() || max_rate < min_rate {
        return Err(LoadError::invalid(
            "adaptive.max_rate",
            format!("must be at least min_rate ({min_rate})"),
        ));
    }

    let response_time_high_secs = adaptive
        .response_time_high_secs
        .unwrap_or(DEFAULT_RESPONSE_TIME_HIGH_SECS);
    let response_time_medium_secs = adaptive
        .response_time_medium_secs
        .unwrap_or(DEFAULT_RESPONSE_TIME_MEDIUM_SECS);
    if response_time_medium_secs > response_time_high_secs {
        return Err(LoadError::invalid(
            "adaptive.response_time_medium_secs",
            "must not exceed response_time_high_secs",
        ));
    }

    let active_requests_high = adaptive
        .active_requests_high
        .unwrap_or(DEFAULT_ACTIVE_REQUESTS_HIGH);
    let active_requests_medium = adaptive
        .active_requests_medium
        .unwrap_or(DEFAULT_ACTIVE_REQUESTS_MEDIUM);
    if active_requests_medium > active_requests_high {
        return Err(LoadError::invalid(
            "adaptive.active_requests_medium",
            "must not exceed active_requests_high",
        ));
    }

    let cache_hit_rate_high = unit_fraction(
        adaptive
            .cache_hit_rate_high
            .unwrap_or(DEFAULT_CACHE_HIT_RATE_HIGH),
        "adaptive.cache_hit_rate_high",
    )?;
    let cache_hit_rate_medium = unit_fraction(
        adaptive
            .cache_hit_rate_medium
            .unwrap_or(DEFAULT_CACHE_HIT_RATE_MEDIUM),
        "adaptive.cache_hit_rate_medium",
    )?;

    Ok(AdaptiveSettings {
        enabled: adaptive.enabled.unwrap_or(true),
        min_rate,
        max_rate,
        response_time_high_secs,
        response_time_medium_secs,
        active_requests_high,
        active_requests_medium,
        cache_hit_rate_high,
        cache_hit_rate_medium,
        response_time_high_factor: positive_factor(
            adaptive
                .response_time_high_factor
                .unwrap_or(DEFAULT_RESPONSE_TIME_HIGH_FACTOR),
            "adaptive.response_time_high_factor",
        )?,
        response_time_medium_factor: positive_factor(
            adaptive
                .response_time_medium_factor
                .unwrap_or(DEFAULT_RESPONSE_TIME_MEDIUM_FACTOR),
            "adaptive.response_time_medium_factor",
        )?,
        active_requests_high_factor: positive_factor(
            adaptive
                .active_requests_high_factor
                .unwrap_or(DEFAULT_ACTIVE_REQUESTS_HIGH_FACTOR),
            "adaptive.active_requests_high_factor",
        )?,
        active_requests_medium_factor: positive_factor(
            adaptive
                .active_requests_medium_factor
                .unwrap_or(DEFAULT_ACTIVE_REQUESTS_MEDIUM_FACTOR),
            "adaptive.active_requests_medium_factor",
        )?,
        cache_hit_rate_high_factor: positive_factor(
            adaptive
                .cache_hit_rate_high_factor
                .unwrap_or(DEFAULT_CACHE_HIT_RATE_HIGH_FACTOR),
            "adaptive.cache_hit_rate_high_factor",
        )?,
        cache_hit_rate_medium_factor: positive_factor(
            adaptive
                .cache_hit_rate_medium_factor
                .unwrap_or(DEFAULT_CACHE_HIT_RATE_MEDIUM_FACTOR),
            "adaptive.cache_hit_rate_medium_factor",
        )?,
    })
}

fn build_tasks_settings(tasks: RawTasksSettings) -> Result<TasksSettings, LoadError> {
    let retry_base_delay = Duration::from_secs(
        tasks
            .retry_base_delay_seconds
            .unwrap_or(DEFAULT_RETRY_BASE_DELAY_SECS),
    );
    let retry_max_delay = Duration::from_secs(
        tasks
            .retry_max_delay_seconds
            .unwrap_or(DEFAULT_RETRY_MAX_DELAY_SECS),
    );
    if retry_max_delay < retry_base_delay {
        return Err(LoadError::invalid(
            "tasks.retry_max_delay_seconds",
            "must not be shorter than retry_base_delay_seconds",
        ));
    }

    let soft_time_limit = Duration::from_secs(
        tasks
            .soft_time_limit_seconds
            .unwrap_or(DEFAULT_SOFT_TIME_LIMIT_SECS),
    );
    let hard_time_limit = Duration::from_secs(
        tasks
            .hard_time_limit_seconds
            .unwrap_or(DEFAULT_HARD_TIME_LIMIT_SECS),
    );
    if hard_time_limit.is_zero() {
        return Err(LoadError::invalid(
            "tasks.hard_time_limit_seconds",
            "must be greater than zero",
        ));
    }
    if soft_time_limit > hard_time_limit {
        return Err(LoadError::invalid(
            "tasks.soft_time_limit_seconds",
            "must not exceed hard_time_limit_seconds",
        ));
    }

    let result_horizon_secs = tasks
        .result_horizon_seconds
        .unwrap_or(DEFAULT_RESULT_HORIZON_SECS);
    if result_horizon_secs == 0 {
        return Err(LoadError::invalid(
            "tasks.result_horizon_seconds",
            "must be greater than zero",
        ));
    }

    Ok(TasksSettings {
        build_concurrency: non_zero_u32(
            tasks.build_concurrency.unwrap_or(DEFAULT_BUILD_CONCURRENCY),
            "tasks.build_concurrency",
        )?,
        render_concurrency: non_zero_u32(
            tasks.render_concurrency.unwrap_or(DEFAULT_RENDER_CONCURRENCY),
            "tasks.render_concurrency",
        )?,
        batch_concurrency: non_zero_u32(
            tasks.batch_concurrency.unwrap_or(DEFAULT_BATCH_CONCURRENCY),
            "tasks.batch_concurrency",
        )?,
        cleanup_concurrency: non_zero_u32(
            tasks
                .cleanup_concurrency
                .unwrap_or(DEFAULT_CLEANUP_CONCURRENCY),
            "tasks.cleanup_concurrency",
        )?,
        max_tasks_per_worker: non_zero_u32(
            tasks
                .max_tasks_per_worker
                .unwrap_or(DEFAULT_MAX_TASKS_PER_WORKER),
            "tasks.max_tasks_per_worker",
        )?,
        retry_base_delay,
        retry_max_delay,
        soft_time_limit,
        hard_time_limit,
        result_horizon: Duration::from_secs(result_horizon_secs),
    })
}

fn build_builder_settings(builder: RawBuilderSettings) -> BuilderSettings {
    BuilderSettings {
        command: builder
            .command
            .unwrap_or_else(|| PathBuf::from(DEFAULT_BUILDER_COMMAND)),
        templates_dir: builder
            .templates_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_TEMPLATES_DIR)),
        scratch_dir: builder
            .scratch_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SCRATCH_DIR)),
    }
}

/// The reaper sweeps the builder's scratch directory unless told otherwise.
fn build_reaper_settings(
    reaper: RawReaperSettings,
    builder: &BuilderSettings,
) -> Result<ReaperSettings, LoadError> {
    let max_age_secs = reaper.max_age_seconds.unwrap_or(DEFAULT_REAPER_MAX_AGE_SECS);
    if max_age_secs == 0 {
        return Err(LoadError::invalid(
            "reaper.max_age_seconds",
            "must be greater than zero",
        ));
    }

    let expression = reaper
        .schedule
        .unwrap_or_else(|| DEFAULT_REAPER_SCHEDULE.to_string());
    let schedule = Schedule::from_str(&expression).map_err(|err| {
        LoadError::invalid("reaper.schedule", format!("invalid cron `{expression}`: {err}"))
    })?;

    Ok(ReaperSettings {
        enabled: reaper.enabled.unwrap_or(true),
        directory: reaper
            .directory
            .unwrap_or_else(|| builder.scratch_dir.clone()),
        max_age: Duration::from_secs(max_age_secs),
        schedule,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    binary_ttl_seconds: Option<u64>,
    source_ttl_seconds: Option<u64>,
    schema_version: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRateLimitSettings {
    enabled: Option<bool>,
    requests_per_minute: Option<u64>,
    burst_size: Option<u64>,
    state_ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawAdaptiveSettings {
    enabled: Option<bool>,
    min_rate: Option<f64>,
    max_rate: Option<f64>,
    response_time_high_secs: Option<f64>,
    response_time_medium_secs: Option<f64>,
    active_requests_high: Option<u64>,
    active_requests_medium: Option<u64>,
    cache_hit_rate_high: Option<f64>,
    cache_hit_rate_medium: Option<f64>,
    response_time_high_factor: Option<f64>,
    response_time_medium_factor: Option<f64>,
    active_requests_high_factor: Option<f64>,
    active_requests_medium_factor: Option<f64>,
    cache_hit_rate_high_factor: Option<f64>,
    cache_hit_rate_medium_factor: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawTasksSettings {
    build_concurrency: Option<u64>,
    render_concurrency: Option<u64>,
    batch_concurrency: Option<u64>,
    cleanup_concurrency: Option<u64>,
    max_tasks_per_worker: Option<u64>,
    retry_base_delay_seconds: Option<u64>,
    retry_max_delay_seconds: Option<u64>,
    soft_time_limit_seconds: Option<u64>,
    hard_time_limit_seconds: Option<u64>,
    result_horizon_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBuilderSettings {
    command: Option<PathBuf>,
    templates_dir: Option<PathBuf>,
    scratch_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawReaperSettings {
    enabled: Option<bool>,
    directory: Option<PathBuf>,
    max_age_seconds: Option<u64>,
    schedule: Option<String>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
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

/// Rate multipliers must be finite and positive; zero would pin the rate to `min_rate`.
fn positive_factor(value: f64, key: &'static str) -> Result<f64, LoadError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(LoadError::invalid(key, "must be a positive number"))
    }
}

fn unit_fraction(value: f64, key: &'static str) -> Result<f64, LoadError> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(LoadError::invalid(key, "must be between 0 and 1"))
    }
}
