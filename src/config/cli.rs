use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the pressroom binary.
#[derive(Debug, Parser)]
#[command(
    name = "pressroom",
    version,
    about = "Cached, rate-limited document build service"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "PRESSROOM_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP service, task workers and the scheduled reaper.
    Serve(Box<ServeArgs>),
    /// Sweep stale build artifacts once and print the report.
    Reap(ReapArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct BuilderOverrides {
    /// Override the build executable.
    #[arg(long = "builder-command", value_name = "PATH", value_hint = ValueHint::ExecutablePath)]
    pub command: Option<PathBuf>,

    /// Override the template root directory.
    #[arg(long = "builder-templates-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub templates_dir: Option<PathBuf>,

    /// Override the scratch directory for build inputs and outputs.
    #[arg(long = "builder-scratch-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub scratch_dir: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub builder: BuilderOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

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

    /// Enable or disable the artifact cache.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_enabled: Option<bool>,

    /// Enable or disable request rate limiting.
    #[arg(
        long = "rate-limit-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub rate_limit_enabled: Option<bool>,

    /// Override the sustained per-client request rate.
    #[arg(long = "rate-limit-requests-per-minute", value_name = "COUNT")]
    pub rate_limit_requests_per_minute: Option<u64>,

    /// Override the per-client burst allowance.
    #[arg(long = "rate-limit-burst-size", value_name = "COUNT")]
    pub rate_limit_burst_size: Option<u64>,

    /// Enable or disable load-based rate adjustment.
    #[arg(
        long = "adaptive-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub adaptive_enabled: Option<bool>,

    /// Override the build-artifact worker concurrency.
    #[arg(long = "tasks-build-concurrency", value_name = "COUNT")]
    pub tasks_build_concurrency: Option<u32>,

    /// Override the render-source worker concurrency.
    #[arg(long = "tasks-render-concurrency", value_name = "COUNT")]
    pub tasks_render_concurrency: Option<u32>,

    /// Override the cron schedule of the artifact reaper.
    #[arg(long = "reaper-schedule", value_name = "CRON")]
    pub reaper_schedule: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ReapArgs {
    /// Directory to sweep instead of the configured one.
    #[arg(long = "directory", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub directory: Option<PathBuf>,

    /// Override the age after which artifacts are removed.
    #[arg(long = "max-age-seconds", value_name = "SECONDS")]
    pub max_age_seconds: Option<u64>,
}
