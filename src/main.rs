use std::{process, sync::Arc, time::SystemTime};

use apalis::prelude::{Monitor, WorkerBuilder, WorkerFactoryFn};
use apalis_cron::CronStream;
use pressroom::{
    application::{
        builder::{Builder, TemplateRegistry},
        documents::DocumentService,
        error::AppError,
        tasks::{
            BatchHandler, Broker, BuildHandler, CleanupHandler, HandlerRegistry, PipelineConfig,
            ReapJobContext, ReaperConfig, TaskKind, TaskPipeline, WorkerConfig, WorkerPool,
            process_reap_job, reap,
        },
    },
    cache::{CacheConfig, DocumentCache},
    config,
    infra::{
        builder::CommandBuilder,
        error::InfraError,
        http::{self, AppState},
        kv::{KvStore, MemoryStore},
        telemetry,
        templates::DirectoryTemplates,
    },
    limiter::{AdaptiveConfig, AdaptiveController, LoadTracker, RateLimitConfig, RateLimiter},
    util::clock::{Clock, SystemClock},
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Reap(_) => run_reap(settings).await,
    }
}

struct ApplicationContext {
    state: AppState,
    pipeline: Arc<TaskPipeline>,
    registry: Arc<HandlerRegistry>,
}

fn build_application_context(settings: &config::Settings) -> ApplicationContext {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store: Arc<dyn KvStore> = Arc::new(MemoryStore::with_clock(clock.clone()));

    let cache = Arc::new(DocumentCache::new(
        store.clone(),
        CacheConfig::from(&settings.cache),
    ));
    let builder: Arc<dyn Builder> = Arc::new(CommandBuilder::new(
        settings.builder.command.clone(),
        settings.builder.templates_dir.clone(),
        settings.builder.scratch_dir.clone(),
    ));
    let templates: Arc<dyn TemplateRegistry> =
        Arc::new(DirectoryTemplates::new(settings.builder.templates_dir.clone()));
    let documents = Arc::new(
        DocumentService::new(cache.clone(), builder, templates)
            .with_build_timeout(settings.tasks.hard_time_limit),
    );

    let pipeline = Arc::new(TaskPipeline::new(
        store.clone(),
        Arc::new(Broker::new()),
        clock.clone(),
        PipelineConfig::from(&settings.tasks),
    ));

    let build_handler = Arc::new(BuildHandler::new(
        documents.clone(),
        settings.builder.scratch_dir.clone(),
    ));
    let registry = Arc::new(
        HandlerRegistry::new()
            .register(TaskKind::BuildArtifact, build_handler.clone())
            .register(TaskKind::RenderSource, build_handler)
            .register(
                TaskKind::Batch,
                Arc::new(BatchHandler::new(pipeline.clone())),
            )
            .register(
                TaskKind::Cleanup,
                Arc::new(CleanupHandler::new(ReaperConfig::from(&settings.reaper))),
            ),
    );

    let rate_limit = RateLimitConfig::from(&settings.rate_limit);
    let base_rate = f64::from(rate_limit.requests_per_minute);
    let limiter = Arc::new(RateLimiter::new(store.clone(), clock.clone(), rate_limit));
    let adaptive = Arc::new(AdaptiveController::new(
        store,
        AdaptiveConfig::from(&settings.adaptive),
        base_rate,
    ));
    let load = Arc::new(LoadTracker::new(clock));

    let state = AppState {
        documents,
        cache,
        pipeline: pipeline.clone(),
        limiter,
        adaptive,
        load,
    };

    ApplicationContext {
        state,
        pipeline,
        registry,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let app = build_application_context(&settings);

    let workers = WorkerPool::new(
        app.pipeline.clone(),
        app.registry.clone(),
        WorkerConfig::from(&settings.tasks),
    )
    .spawn();

    let monitor_handle = settings
        .reaper
        .enabled
        .then(|| spawn_reaper_monitor(&settings.reaper, app.pipeline.clone()));

    let result = serve_http(&settings, app.state).await;

    if let Some(handle) = monitor_handle {
        handle.abort();
        let _ = handle.await;
    }

    if tokio::time::timeout(settings.server.graceful_shutdown, workers.shutdown())
        .await
        .is_err()
    {
        warn!(
            target = "pressroom::serve",
            timeout_secs = settings.server.graceful_shutdown.as_secs(),
            "task workers did not stop before the shutdown deadline"
        );
    }

    result
}

async fn run_reap(settings: config::Settings) -> Result<(), AppError> {
    let config = ReaperConfig::from(&settings.reaper);

    info!(
        target = "pressroom::reap",
        directory = %config.directory.display(),
        max_age_secs = config.max_age.as_secs(),
        "Starting reap"
    );

    let report = tokio::task::spawn_blocking(move || reap(&config, SystemTime::now()))
        .await
        .map_err(|err| AppError::unexpected(format!("reap task failed: {err}")))?
        .map_err(|err| AppError::unexpected(err.to_string()))?;

    let rendered = serde_json::to_string_pretty(&report)
        .map_err(|err| AppError::unexpected(format!("failed to encode report: {err}")))?;
    println!("{rendered}");
    Ok(())
}

/// Periodic sweep. Each firing queues a `cleanup` task rather than reaping inline.
fn spawn_reaper_monitor(
    reaper: &config::ReaperSettings,
    pipeline: Arc<TaskPipeline>,
) -> tokio::task::JoinHandle<()> {
    let reaper_worker = WorkerBuilder::new("reaper-worker")
        .data(ReapJobContext { pipeline })
        .backend(CronStream::new(reaper.schedule.clone()))
        .build_fn(process_reap_job);

    let monitor = Monitor::new().register(reaper_worker);

    tokio::spawn(async move {
        if let Err(err) = monitor.run().await {
            error!(error = %err, "reaper monitor stopped");
        }
    })
}

async fn serve_http(settings: &config::Settings, state: AppState) -> Result<(), AppError> {
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "pressroom::serve",
        addr = %settings.server.addr,
        "HTTP listener ready"
    );

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!(target = "pressroom::serve", "shutdown signal received");
}
