//! Application entry point for the `codemetal-fieldstate` service.
//!
//! This binary orchestrates the full startup sequence:
//! - Initializing structured logging/tracing
//! - Loading configuration from environment variables or `.env`
//! - Opening the store (PostgreSQL when `DATABASE_URL` is set, in-memory
//!   otherwise) and creating the schema if it does not exist
//! - Seeding the reconciler from the persisted positions and the current
//!   anomaly snapshot, then starting the background collectors
//! - Mounting all API routes via the `routes` gateway (EMBP pattern)
//! - Serving HTTP until Ctrl-C, then cancelling every background task
//!
//! # Environment Variables
//! - `DATABASE_URL` (optional) – PostgreSQL connection string
//! - `AXUM_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `AXUM_SPAN_EVENTS` (optional) – span event mode for tracing
//! - see [`fieldstate::config`] for the rest
use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use fieldstate::upstream::build_http_client;
use fieldstate::{
    config, routes, schema, AggregationEngine, AnomalySnapshot, AppState, Collector,
    CollectorIntervals, Config, Deduplicator, DeviceStateSnapshot, HealthTallySource,
    HttpHealthTally, HttpNarrativeGenerator, LocalFeed, NarrativeGenerator, PgStore, Reconciler,
    ReportCompiler, SensorRegistry, SnapshotChannel, StaticHealthTally, Stores,
    UnconfiguredNarrative,
};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing();
    dotenv().ok();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let stores = open_stores(&cfg).await?;
    let overrides = stores
        .positions
        .load_all()
        .await
        .context("Failed to load persisted sensor positions")?;
    tracing::info!("Loaded {} persisted sensor position(s)", overrides.len());

    let anomaly_feed = LocalFeed::<AnomalySnapshot>::new();
    let device_feed = LocalFeed::<DeviceStateSnapshot>::new();
    let initial = anomaly_feed.current_snapshot().await?;

    let cancel = CancellationToken::new();
    let registry = SensorRegistry::new(cfg.bindings(), cfg.field_center, overrides);
    let (reconciler, reconciler_task) =
        Reconciler::new(registry, Deduplicator::new(), &initial).spawn(cancel.clone());

    let collector = Collector::new(
        reconciler.clone(),
        Arc::clone(&stores.roster),
        Arc::clone(&stores.readings),
        Arc::new(anomaly_feed.clone()),
        Arc::new(device_feed.clone()),
        CollectorIntervals {
            roster: cfg.roster_poll,
            readings: cfg.reading_poll,
            resubscribe: cfg.resubscribe_delay,
        },
    );
    let mut tasks = collector.start(&cancel);
    tasks.push(reconciler_task);

    let engine = AggregationEngine::new(Arc::clone(&stores.readings));
    let reports = report_compiler(&cfg, engine.clone())?;

    // Build app from routes gateway (EMBP)
    let app: Router = routes::router(AppState {
        stores,
        engine,
        reports,
        reconciler,
        anomaly_feed,
        device_feed,
    });

    tracing::info!("Listening on {}", cfg.bind_addr);
    let listener = tokio::net::TcpListener::bind(cfg.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", cfg.bind_addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down background tasks");
    cancel.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            tracing::warn!("Background task ended abnormally: {}", e);
        }
    }
    Ok(())
}

// ---

/// Open PostgreSQL when configured, otherwise an in-memory store.
async fn open_stores(cfg: &Config) -> Result<Stores> {
    // ---
    let Some(db_url) = cfg.db_url.as_deref() else {
        tracing::warn!("DATABASE_URL not set, using in-memory store (data is lost on exit)");
        return Ok(Stores::memory());
    };

    tracing::info!("Attempting to connect to database");
    let store = PgStore::connect(db_url, cfg.db_pool_max)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Successfully connected to database");

    schema::create_schema(store.pool())
        .await
        .context("Failed to create database schema")?;
    Ok(Stores::postgres(store))
}

/// Wire the report compiler to whichever collaborators are configured.
fn report_compiler(cfg: &Config, engine: AggregationEngine) -> Result<ReportCompiler> {
    // ---
    let client = build_http_client(cfg.upstream_timeout).context("Failed to build HTTP client")?;

    let health: Arc<dyn HealthTallySource> = match &cfg.health_tally_url {
        Some(url) => Arc::new(HttpHealthTally::new(client.clone(), url)),
        None => {
            tracing::info!("HEALTH_TALLY_URL not set, reports carry a zero tally");
            Arc::new(StaticHealthTally::default())
        }
    };
    let narrative: Arc<dyn NarrativeGenerator> = match &cfg.narrative_url {
        Some(url) => Arc::new(HttpNarrativeGenerator::new(
            client,
            url,
            cfg.narrative_api_key.clone(),
        )),
        None => {
            tracing::info!("NARRATIVE_URL not set, reports use the fallback narrative");
            Arc::new(UnconfiguredNarrative)
        }
    };

    Ok(ReportCompiler::new(engine, health, narrative))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        // Without a signal handler, run until killed
        std::future::pending::<()>().await;
    }
    tracing::info!("Ctrl-C received");
}

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `AXUM_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level from `RUST_LOG`, else the `AXUM_LOG_LEVEL` env var
///
/// Call once at startup before any logging macros are invoked.
fn init_tracing() {
    // ---
    let span_events = match env::var("AXUM_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("AXUM_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
