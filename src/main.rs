//! Application entry point for the `skywatch-weather` pipeline.
//!
//! This binary orchestrates the full startup sequence:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Wiring the fetcher, transformer, and loader into a [`Pipeline`]
//! - Serving the read-only status API (`/health`, `/runs`)
//! - Triggering the pipeline on its cron schedule until SIGINT/SIGTERM
//!
//! # Environment Variables
//! - `DATABASE_URL` (**required**) – PostgreSQL connection string
//! - `SKYWATCH_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `SKYWATCH_SPAN_EVENTS` (optional) – span event mode for tracing
//!
//! See `config.rs` for the remaining pipeline settings.
use std::{env, net::SocketAddr};

use dotenvy::dotenv;
use is_terminal::IsTerminal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use anyhow::Result;

use skywatch_weather::{config, routes, scheduler, OpenMeteoFetcher, Pipeline, PostgresLoader, RunHistory};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    init_tracing();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let history = RunHistory::new(cfg.history_capacity);

    let fetcher = OpenMeteoFetcher::new(&cfg.api.url, &cfg.station);
    let loader = PostgresLoader::new(cfg.db.url.clone());
    let pipeline = Pipeline::new(fetcher, loader, cfg.station.city.clone(), history.clone())
        .with_wind_alert_threshold(cfg.wind_alert_threshold)
        .with_retry_policy(cfg.retry);

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let app = routes::router(history);
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.http_port));
    tracing::info!("Status API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server_token = cancel.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_token.cancelled().await })
            .await
    });

    scheduler::run(&pipeline, &cfg.schedule, cancel.clone()).await;

    // The scheduler can also stop on its own (exhausted schedule).
    cancel.cancel();
    server.await??;

    tracing::info!("Shutdown complete");
    Ok(())
}

// ---

/// Cancel `token` on SIGINT, or SIGTERM on Unix.
fn spawn_signal_handler(token: CancellationToken) {
    // ---
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Received shutdown signal");
                ctrl_c_token.cancel();
            }
            Err(err) => tracing::error!("Error setting up signal handler: {}", err),
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
                token.cancel();
            }
            Err(err) => tracing::error!("Error setting up SIGTERM handler: {}", err),
        }
    });
}

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `SKYWATCH_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by `RUST_LOG`, else the `SKYWATCH_LOG_LEVEL` env var
///
/// Call once at startup before any logging macros are invoked.
fn init_tracing() {
    // ---
    let span_events = match env::var("SKYWATCH_SPAN_EVENTS").as_deref() {
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
        let level = match env::var("SKYWATCH_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn,hyper=info,reqwest=info"))
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
