//! SkyWatch weather pipeline.
//!
//! Polls the Open-Meteo `current_weather` endpoint for one station, reshapes
//! the payload into a flat [`WeatherRecord`], and appends it to the
//! `weather_logs` table in PostgreSQL. Three stages run strictly in sequence
//! per trigger:
//!
//! 1. [`OpenMeteoFetcher`] – one HTTP GET, body returned as [`RawWeatherPayload`]
//! 2. [`transform`] – pure extraction plus the wind alert flag
//! 3. [`PostgresLoader`] – idempotent table creation and a single insert
//!
//! [`Pipeline`] composes the stages and retries each failing stage;
//! [`scheduler::run`] triggers it on a cron schedule.
//!
//! This module follows the Explicit Module Boundary Pattern (EMBP): sibling
//! modules import shared types from the crate root rather than from each
//! other's files.

pub mod config;
pub mod routes;
pub mod scheduler;
pub mod schema;

mod error;
mod fetcher;
mod history;
mod loader;
mod models;
mod pipeline;
mod transformer;

pub use config::Config;
pub use error::{PipelineError, Stage};
pub use fetcher::{forecast_url, OpenMeteoFetcher, WeatherSource};
pub use history::{RunHistory, RunRecord, DEFAULT_HISTORY_CAPACITY};
pub use loader::{write_record, PostgresLoader, WeatherSink};
pub use models::{CurrentWeather, RawWeatherPayload, Station, WeatherLogRow, WeatherRecord};
pub use pipeline::{Pipeline, RetryPolicy, RunState, RunSummary};
pub use scheduler::{SchedulerError, TriggerSchedule};
pub use transformer::{transform, DEFAULT_WIND_ALERT_THRESHOLD};
