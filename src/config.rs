//! Configuration loader for the `skywatch-weather` pipeline.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). Nothing else in the crate reads the environment;
//! stages receive the values they need at construction.
//!
//! Two named connections are resolved by id: `open_meteo_api` and
//! `postgres_default`. Each can be overridden with `CONN_<ID>`, e.g.
//! `CONN_POSTGRES_DEFAULT`.
use std::env;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use reqwest::Url;

use crate::history::DEFAULT_HISTORY_CAPACITY;
use crate::pipeline::RetryPolicy;
use crate::scheduler::{TriggerSchedule, DEFAULT_SCHEDULE};
use crate::transformer::DEFAULT_WIND_ALERT_THRESHOLD;
use crate::Station;

/// Connection id of the weather API.
pub const API_CONN_ID: &str = "open_meteo_api";

/// Connection id of the destination database.
pub const DB_CONN_ID: &str = "postgres_default";

/// Public Open-Meteo endpoint used when no connection is configured.
pub const DEFAULT_API_URL: &str = "https://api.open-meteo.com";

pub const DEFAULT_CITY: &str = "Cuenca_Azuay";
pub const DEFAULT_LATITUDE: &str = "-2.9002";
pub const DEFAULT_LONGITUDE: &str = "-79.0100";

/// Width of the `city` column.
const MAX_CITY_LEN: usize = 50;

/// Parse an optional environment variable with a default value.
macro_rules! parse_env {
    ($lookup:expr, $var_name:expr, $ty:ty, $default:expr) => {
        $lookup($var_name)
            .map(|v| v.trim().parse::<$ty>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Read an optional string environment variable with a default value.
macro_rules! string_env {
    ($lookup:expr, $var_name:expr, $default:expr) => {
        $lookup($var_name).unwrap_or_else(|| $default.to_string())
    };
}

/// A connection resolved by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedConnection {
    pub id: String,
    pub url: String,
}

/// Strongly typed pipeline configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// Observation site (city name and coordinates).
    pub station: Station,

    /// Weather API base URL.
    pub api: NamedConnection,

    /// PostgreSQL connection string.
    pub db: NamedConnection,

    /// Wind speed (km/h) above which a record is flagged.
    pub wind_alert_threshold: f64,

    /// When runs are triggered.
    pub schedule: TriggerSchedule,

    /// Per-stage retries and delay between attempts.
    pub retry: RetryPolicy,

    /// Number of runs kept for `/runs`.
    pub history_capacity: usize,

    /// Port of the status HTTP server.
    pub http_port: u16,
}

/// Environment variable that overrides a named connection.
pub fn connection_env_var(conn_id: &str) -> String {
    format!("CONN_{}", conn_id.to_ascii_uppercase())
}

/// Load configuration from the process environment.
///
/// Required:
/// - `DATABASE_URL` (or `CONN_POSTGRES_DEFAULT`) – PostgreSQL connection string
///
/// Optional:
/// - `WEATHER_API_URL` (or `CONN_OPEN_METEO_API`) – API base URL (default: public Open-Meteo)
/// - `CITY_NAME`, `LATITUDE`, `LONGITUDE` – station (default: Cuenca_Azuay, -2.9002, -79.0100)
/// - `WIND_ALERT_THRESHOLD` – km/h (default: 15)
/// - `PIPELINE_SCHEDULE` – cron expression (default: `@hourly`)
/// - `PIPELINE_RETRIES` – retries per stage (default: 2)
/// - `RETRY_DELAY_SECS` – delay between attempts (default: 300)
/// - `RUN_HISTORY_CAPACITY` – runs kept in memory (default: 100)
/// - `HTTP_PORT` – status server port (default: 8080)
///
/// Returns an error if any required variable is missing or any value is invalid.
pub fn load_from_env() -> Result<Config> {
    load_with(|name| env::var(name).ok())
}

/// Load configuration through an arbitrary variable lookup.
pub fn load_with<F>(lookup: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    // ---
    let db = resolve_connection(&lookup, DB_CONN_ID, "DATABASE_URL", None)?;
    let api = resolve_connection(&lookup, API_CONN_ID, "WEATHER_API_URL", Some(DEFAULT_API_URL))?;

    let station = Station {
        city: string_env!(lookup, "CITY_NAME", DEFAULT_CITY),
        latitude: string_env!(lookup, "LATITUDE", DEFAULT_LATITUDE),
        longitude: string_env!(lookup, "LONGITUDE", DEFAULT_LONGITUDE),
    };
    validate_station(&station)?;

    let wind_alert_threshold =
        parse_env!(lookup, "WIND_ALERT_THRESHOLD", f64, DEFAULT_WIND_ALERT_THRESHOLD);
    if !wind_alert_threshold.is_finite() {
        bail!("Invalid WIND_ALERT_THRESHOLD: must be a finite number");
    }

    let schedule_expr = string_env!(lookup, "PIPELINE_SCHEDULE", DEFAULT_SCHEDULE);
    let schedule = TriggerSchedule::parse(&schedule_expr)?;

    let retries = parse_env!(lookup, "PIPELINE_RETRIES", u32, RetryPolicy::DEFAULT_RETRIES);
    let retry_delay_secs = parse_env!(
        lookup,
        "RETRY_DELAY_SECS",
        u64,
        RetryPolicy::DEFAULT_DELAY.as_secs()
    );
    let history_capacity = parse_env!(lookup, "RUN_HISTORY_CAPACITY", usize, DEFAULT_HISTORY_CAPACITY);
    let http_port = parse_env!(lookup, "HTTP_PORT", u16, 8080);

    Ok(Config {
        station,
        api,
        db,
        wind_alert_threshold,
        schedule,
        retry: RetryPolicy {
            retries,
            delay: Duration::from_secs(retry_delay_secs),
        },
        history_capacity,
        http_port,
    })
}

/// Resolve a named connection: `CONN_<ID>` first, then the plain variable,
/// then the default if there is one.
fn resolve_connection<F>(
    lookup: &F,
    conn_id: &str,
    fallback_var: &str,
    default: Option<&str>,
) -> Result<NamedConnection>
where
    F: Fn(&str) -> Option<String>,
{
    // ---
    let conn_var = connection_env_var(conn_id);
    let url = lookup(&conn_var)
        .or_else(|| lookup(fallback_var))
        .or_else(|| default.map(str::to_string))
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| {
            anyhow!(
                "{} (or {}) must be set in .env or environment",
                fallback_var,
                conn_var
            )
        })?;

    Ok(NamedConnection {
        id: conn_id.to_string(),
        url: url.trim().to_string(),
    })
}

fn validate_station(station: &Station) -> Result<()> {
    // ---
    if station.city.trim().is_empty() {
        bail!("Invalid CITY_NAME: must not be empty");
    }
    if station.city.chars().count() > MAX_CITY_LEN {
        bail!("Invalid CITY_NAME: longer than {} characters", MAX_CITY_LEN);
    }
    check_coordinate("LATITUDE", &station.latitude, 90.0)?;
    check_coordinate("LONGITUDE", &station.longitude, 180.0)?;
    Ok(())
}

fn check_coordinate(name: &str, value: &str, limit: f64) -> Result<()> {
    let parsed: f64 = value
        .parse()
        .map_err(|e| anyhow!("Invalid {}: {}", name, e))?;
    if !(-limit..=limit).contains(&parsed) {
        bail!("Invalid {}: {} is outside ±{}", name, value, limit);
    }
    Ok(())
}

/// Mask the password component of a connection URL.
///
/// Strings that do not parse as a URL, or carry no password, are returned
/// unchanged.
pub fn mask_password(url: &str) -> String {
    // ---
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };
    if parsed.password().is_none() || parsed.set_password(Some("****")).is_err() {
        return url.to_string();
    }
    parsed.to_string()
}

impl Config {
    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks the database password while showing all other values.
    pub fn log_config(&self) {
        // ---
        tracing::info!("Configuration loaded:");
        tracing::info!("  CITY_NAME            : {}", self.station.city);
        tracing::info!("  LATITUDE             : {}", self.station.latitude);
        tracing::info!("  LONGITUDE            : {}", self.station.longitude);
        tracing::info!("  {:<20} : {}", self.api.id, self.api.url);
        tracing::info!("  {:<20} : {}", self.db.id, mask_password(&self.db.url));
        tracing::info!("  WIND_ALERT_THRESHOLD : {}", self.wind_alert_threshold);
        tracing::info!("  PIPELINE_SCHEDULE    : {}", self.schedule.expression());
        tracing::info!("  PIPELINE_RETRIES     : {}", self.retry.retries);
        tracing::info!("  RETRY_DELAY_SECS     : {}", self.retry.delay.as_secs());
        tracing::info!("  RUN_HISTORY_CAPACITY : {}", self.history_capacity);
        tracing::info!("  HTTP_PORT            : {}", self.http_port);
    }
}
