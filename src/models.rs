//! Simple data models for the weather pipeline.

use chrono::NaiveDateTime;
use serde::Serialize;
use serde_json::Value;

// ---

/// Untyped JSON body returned by the weather API.
///
/// Created once per run by the fetcher and consumed once by the transformer.
#[derive(Debug, Clone, PartialEq)]
pub struct RawWeatherPayload(Value);

impl RawWeatherPayload {
    // ---
    pub fn new(body: Value) -> Self {
        Self(body)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_inner(self) -> Value {
        self.0
    }
}

impl From<Value> for RawWeatherPayload {
    fn from(body: Value) -> Self {
        Self::new(body)
    }
}

/// The fixed observation site.
///
/// Coordinates stay in their configured decimal form so the request URL
/// carries them verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Station {
    // ---
    pub city: String,
    pub latitude: String,
    pub longitude: String,
}

/// The `current_weather` fields the pipeline cares about, as typed values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CurrentWeather {
    // ---
    pub temperature: Option<f64>,
    pub windspeed: Option<f64>,
    pub winddirection: Option<f64>,
    pub weathercode: Option<i32>,
    pub time: Option<String>,
}

impl CurrentWeather {
    // ---
    /// Names of the upstream fields that were absent or null.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        // ---
        let mut missing = Vec::new();
        if self.temperature.is_none() {
            missing.push("temperature");
        }
        if self.windspeed.is_none() {
            missing.push("windspeed");
        }
        if self.winddirection.is_none() {
            missing.push("winddirection");
        }
        if self.weathercode.is_none() {
            missing.push("weathercode");
        }
        if self.time.is_none() {
            missing.push("time");
        }
        missing
    }
}

/// Flat record handed from the transformer to the loader.
///
/// `alert_flag` is fixed when the record is built and has no setter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherRecord {
    // ---
    pub city: String,
    pub temperature: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_direction: Option<f64>,
    pub condition_code: Option<i32>,
    pub observed_at: Option<String>,
    alert_flag: bool,
}

impl WeatherRecord {
    // ---
    /// Build a record from an observation, deriving the wind alert.
    ///
    /// Missing wind speed counts as 0, so an empty observation never alerts.
    pub fn new(city: impl Into<String>, current: CurrentWeather, wind_alert_threshold: f64) -> Self {
        // ---
        let alert_flag = current.windspeed.unwrap_or(0.0) > wind_alert_threshold;

        WeatherRecord {
            city: city.into(),
            temperature: current.temperature,
            wind_speed: current.windspeed,
            wind_direction: current.winddirection,
            condition_code: current.weathercode,
            observed_at: current.time,
            alert_flag,
        }
    }

    pub fn alert_flag(&self) -> bool {
        self.alert_flag
    }
}

/// A persisted row of `weather_logs`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WeatherLogRow {
    // ---
    pub id: i32,
    pub city: Option<String>,
    pub temp: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_dir: Option<f64>,
    pub condition_code: Option<i32>,
    pub alert_flag: Option<bool>,
    pub recorded_at: Option<NaiveDateTime>,
    pub ingested_at: Option<NaiveDateTime>,
}
