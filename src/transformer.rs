//! Transformer stage: reshape the raw Open-Meteo payload into a [`WeatherRecord`].
//!
//! Pure and deterministic. Absent or `null` fields become `None` and are
//! stored as NULL; a field present with the wrong JSON type fails the run.

use serde_json::{Map, Value};

use crate::{CurrentWeather, PipelineError, RawWeatherPayload, WeatherRecord};

// ---

/// Wind speed (km/h) above which a record is flagged.
pub const DEFAULT_WIND_ALERT_THRESHOLD: f64 = 15.0;

/// Extract the `current_weather` block and build the flat record.
pub fn transform(
    payload: &RawWeatherPayload,
    city: &str,
    wind_alert_threshold: f64,
) -> Result<WeatherRecord, PipelineError> {
    // ---
    let root = payload.as_value().as_object().ok_or_else(|| {
        PipelineError::MalformedPayload(format!(
            "expected a JSON object, got {}",
            json_kind(payload.as_value())
        ))
    })?;

    let empty = Map::new();
    let current = match root.get("current_weather") {
        None | Some(Value::Null) => &empty,
        Some(Value::Object(fields)) => fields,
        Some(other) => {
            return Err(PipelineError::MalformedPayload(format!(
                "current_weather must be an object, got {}",
                json_kind(other)
            )))
        }
    };

    let observation = CurrentWeather {
        temperature: number_field(current, "temperature")?,
        windspeed: number_field(current, "windspeed")?,
        winddirection: number_field(current, "winddirection")?,
        weathercode: integer_field(current, "weathercode")?,
        time: string_field(current, "time")?,
    };

    let missing = observation.missing_fields();
    if !missing.is_empty() {
        tracing::warn!(?missing, "current_weather incomplete, storing NULL for missing fields");
    }

    Ok(WeatherRecord::new(city, observation, wind_alert_threshold))
}

// ---

fn present<'a>(fields: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    fields.get(key).filter(|v| !v.is_null())
}

fn number_field(fields: &Map<String, Value>, key: &str) -> Result<Option<f64>, PipelineError> {
    // ---
    match present(fields, key) {
        None => Ok(None),
        Some(value) => value.as_f64().map(Some).ok_or_else(|| {
            PipelineError::MalformedPayload(format!(
                "{key} must be a number, got {}",
                json_kind(value)
            ))
        }),
    }
}

fn integer_field(fields: &Map<String, Value>, key: &str) -> Result<Option<i32>, PipelineError> {
    // ---
    let Some(value) = present(fields, key) else {
        return Ok(None);
    };

    let as_int = match value.as_i64() {
        Some(n) => i32::try_from(n).ok(),
        // Accept integral floats such as `3.0`.
        None => value
            .as_f64()
            .filter(|f| f.fract() == 0.0 && *f >= i32::MIN as f64 && *f <= i32::MAX as f64)
            .map(|f| f as i32),
    };

    as_int.map(Some).ok_or_else(|| {
        PipelineError::MalformedPayload(format!("{key} must be an integer, got {value}"))
    })
}

fn string_field(fields: &Map<String, Value>, key: &str) -> Result<Option<String>, PipelineError> {
    // ---
    match present(fields, key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(PipelineError::MalformedPayload(format!(
            "{key} must be a string, got {}",
            json_kind(other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
