//! Fetcher stage: one GET against the Open-Meteo forecast endpoint.

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::{PipelineError, RawWeatherPayload, Station};

// ---

/// Anything that can produce the raw payload for a run.
#[async_trait]
pub trait WeatherSource: Send + Sync {
    async fn fetch(&self) -> Result<RawWeatherPayload, PipelineError>;
}

/// Build the forecast URL for a station.
pub fn forecast_url(base_url: &str, station: &Station) -> String {
    // ---
    format!(
        "{}/v1/forecast?latitude={}&longitude={}&current_weather=true",
        base_url.trim_end_matches('/'),
        station.latitude,
        station.longitude
    )
}

/// Fetches current conditions for a single station.
///
/// No timeout, pagination, or partial-response handling: a run either gets a
/// complete 200 body or fails.
#[derive(Debug, Clone)]
pub struct OpenMeteoFetcher {
    client: reqwest::Client,
    url: String,
}

impl OpenMeteoFetcher {
    // ---
    pub fn new(base_url: &str, station: &Station) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: forecast_url(base_url, station),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl WeatherSource for OpenMeteoFetcher {
    // ---
    async fn fetch(&self) -> Result<RawWeatherPayload, PipelineError> {
        // ---
        debug!("Fetching current weather from: {}", self.url);

        let response = self.client.get(&self.url).send().await?;
        let status = response.status();

        if status != StatusCode::OK {
            warn!(status = status.as_u16(), url = %self.url, "Weather API rejected request");
            return Err(PipelineError::Retrieval {
                status: status.as_u16(),
            });
        }

        let body: serde_json::Value = response.json().await?;
        debug!("Weather API raw response: {}", body);

        Ok(RawWeatherPayload::new(body))
    }
}
