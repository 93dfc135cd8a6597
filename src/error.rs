//! Error taxonomy for a pipeline run.
//!
//! Every stage returns [`PipelineError`]; nothing is recovered locally. The
//! runner in `pipeline` decides whether a failed run is retried.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

// ---

/// The pipeline stage a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    Transform,
    Load,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Fetch => "fetch",
            Stage::Transform => "transform",
            Stage::Load => "load",
        };
        f.write_str(name)
    }
}

/// Failure of a single pipeline attempt.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The weather API answered with anything other than HTTP 200.
    #[error("Weather API returned HTTP {status}")]
    Retrieval { status: u16 },

    /// The request never completed, or the body was not valid JSON.
    #[error("Weather API request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The payload is not shaped like an Open-Meteo `current_weather` response.
    #[error("Malformed weather payload: {0}")]
    MalformedPayload(String),

    /// Connecting, creating the table, inserting, or committing failed.
    #[error("Failed to persist weather record: {0}")]
    Persistence(#[from] sqlx::Error),
}

impl PipelineError {
    // ---
    /// Stage that produced this error.
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Retrieval { .. } | PipelineError::Transport(_) => Stage::Fetch,
            PipelineError::MalformedPayload(_) => Stage::Transform,
            PipelineError::Persistence(_) => Stage::Load,
        }
    }

    /// HTTP status carried by a retrieval failure.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            PipelineError::Retrieval { status } => Some(*status),
            _ => None,
        }
    }
}
