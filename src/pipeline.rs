//! Explicit pipeline runner: fetch → transform → load, with per-stage retry.
//!
//! A run either completes all three stages or fails as a whole. Fetch and
//! load each get their own attempts; a retried load reuses the record built
//! from the first successful fetch.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::transformer::{transform, DEFAULT_WIND_ALERT_THRESHOLD};
use crate::{
    PipelineError, RunHistory, RunRecord, Stage, WeatherRecord, WeatherSink, WeatherSource,
};

// ---

/// Lifecycle of a triggered run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Triggered,
    Fetching,
    Transforming,
    Loading,
    Succeeded,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Triggered => "triggered",
            RunState::Fetching => "fetching",
            RunState::Transforming => "transforming",
            RunState::Loading => "loading",
            RunState::Succeeded => "succeeded",
            RunState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Retries per stage and the fixed pause between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_RETRIES: u32 = 2;
    pub const DEFAULT_DELAY: Duration = Duration::from_secs(300);

    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: Self::DEFAULT_RETRIES,
            delay: Self::DEFAULT_DELAY,
        }
    }
}

/// Result of one successful attempt.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub row_id: i32,
    pub record: WeatherRecord,
}

/// The three stages wired together for one station.
pub struct Pipeline<S, K> {
    source: S,
    sink: K,
    city: String,
    wind_alert_threshold: f64,
    retry: RetryPolicy,
    history: RunHistory,
}

impl<S, K> Pipeline<S, K>
where
    S: WeatherSource,
    K: WeatherSink,
{
    // ---
    /// Defaults: wind threshold 15 km/h, 2 retries 300 s apart.
    pub fn new(source: S, sink: K, city: impl Into<String>, history: RunHistory) -> Self {
        Self {
            source,
            sink,
            city: city.into(),
            wind_alert_threshold: DEFAULT_WIND_ALERT_THRESHOLD,
            retry: RetryPolicy::default(),
            history,
        }
    }

    pub fn with_wind_alert_threshold(mut self, threshold: f64) -> Self {
        self.wind_alert_threshold = threshold;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn history(&self) -> &RunHistory {
        &self.history
    }

    /// Execute the three stages once, stopping at the first failure.
    pub async fn run_once(&self) -> Result<RunSummary, PipelineError> {
        // ---
        debug!(state = %RunState::Fetching);
        let payload = self.source.fetch().await?;

        debug!(state = %RunState::Transforming);
        let record = transform(&payload, &self.city, self.wind_alert_threshold)?;

        debug!(state = %RunState::Loading);
        let row_id = self.sink.load(&record).await?;

        Ok(RunSummary { row_id, record })
    }

    /// Run with the configured retry policy and record the outcome.
    ///
    /// Fetch and load are retried on their own: a failed load is retried
    /// with the record already built, never with a fresh fetch. The
    /// transform is pure, so it is not retried. Cancellation is only
    /// observed during the pause between attempts; the last error is
    /// recorded in that case.
    pub async fn run_with_retries(&self, cancel: &CancellationToken) -> RunRecord {
        // ---
        let run_id = Uuid::new_v4();
        let triggered_at = Utc::now();

        info!(%run_id, city = %self.city, state = %RunState::Triggered, "Starting pipeline run");

        let (attempts, outcome) = self.run_stages(run_id, cancel).await;

        let record = match &outcome {
            Ok(summary) => {
                info!(
                    %run_id,
                    attempts,
                    row_id = summary.row_id,
                    alert = summary.record.alert_flag(),
                    state = %RunState::Succeeded,
                    "Pipeline run complete"
                );
                RunRecord::succeeded(
                    run_id,
                    triggered_at,
                    attempts,
                    summary.row_id,
                    summary.record.alert_flag(),
                )
            }
            Err(e) => {
                error!(
                    %run_id,
                    attempts,
                    stage = %e.stage(),
                    error = %e,
                    state = %RunState::Failed,
                    "Pipeline run failed"
                );
                RunRecord::failed(run_id, triggered_at, attempts, e)
            }
        };

        self.history.push(record.clone());
        record
    }

    /// Thread the stages together, retrying fetch and load independently.
    ///
    /// Returns the most attempts any single stage needed.
    async fn run_stages(
        &self,
        run_id: Uuid,
        cancel: &CancellationToken,
    ) -> (u32, Result<RunSummary, PipelineError>) {
        // ---
        debug!(%run_id, state = %RunState::Fetching);
        let (fetch_attempts, fetched) = self
            .retry_stage(Stage::Fetch, run_id, cancel, || self.source.fetch())
            .await;
        let payload = match fetched {
            Ok(payload) => payload,
            Err(e) => return (fetch_attempts, Err(e)),
        };

        debug!(%run_id, state = %RunState::Transforming);
        let record = match transform(&payload, &self.city, self.wind_alert_threshold) {
            Ok(record) => record,
            Err(e) => return (fetch_attempts, Err(e)),
        };

        debug!(%run_id, state = %RunState::Loading);
        let (load_attempts, loaded) = self
            .retry_stage(Stage::Load, run_id, cancel, || self.sink.load(&record))
            .await;

        let attempts = fetch_attempts.max(load_attempts);
        (attempts, loaded.map(|row_id| RunSummary { row_id, record }))
    }

    /// Call `op` until it succeeds, the policy is exhausted, or `cancel` fires.
    async fn retry_stage<T, F, Fut>(
        &self,
        stage: Stage,
        run_id: Uuid,
        cancel: &CancellationToken,
        mut op: F,
    ) -> (u32, Result<T, PipelineError>)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        // ---
        let max_attempts = self.retry.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let span = info_span!("stage", %run_id, %stage, attempt);

            match op().instrument(span).await {
                Ok(value) => return (attempt, Ok(value)),
                Err(e) if attempt < max_attempts => {
                    warn!(
                        %run_id,
                        %stage,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Stage failed, retrying in {:?}",
                        self.retry.delay
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            info!(%run_id, "Shutdown requested, abandoning retries");
                            return (attempt, Err(e));
                        }
                        _ = tokio::time::sleep(self.retry.delay) => {}
                    }
                }
                Err(e) => return (attempt, Err(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::RawWeatherPayload;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays scripted fetch results, then fails with HTTP 500 once the script is empty.
    struct ScriptedSource {
        script: Mutex<VecDeque<Result<RawWeatherPayload, PipelineError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<RawWeatherPayload, PipelineError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl WeatherSource for ScriptedSource {
        async fn fetch(&self) -> Result<RawWeatherPayload, PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(PipelineError::Retrieval { status: 500 }))
        }
    }

    /// Records loaded rows; fails the first `failures` calls.
    #[derive(Default)]
    struct RecordingSink {
        loaded: Mutex<Vec<WeatherRecord>>,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl WeatherSink for RecordingSink {
        async fn load(&self, record: &WeatherRecord) -> Result<i32, PipelineError> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(PipelineError::Persistence(sqlx::Error::PoolTimedOut));
            }
            let mut loaded = self.loaded.lock().unwrap();
            loaded.push(record.clone());
            Ok(loaded.len() as i32)
        }
    }

    fn payload(windspeed: f64) -> RawWeatherPayload {
        RawWeatherPayload::new(json!({
            "current_weather": {
                "temperature": 18.2,
                "windspeed": windspeed,
                "winddirection": 180,
                "weathercode": 3,
                "time": "2024-12-20T10:00"
            }
        }))
    }

    fn no_delay(retries: u32) -> RetryPolicy {
        RetryPolicy {
            retries,
            delay: Duration::ZERO,
        }
    }

    fn pipeline(
        source: ScriptedSource,
        sink: RecordingSink,
    ) -> Pipeline<ScriptedSource, RecordingSink> {
        Pipeline::new(source, sink, "Cuenca_Azuay", RunHistory::default())
            .with_retry_policy(no_delay(2))
    }

    #[tokio::test]
    async fn run_once_threads_each_stage() {
        // ---
        let p = pipeline(ScriptedSource::new(vec![Ok(payload(22.0))]), RecordingSink::default());

        let summary = p.run_once().await.unwrap();
        assert_eq!(summary.row_id, 1);
        assert!(summary.record.alert_flag());

        let loaded = p.sink.loaded.lock().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].city, "Cuenca_Azuay");
        assert_eq!(loaded[0].observed_at.as_deref(), Some("2024-12-20T10:00"));
    }

    #[tokio::test]
    async fn fetch_failure_never_reaches_loader() {
        // ---
        let source = ScriptedSource::new(vec![
            Err(PipelineError::Retrieval { status: 503 }),
            Err(PipelineError::Retrieval { status: 503 }),
            Err(PipelineError::Retrieval { status: 503 }),
        ]);
        let p = pipeline(source, RecordingSink::default());

        let record = p.run_with_retries(&CancellationToken::new()).await;

        assert_eq!(record.status, RunState::Failed);
        assert_eq!(record.attempts, 3);
        assert_eq!(record.failed_stage, Some(Stage::Fetch));
        assert_eq!(record.error.as_deref(), Some("Weather API returned HTTP 503"));
        assert_eq!(p.source.calls.load(Ordering::SeqCst), 3);
        assert!(p.sink.loaded.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_payload_never_reaches_loader() {
        // ---
        let source = ScriptedSource::new(vec![Ok(RawWeatherPayload::new(json!("oops")))]);
        let p = pipeline(source, RecordingSink::default()).with_retry_policy(no_delay(0));

        let record = p.run_with_retries(&CancellationToken::new()).await;

        assert_eq!(record.attempts, 1);
        assert_eq!(record.failed_stage, Some(Stage::Transform));
        assert!(p.sink.loaded.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn succeeds_on_a_later_attempt() {
        // ---
        let source = ScriptedSource::new(vec![Ok(payload(5.0)), Ok(payload(5.0))]);
        let sink = RecordingSink {
            failures: AtomicUsize::new(1),
            ..Default::default()
        };
        let p = pipeline(source, sink);

        let record = p.run_with_retries(&CancellationToken::new()).await;

        assert!(record.is_success());
        assert_eq!(record.attempts, 2);
        assert_eq!(record.row_id, Some(1));
        assert_eq!(record.alert_flag, Some(false));
        assert_eq!(p.history().latest().unwrap().run_id, record.run_id);
        assert_eq!(p.source.calls.load(Ordering::SeqCst), 1);
    }

    fn observation_at(time: &str, windspeed: f64) -> RawWeatherPayload {
        RawWeatherPayload::new(json!({
            "current_weather": {"windspeed": windspeed, "time": time}
        }))
    }

    #[tokio::test]
    async fn load_retry_reuses_the_built_record() {
        // ---
        let source = ScriptedSource::new(vec![
            Ok(observation_at("2024-12-20T10:00", 8.0)),
            Ok(observation_at("2024-12-20T11:00", 20.0)),
        ]);
        let sink = RecordingSink {
            failures: AtomicUsize::new(1),
            ..Default::default()
        };
        let p = pipeline(source, sink);

        let record = p.run_with_retries(&CancellationToken::new()).await;

        assert!(record.is_success());
        assert_eq!(p.source.calls.load(Ordering::SeqCst), 1);

        let loaded = p.sink.loaded.lock().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].observed_at.as_deref(), Some("2024-12-20T10:00"));
        assert_eq!(loaded[0].wind_speed, Some(8.0));
        assert_eq!(record.alert_flag, Some(false));
    }

    #[tokio::test]
    async fn exhausted_load_fails_after_a_single_fetch() {
        // ---
        let source = ScriptedSource::new(vec![Ok(payload(5.0)), Ok(payload(5.0))]);
        let sink = RecordingSink {
            failures: AtomicUsize::new(10),
            ..Default::default()
        };
        let p = pipeline(source, sink);

        let record = p.run_with_retries(&CancellationToken::new()).await;

        assert_eq!(record.status, RunState::Failed);
        assert_eq!(record.failed_stage, Some(Stage::Load));
        assert_eq!(record.attempts, 3);
        assert_eq!(p.source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(p.sink.failures.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn fetch_and_load_retry_independently() {
        // ---
        let source = ScriptedSource::new(vec![
            Err(PipelineError::Retrieval { status: 503 }),
            Err(PipelineError::Retrieval { status: 503 }),
            Ok(payload(22.0)),
        ]);
        let sink = RecordingSink {
            failures: AtomicUsize::new(2),
            ..Default::default()
        };
        let p = pipeline(source, sink);

        let record = p.run_with_retries(&CancellationToken::new()).await;

        // Each stage used its full three attempts and the run still succeeded.
        assert!(record.is_success());
        assert_eq!(record.attempts, 3);
        assert_eq!(p.source.calls.load(Ordering::SeqCst), 3);
        assert_eq!(p.sink.loaded.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cancellation_stops_retrying() {
        // ---
        let source = ScriptedSource::new(vec![Err(PipelineError::Retrieval { status: 502 })]);
        let p = Pipeline::new(source, RecordingSink::default(), "Cuenca_Azuay", RunHistory::default())
            .with_retry_policy(RetryPolicy {
                retries: 2,
                delay: Duration::from_secs(3600),
            });

        let cancel = CancellationToken::new();
        cancel.cancel();
        let record = p.run_with_retries(&cancel).await;

        assert_eq!(record.status, RunState::Failed);
        assert_eq!(record.attempts, 1);
        assert_eq!(p.source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn every_run_is_recorded() {
        // ---
        let source = ScriptedSource::new(vec![Ok(payload(1.0)), Ok(payload(30.0))]);
        let p = pipeline(source, RecordingSink::default());

        let first = p.run_with_retries(&CancellationToken::new()).await;
        let second = p.run_with_retries(&CancellationToken::new()).await;

        let recent = p.history().recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].run_id, second.run_id);
        assert_eq!(recent[1].run_id, first.run_id);
        assert_eq!(second.alert_flag, Some(true));
    }

    #[test]
    fn default_policy_allows_three_attempts() {
        // ---
        let policy = RetryPolicy::default();
        assert_eq!(policy.retries, 2);
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.delay, Duration::from_secs(300));
    }
}
