//! Cron-driven trigger loop.
//!
//! Sleeps until the next fire time, runs the pipeline (with retries), then
//! computes the next fire time from the current clock. Ticks missed while a
//! run was in progress are skipped, never replayed, and only one run is ever
//! active.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{Pipeline, WeatherSink, WeatherSource};

// ---

/// Default trigger: top of every hour.
pub const DEFAULT_SCHEDULE: &str = "@hourly";

/// Errors from schedule parsing.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Invalid cron expression: {0}")]
    CronParse(String),
}

/// A parsed trigger schedule.
#[derive(Debug, Clone)]
pub struct TriggerSchedule {
    expression: String,
    schedule: cron::Schedule,
}

impl TriggerSchedule {
    // ---
    /// Parse a cron expression.
    ///
    /// Accepts 6-field expressions (sec min hr dom month dow), standard
    /// 5-field expressions, and shorthands such as `@hourly`.
    pub fn parse(expression: &str) -> Result<Self, SchedulerError> {
        // ---
        let normalized = normalize_cron_expr(expression);
        let schedule = cron::Schedule::from_str(&normalized)
            .map_err(|e| SchedulerError::CronParse(format!("{}: {}", expression, e)))?;

        Ok(Self {
            expression: expression.trim().to_string(),
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }
}

/// Prepend a zero seconds field to 5-field cron expressions.
fn normalize_cron_expr(expr: &str) -> String {
    let trimmed = expr.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    }
}

/// Trigger the pipeline on `schedule` until `cancel` fires.
pub async fn run<S, K>(pipeline: &Pipeline<S, K>, schedule: &TriggerSchedule, cancel: CancellationToken)
where
    S: WeatherSource,
    K: WeatherSink,
{
    // ---
    info!(schedule = schedule.expression(), "Scheduler started");

    loop {
        let now = Utc::now();
        let Some(next) = schedule.next_after(now) else {
            warn!(schedule = schedule.expression(), "Schedule has no future fire times, stopping");
            break;
        };

        let wait = (next - now).to_std().unwrap_or_default();
        info!(next_run = %next, wait_secs = wait.as_secs(), "Waiting for next trigger");

        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Scheduler stopping");
                break;
            }
            _ = tokio::time::sleep(wait) => {}
        }

        let record = pipeline.run_with_retries(&cancel).await;
        if !record.is_success() {
            error!(
                run_id = %record.run_id,
                attempts = record.attempts,
                "Run marked failed: {}",
                record.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn hourly_fires_at_top_of_next_hour() {
        // ---
        let schedule = TriggerSchedule::parse(DEFAULT_SCHEDULE).unwrap();

        let after = Utc.with_ymd_and_hms(2024, 12, 20, 10, 15, 30).unwrap();
        let next = schedule.next_after(after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 12, 20, 11, 0, 0).unwrap());

        // Exactly on the hour moves to the following hour
        let on_the_hour = Utc.with_ymd_and_hms(2024, 12, 20, 11, 0, 0).unwrap();
        let next = schedule.next_after(on_the_hour).unwrap();
        assert_eq!(next.hour(), 12);
        assert_eq!(next.minute(), 0);
    }

    #[test]
    fn five_field_expression_is_normalized() {
        // ---
        assert_eq!(normalize_cron_expr("*/15 * * * *"), "0 */15 * * * *");
        assert_eq!(normalize_cron_expr(" 0 0 * * * * "), "0 0 * * * *");
        assert_eq!(normalize_cron_expr("@hourly"), "@hourly");

        let schedule = TriggerSchedule::parse("*/15 * * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2024, 12, 20, 10, 1, 0).unwrap();
        let next = schedule.next_after(after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 12, 20, 10, 15, 0).unwrap());
        assert_eq!(schedule.expression(), "*/15 * * * *");
    }

    #[test]
    fn invalid_expression_is_rejected() {
        // ---
        let err = TriggerSchedule::parse("every hour please").unwrap_err();
        assert!(err.to_string().starts_with("Invalid cron expression: every hour please"));
    }
}
