//! Loader stage: append one [`WeatherRecord`] to `weather_logs`.
//!
//! Each call opens its own connection and closes it before returning,
//! whether the write succeeded or not. Nothing is pooled or shared across
//! runs.

use async_trait::async_trait;
use sqlx::{Connection, PgConnection};
use tracing::{info, warn};

use crate::{schema, PipelineError, WeatherRecord};

// ---

/// Anything that can persist a record and report the new row id.
#[async_trait]
pub trait WeatherSink: Send + Sync {
    async fn load(&self, record: &WeatherRecord) -> Result<i32, PipelineError>;
}

const INSERT_WEATHER_LOG: &str = r#"
    INSERT INTO weather_logs (
        city, temp, wind_speed, wind_dir,
        condition_code, alert_flag, recorded_at
    ) VALUES ($1, $2, $3, $4, $5, $6, CAST($7 AS TIMESTAMP))
    RETURNING id
"#;

/// Writes records to PostgreSQL over a scoped connection.
#[derive(Debug, Clone)]
pub struct PostgresLoader {
    db_url: String,
}

impl PostgresLoader {
    pub fn new(db_url: impl Into<String>) -> Self {
        Self {
            db_url: db_url.into(),
        }
    }
}

#[async_trait]
impl WeatherSink for PostgresLoader {
    // ---
    async fn load(&self, record: &WeatherRecord) -> Result<i32, PipelineError> {
        // ---
        let mut conn = PgConnection::connect(&self.db_url).await?;

        let result = write_record(&mut conn, record).await;

        // Released on both paths; a dropped transaction has already rolled back.
        if let Err(e) = conn.close().await {
            warn!(error = %e, "Failed to close database connection cleanly");
        }

        let id = result?;
        info!(
            id,
            city = %record.city,
            alert = record.alert_flag(),
            "Weather record for {} saved",
            record.city
        );
        Ok(id)
    }
}

/// Create the table if needed and insert the record in one transaction.
pub async fn write_record(conn: &mut PgConnection, record: &WeatherRecord) -> Result<i32, sqlx::Error> {
    // ---
    let mut tx = conn.begin().await?;

    schema::create_schema(&mut *tx).await?;

    let id: i32 = sqlx::query_scalar(INSERT_WEATHER_LOG)
        .bind(&record.city)
        .bind(record.temperature)
        .bind(record.wind_speed)
        .bind(record.wind_direction)
        .bind(record.condition_code)
        .bind(record.alert_flag())
        .bind(record.observed_at.as_deref())
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(id)
}
