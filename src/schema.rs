//! Database schema management for `skywatch-weather`.
//!
//! The loader calls [`create_schema`] inside its transaction on every run, so
//! the destination table always exists before the insert.

use sqlx::PgConnection;

// ---

/// DDL for the append-only observation log.
///
/// Everything but `id` is nullable: an incomplete upstream observation still
/// produces a row.
pub const CREATE_WEATHER_LOGS: &str = r#"
    CREATE TABLE IF NOT EXISTS weather_logs (
        id              SERIAL PRIMARY KEY,
        city            VARCHAR(50),
        temp            FLOAT,
        wind_speed      FLOAT,
        wind_dir        FLOAT,
        condition_code  INT,
        alert_flag      BOOLEAN,
        recorded_at     TIMESTAMP,
        ingested_at     TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    );
"#;

/// Create the `weather_logs` table (idempotent).
///
/// No-op if the table already exists; an existing table is never altered.
pub async fn create_schema(conn: &mut PgConnection) -> Result<(), sqlx::Error> {
    // ---
    sqlx::query(CREATE_WEATHER_LOGS).execute(&mut *conn).await?;
    Ok(())
}
