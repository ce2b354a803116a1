use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{error, info, warn};

use super::{ReadingStore, UserStore};
use crate::errors::{Error, Result};
use crate::metrics::STORAGE_FAILURES_TOTAL;
use crate::model::{Device, NewReading, Reading, User};

const READING_COLUMNS: &str = "id, device_id, temperature, voltage, motion_detected, \
     vibration_detected, gas_detected, state, ts AS timestamp";

pub async fn make_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;

    info!("Database connection established");
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed");

    Ok(pool)
}

/// Postgres-backed store. Cheap to clone; clones share the pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn close(&self) {
        info!("Closing database pool");
        self.pool.close().await;
    }
}

/// Logs and counts a failed storage call, passing the error through.
fn storage_failure(op: &'static str, err: sqlx::Error) -> Error {
    STORAGE_FAILURES_TOTAL.inc();
    if is_transient_error(&err) {
        warn!("Storage unavailable during {}: {}", op, err);
    } else {
        error!("Storage error during {}: {}", op, err);
    }
    Error::StorageUnavailable(err)
}

#[async_trait]
impl ReadingStore for PgStore {
    async fn upsert_device(&self, id: &str, last_seen: DateTime<Utc>, state: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO devices (id, last_seen, current_state)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET
                last_seen = EXCLUDED.last_seen,
                current_state = EXCLUDED.current_state
            "#,
        )
        .bind(id)
        .bind(last_seen)
        .bind(state)
        .execute(&self.pool)
        .await
        .map_err(|e| storage_failure("upsert_device", e))?;

        Ok(())
    }

    async fn append_reading(&self, reading: &NewReading) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO readings (device_id, temperature, voltage, motion_detected,
                                  vibration_detected, gas_detected, state, ts)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(&reading.device_id)
        .bind(reading.temperature)
        .bind(reading.voltage)
        .bind(reading.motion_detected)
        .bind(reading.vibration_detected)
        .bind(reading.gas_detected)
        .bind(&reading.state)
        .bind(reading.timestamp)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| storage_failure("append_reading", e))?;

        Ok(id)
    }

    async fn query_history(&self, device_id: &str, limit: u32) -> Result<Vec<Reading>> {
        let query = format!(
            "SELECT {} FROM readings WHERE device_id = $1 ORDER BY ts DESC LIMIT $2",
            READING_COLUMNS
        );

        sqlx::query_as::<_, Reading>(&query)
            .bind(device_id)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| storage_failure("query_history", e))
    }

    async fn query_window(&self, device_id: &str, since: DateTime<Utc>) -> Result<Vec<Reading>> {
        let query = format!(
            "SELECT {} FROM readings WHERE device_id = $1 AND ts > $2",
            READING_COLUMNS
        );

        sqlx::query_as::<_, Reading>(&query)
            .bind(device_id)
            .bind(since)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| storage_failure("query_window", e))
    }

    async fn find_reading(
        &self,
        device_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<Reading>> {
        let query = format!(
            "SELECT {} FROM readings WHERE device_id = $1 AND ts = $2 LIMIT 1",
            READING_COLUMNS
        );

        sqlx::query_as::<_, Reading>(&query)
            .bind(device_id)
            .bind(timestamp)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage_failure("find_reading", e))
    }

    async fn get_device(&self, id: &str) -> Result<Option<Device>> {
        sqlx::query_as::<_, Device>(
            "SELECT id, last_seen, current_state FROM devices WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage_failure("get_device", e))
    }

    async fn list_devices(&self) -> Result<Vec<Device>> {
        sqlx::query_as::<_, Device>("SELECT id, last_seen, current_state FROM devices ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| storage_failure("list_devices", e))
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn create_user(&self, phone_number: &str, password_hash: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (phone_number, password_hash)
            VALUES ($1, $2)
            ON CONFLICT (phone_number) DO NOTHING
            "#,
        )
        .bind(phone_number)
        .bind(password_hash)
        .execute(&self.pool)
        .await
        .map_err(|e| storage_failure("create_user", e))?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_user(&self, phone_number: &str) -> Result<Option<User>> {
        sqlx::query_as::<_, User>(
            "SELECT id, phone_number, password_hash FROM users WHERE phone_number = $1",
        )
        .bind(phone_number)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage_failure("find_user", e))
    }
}

fn is_transient_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed => true,
        sqlx::Error::Database(db_err) => {
            // Connection-class SQLSTATE codes
            db_err.code().is_some_and(|code| {
                code == "08000" || // connection_exception
                code == "08003" || // connection_does_not_exist
                code == "08006" || // connection_failure
                code == "57P03" || // cannot_connect_now
                code == "53300" // too_many_connections
            })
        }
        _ => false,
    }
}
