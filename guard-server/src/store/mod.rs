//! Reading store: append-only readings plus the per-device latest state.

mod postgres;

#[cfg(test)]
pub mod memory;

pub use postgres::{make_pool, PgStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::errors::Result;
use crate::metrics::READINGS_INGESTED_TOTAL;
use crate::model::{Device, NewReading, Reading, User};

/// Persistence contract for devices and readings.
///
/// Every method fails with `Error::StorageUnavailable` when the backing store
/// cannot be reached. Nothing here retries.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Inserts the device or overwrites `last_seen` and `current_state`.
    async fn upsert_device(&self, id: &str, last_seen: DateTime<Utc>, state: &str) -> Result<()>;

    /// Always inserts a new row and returns its id. Never deduplicates.
    async fn append_reading(&self, reading: &NewReading) -> Result<i64>;

    /// The most recent `limit` readings for a device, newest first.
    async fn query_history(&self, device_id: &str, limit: u32) -> Result<Vec<Reading>>;

    /// All readings for a device with a timestamp strictly after `since`.
    async fn query_window(&self, device_id: &str, since: DateTime<Utc>) -> Result<Vec<Reading>>;

    async fn find_reading(
        &self,
        device_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<Reading>>;

    async fn get_device(&self, id: &str) -> Result<Option<Device>>;

    async fn list_devices(&self) -> Result<Vec<Device>>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Returns false when the phone number is already registered.
    async fn create_user(&self, phone_number: &str, password_hash: &str) -> Result<bool>;

    async fn find_user(&self, phone_number: &str) -> Result<Option<User>>;
}

/// Upserts the owning device, then appends the reading.
///
/// The two writes are not transactional; a failure in between leaves a fresh
/// device row without its reading, which the next ingestion repairs.
pub async fn record_reading(store: &dyn ReadingStore, reading: &NewReading) -> Result<i64> {
    store
        .upsert_device(&reading.device_id, reading.timestamp, &reading.state)
        .await?;
    let id = store.append_reading(reading).await?;
    READINGS_INGESTED_TOTAL.inc();
    debug!(
        "Stored reading {} for {} ({}) at {}",
        id, reading.device_id, reading.state, reading.timestamp
    );
    Ok(id)
}
