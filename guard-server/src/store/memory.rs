use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{ReadingStore, UserStore};
use crate::errors::{Error, Result};
use crate::model::{Device, NewReading, Reading, User};

/// In-process store used by unit tests
#[derive(Default)]
pub struct MemoryStore {
    devices: Mutex<BTreeMap<String, Device>>,
    readings: Mutex<Vec<Reading>>,
    users: Mutex<BTreeMap<String, User>>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with `StorageUnavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn reading_count(&self) -> usize {
        self.readings.lock().unwrap().len()
    }

    fn check(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::StorageUnavailable(sqlx::Error::PoolClosed));
        }
        Ok(())
    }
}

#[async_trait]
impl ReadingStore for MemoryStore {
    async fn upsert_device(&self, id: &str, last_seen: DateTime<Utc>, state: &str) -> Result<()> {
        self.check()?;
        self.devices.lock().unwrap().insert(
            id.to_string(),
            Device {
                id: id.to_string(),
                last_seen,
                current_state: state.to_string(),
            },
        );
        Ok(())
    }

    async fn append_reading(&self, reading: &NewReading) -> Result<i64> {
        self.check()?;
        let mut readings = self.readings.lock().unwrap();
        let id = readings.len() as i64 + 1;
        readings.push(Reading {
            id,
            device_id: reading.device_id.clone(),
            temperature: reading.temperature,
            voltage: reading.voltage,
            motion_detected: reading.motion_detected,
            vibration_detected: reading.vibration_detected,
            gas_detected: reading.gas_detected,
            state: reading.state.clone(),
            timestamp: reading.timestamp,
        });
        Ok(id)
    }

    async fn query_history(&self, device_id: &str, limit: u32) -> Result<Vec<Reading>> {
        self.check()?;
        let mut matching: Vec<Reading> = self
            .readings
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.device_id == device_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matching.truncate(limit as usize);
        Ok(matching)
    }

    async fn query_window(&self, device_id: &str, since: DateTime<Utc>) -> Result<Vec<Reading>> {
        self.check()?;
        Ok(self
            .readings
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.device_id == device_id && r.timestamp > since)
            .cloned()
            .collect())
    }

    async fn find_reading(
        &self,
        device_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<Reading>> {
        self.check()?;
        Ok(self
            .readings
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.device_id == device_id && r.timestamp == timestamp)
            .cloned())
    }

    async fn get_device(&self, id: &str) -> Result<Option<Device>> {
        self.check()?;
        Ok(self.devices.lock().unwrap().get(id).cloned())
    }

    async fn list_devices(&self) -> Result<Vec<Device>> {
        self.check()?;
        Ok(self.devices.lock().unwrap().values().cloned().collect())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create_user(&self, phone_number: &str, password_hash: &str) -> Result<bool> {
        self.check()?;
        let mut users = self.users.lock().unwrap();
        if users.contains_key(phone_number) {
            return Ok(false);
        }
        let id = users.len() as i64 + 1;
        users.insert(
            phone_number.to_string(),
            User {
                id,
                phone_number: phone_number.to_string(),
                password_hash: password_hash.to_string(),
            },
        );
        Ok(true)
    }

    async fn find_user(&self, phone_number: &str) -> Result<Option<User>> {
        self.check()?;
        Ok(self.users.lock().unwrap().get(phone_number).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::record_reading;
    use chrono::{Duration, TimeZone};
    use tokio_test::{assert_err, assert_ok};

    fn reading(device_id: &str, timestamp: DateTime<Utc>, state: &str) -> NewReading {
        NewReading {
            device_id: device_id.to_string(),
            temperature: 44.0,
            voltage: 219.5,
            motion_detected: false,
            vibration_detected: false,
            gas_detected: false,
            state: state.to_string(),
            timestamp,
        }
    }

    #[tokio::test]
    async fn test_record_reading_upserts_device() {
        let store = MemoryStore::new();
        let t0 = Utc.with_ymd_and_hms(2025, 1, 10, 9, 0, 0).unwrap();

        record_reading(&store, &reading("dev-1", t0, "SAFE")).await.unwrap();
        record_reading(&store, &reading("dev-1", t0 + Duration::minutes(5), "DANGER"))
            .await
            .unwrap();

        let device = store.get_device("dev-1").await.unwrap().unwrap();
        assert_eq!(device.current_state, "DANGER");
        assert_eq!(device.last_seen, t0 + Duration::minutes(5));
        assert_eq!(store.list_devices().await.unwrap().len(), 1);
        assert_eq!(store.reading_count(), 2);
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = MemoryStore::new();
        let t0 = Utc.with_ymd_and_hms(2025, 1, 10, 9, 0, 0).unwrap();

        store.upsert_device("dev-1", t0, "WARNING").await.unwrap();
        store.upsert_device("dev-1", t0, "WARNING").await.unwrap();

        let devices = store.list_devices().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].current_state, "WARNING");
    }

    #[tokio::test]
    async fn test_history_is_newest_first_and_limited() {
        let store = MemoryStore::new();
        let t0 = Utc.with_ymd_and_hms(2025, 1, 10, 9, 0, 0).unwrap();
        for i in 0..5 {
            store
                .append_reading(&reading("dev-1", t0 + Duration::minutes(i), "SAFE"))
                .await
                .unwrap();
        }
        store
            .append_reading(&reading("dev-2", t0, "SAFE"))
            .await
            .unwrap();

        let history = store.query_history("dev-1", 3).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].timestamp, t0 + Duration::minutes(4));
        assert_eq!(history[2].timestamp, t0 + Duration::minutes(2));
    }

    #[tokio::test]
    async fn test_window_bound_is_exclusive() {
        let store = MemoryStore::new();
        let t0 = Utc.with_ymd_and_hms(2025, 1, 10, 9, 0, 0).unwrap();
        store.append_reading(&reading("dev-1", t0, "SAFE")).await.unwrap();
        store
            .append_reading(&reading("dev-1", t0 + Duration::seconds(1), "SAFE"))
            .await
            .unwrap();

        let window = store.query_window("dev-1", t0).await.unwrap();
        assert_eq!(window.len(), 1);
    }

    #[tokio::test]
    async fn test_offline_store_reports_storage_unavailable() {
        let store = MemoryStore::new();
        store.set_offline(true);

        let err = assert_err!(store.list_devices().await);
        assert!(err.is_storage());
        assert_err!(store.get_device("dev-1").await);

        store.set_offline(false);
        assert_ok!(store.list_devices().await);
    }
}
