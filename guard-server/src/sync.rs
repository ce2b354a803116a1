//! Timer-driven pull of the latest feed entry into the reading store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::errors::{Error, Result};
use crate::metrics::{SYNC_DUPLICATES_TOTAL, SYNC_FAILURES_TOTAL, SYNC_TICKS_TOTAL};
use crate::model::{NewReading, STATE_DANGER, STATE_SAFE, STATE_WARNING};
use crate::store::{record_reading, ReadingStore};

/// Raw gas level above which gas counts as detected.
const GAS_THRESHOLD: f64 = 200.0;

pub const MIN_SYNC_INTERVAL: Duration = Duration::from_secs(1);

/// One entry of a channel feed. Every field is optional on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedEntry {
    pub created_at: Option<String>,
    /// Gas level
    pub field1: Option<Value>,
    /// Temperature
    pub field2: Option<Value>,
    /// Vibration flag
    pub field3: Option<Value>,
    /// Voltage
    pub field4: Option<Value>,
    /// Motion flag
    pub field5: Option<Value>,
    /// Alert code
    pub field6: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct FeedResponse {
    #[serde(default)]
    feeds: Vec<FeedEntry>,
}

/// Pull-based source of the most recent feed entry
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn latest(&self) -> Result<Option<FeedEntry>>;
}

/// ThingSpeak channel feed
#[derive(Debug, Clone)]
pub struct ThingSpeakFeed {
    client: Client,
    url: String,
    read_key: String,
}

impl ThingSpeakFeed {
    pub fn new(config: &SyncConfig) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            url: format!(
                "{}/channels/{}/feeds.json",
                config.base_url.trim_end_matches('/'),
                config.channel_id
            ),
            read_key: config.read_key.clone(),
        })
    }
}

#[async_trait]
impl FeedSource for ThingSpeakFeed {
    async fn latest(&self) -> Result<Option<FeedEntry>> {
        let response = self
            .client
            .get(&self.url)
            .query(&[("api_key", self.read_key.as_str()), ("results", "1")])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(http_error)?;

        let body: FeedResponse = response.json().await.map_err(http_error)?;
        Ok(body.feeds.into_iter().last())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    NoData,
    Malformed,
    Duplicate,
    Stored(i64),
}

pub struct Synchronizer {
    store: Arc<dyn ReadingStore>,
    feed: Arc<dyn FeedSource>,
    device_id: String,
}

impl Synchronizer {
    pub fn new(store: Arc<dyn ReadingStore>, feed: Arc<dyn FeedSource>, device_id: String) -> Self {
        Self {
            store,
            feed,
            device_id,
        }
    }

    /// Fetches the latest entry and stores it unless it is already known.
    pub async fn sync_once(&self) -> Result<SyncOutcome> {
        let Some(entry) = self.feed.latest().await? else {
            debug!("Feed returned no entries");
            return Ok(SyncOutcome::NoData);
        };

        let reading = match parse_entry(&entry, &self.device_id) {
            Ok(reading) => reading,
            Err(e) => {
                warn!("Skipping malformed feed entry: {}", e);
                return Ok(SyncOutcome::Malformed);
            }
        };

        if self
            .store
            .find_reading(&reading.device_id, reading.timestamp)
            .await?
            .is_some()
        {
            SYNC_DUPLICATES_TOTAL.inc();
            debug!(
                "Feed entry for {} at {} already stored",
                reading.device_id, reading.timestamp
            );
            return Ok(SyncOutcome::Duplicate);
        }

        let id = record_reading(self.store.as_ref(), &reading).await?;
        info!(
            "Synced feed data for {} at {} ({})",
            reading.device_id, reading.timestamp, reading.state
        );
        Ok(SyncOutcome::Stored(id))
    }

    /// Runs immediately, then every `period`, until `shutdown` flips to true.
    /// Errors are logged per tick and never end the loop.
    pub async fn run(self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        // `interval` panics on a zero period.
        let period = period.max(MIN_SYNC_INTERVAL);
        info!("Starting feed synchronizer every {:?}", period);
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    SYNC_TICKS_TOTAL.inc();
                    if let Err(e) = self.sync_once().await {
                        SYNC_FAILURES_TOTAL.inc();
                        error!("Feed sync error: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Feed synchronizer stopped");
    }
}

/// The request URL carries the read key, so it is stripped from errors.
fn http_error(err: reqwest::Error) -> Error {
    Error::Http(err.without_url())
}

/// Maps an alert code onto a lifecycle state.
pub fn state_for_alert(code: i64) -> &'static str {
    match code {
        1 => STATE_WARNING,
        c if c > 1 => STATE_DANGER,
        _ => STATE_SAFE,
    }
}

/// Converts a feed entry into a reading for `device_id`.
pub fn parse_entry(entry: &FeedEntry, device_id: &str) -> Result<NewReading> {
    let created_at = entry
        .created_at
        .as_deref()
        .ok_or_else(|| Error::Feed("entry has no created_at".to_string()))?;
    let timestamp = DateTime::parse_from_rfc3339(created_at)
        .map_err(|e| Error::Feed(format!("bad created_at {:?}: {}", created_at, e)))?
        .with_timezone(&Utc);

    let gas_level = number_field("field1", &entry.field1)?;
    let temperature = number_field("field2", &entry.field2)?;
    let vibration = integer_field("field3", &entry.field3)?;
    let voltage = number_field("field4", &entry.field4)?;
    let motion = integer_field("field5", &entry.field5)?;
    let alert = integer_field("field6", &entry.field6)?;

    Ok(NewReading {
        device_id: device_id.to_string(),
        temperature,
        voltage,
        motion_detected: motion != 0,
        vibration_detected: vibration != 0,
        gas_detected: gas_level > GAS_THRESHOLD,
        state: state_for_alert(alert).to_string(),
        timestamp,
    })
}

/// Absent or null fields read as zero.
fn number_field(name: &str, value: &Option<Value>) -> Result<f64> {
    let parsed = match value {
        None | Some(Value::Null) => Some(0.0),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) if s.trim().is_empty() => Some(0.0),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    };

    match parsed {
        Some(v) if v.is_finite() => Ok(v),
        _ => Err(Error::Feed(format!("{} is not a number: {:?}", name, value))),
    }
}

/// Integer fields accept decimal text and truncate it.
fn integer_field(name: &str, value: &Option<Value>) -> Result<i64> {
    number_field(name, value).map(|v| v.trunc() as i64)
}
