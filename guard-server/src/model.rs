use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Device id used when an ingestion payload does not name its device.
pub const UNKNOWN_DEVICE: &str = "UNKNOWN-DEVICE";

pub const STATE_SAFE: &str = "SAFE";
pub const STATE_WARNING: &str = "WARNING";
pub const STATE_DANGER: &str = "DANGER";

/// Latest-known state of one physical unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Device {
    pub id: String,
    pub last_seen: DateTime<Utc>,
    pub current_state: String,
}

/// One stored sensor sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Reading {
    pub id: i64,
    pub device_id: String,
    pub temperature: f64,
    pub voltage: f64,
    #[serde(rename = "motionDetected")]
    pub motion_detected: bool,
    #[serde(rename = "vibrationDetected")]
    pub vibration_detected: bool,
    #[serde(rename = "gasDetected")]
    pub gas_detected: bool,
    pub state: String,
    pub timestamp: DateTime<Utc>,
}

/// Fully resolved reading, ready to be appended to the store
#[derive(Debug, Clone, PartialEq)]
pub struct NewReading {
    pub device_id: String,
    pub temperature: f64,
    pub voltage: f64,
    pub motion_detected: bool,
    pub vibration_detected: bool,
    pub gas_detected: bool,
    pub state: String,
    pub timestamp: DateTime<Utc>,
}

/// Ingestion payload as received over HTTP.
///
/// `device_id` and `timestamp` are optional on the wire; [`IngestRequest::resolve`]
/// fills in the defaults so nothing past the boundary deals with missing values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    #[serde(default)]
    pub device_id: Option<String>,
    pub temperature: f64,
    pub voltage: f64,
    #[serde(rename = "motionDetected")]
    pub motion_detected: bool,
    #[serde(rename = "vibrationDetected")]
    pub vibration_detected: bool,
    #[serde(rename = "gasDetected")]
    pub gas_detected: bool,
    pub state: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl IngestRequest {
    pub fn resolve(self, now: DateTime<Utc>) -> NewReading {
        NewReading {
            device_id: self
                .device_id
                .unwrap_or_else(|| UNKNOWN_DEVICE.to_string()),
            temperature: self.temperature,
            voltage: self.voltage,
            motion_detected: self.motion_detected,
            vibration_detected: self.vibration_detected,
            gas_detected: self.gas_detected,
            state: self.state,
            timestamp: self.timestamp.unwrap_or(now),
        }
    }
}

/// Derived per-device analytics, regenerated on every request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsSnapshot {
    pub efficiency: u32,
    pub health_score: u32,
    pub total_readings: u64,
    pub warnings: u64,
    pub dangers: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Unknown,
}

impl From<String> for RiskLevel {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "LOW" => RiskLevel::Low,
            "MEDIUM" => RiskLevel::Medium,
            "HIGH" => RiskLevel::High,
            _ => RiskLevel::Unknown,
        }
    }
}

impl<'de> Deserialize<'de> for RiskLevel {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        String::deserialize(deserializer).map(RiskLevel::from)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub risk_level: RiskLevel,
    pub confidence: f64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Explanation {
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceInsight {
    pub maintenance_required: bool,
    pub suggested_action: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemSummary {
    pub overall_status: String,
    pub devices_at_risk: u32,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceAlert {
    pub text: String,
    pub audio_url: String,
}

/// Registered API user
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub phone_number: String,
    pub password_hash: String,
}

/// Register/login payload
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    #[serde(rename = "phoneNumber")]
    pub phone_number: String,
    pub password: String,
}

/// Latest known state plus the newest reading for a device
#[derive(Debug, Serialize)]
pub struct DeviceStatusResponse {
    pub device: Device,
    pub latest_reading: Option<Reading>,
}
