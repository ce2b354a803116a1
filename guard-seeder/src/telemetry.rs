use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Wire shape accepted by `POST /api/device/data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reading {
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

/// Simulated failure mode of a machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    None,
    GasLeak,
    Overheating,
    VoltageSpike,
    Vibration,
}

impl Fault {
    /// Fault profile for the machine numbered `n`, given the faulty set.
    pub fn for_machine(n: u32, faulty: &[u32]) -> Self {
        if !faulty.contains(&n) {
            return Fault::None;
        }
        match n % 4 {
            1 => Fault::GasLeak,
            2 => Fault::Overheating,
            3 => Fault::VoltageSpike,
            _ => Fault::Vibration,
        }
    }
}

const GAS_THRESHOLD: f64 = 200.0;

pub fn generate_reading(
    rng: &mut impl Rng,
    device_id: &str,
    timestamp: DateTime<Utc>,
    fault: Fault,
) -> Reading {
    let mut voltage = 220.0 + rng.gen_range(-5.0..5.0);
    let mut temperature = 45.0 + rng.gen_range(-5.0..5.0);
    let mut vibration = rng.gen_bool(0.2);
    let mut gas: f64 = rng.gen_range(0.0..50.0);
    let motion = rng.gen_bool(0.5);

    let state = match fault {
        Fault::None => "SAFE",
        Fault::GasLeak => {
            gas = GAS_THRESHOLD + rng.gen_range(1.0..100.0);
            "DANGER"
        }
        Fault::Overheating => {
            temperature = rng.gen_range(85.0..100.0);
            "WARNING"
        }
        Fault::VoltageSpike => {
            voltage = rng.gen_range(250.0..270.0);
            "WARNING"
        }
        Fault::Vibration => {
            vibration = true;
            "WARNING"
        }
    };

    Reading {
        device_id: device_id.to_string(),
        temperature: round2(temperature),
        voltage: round2(voltage),
        motion_detected: motion,
        vibration_detected: vibration,
        gas_detected: gas > GAS_THRESHOLD,
        state: state.to_string(),
        timestamp,
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
