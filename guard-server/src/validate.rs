use crate::errors::{Error, Result};
use crate::model::{Credentials, IngestRequest};

const TEMP_MIN: f64 = -100.0;
const TEMP_MAX: f64 = 500.0;
const VOLTAGE_MIN: f64 = 0.0;
const VOLTAGE_MAX: f64 = 1000.0;
const MAX_DEVICE_ID_LEN: usize = 128;
const MIN_PHONE_LEN: usize = 10;
const MIN_PASSWORD_LEN: usize = 6;

/// Validates an ingestion payload before it is resolved into a reading
pub fn validate_ingest(request: &IngestRequest) -> Result<()> {
    if let Some(device_id) = &request.device_id {
        if device_id.trim().is_empty() {
            return Err(Error::Validation("Device ID cannot be empty".to_string()));
        }
        if device_id.len() > MAX_DEVICE_ID_LEN {
            return Err(Error::Validation(format!(
                "Device ID longer than {} characters",
                MAX_DEVICE_ID_LEN
            )));
        }
    }

    if !request.temperature.is_finite()
        || request.temperature < TEMP_MIN
        || request.temperature > TEMP_MAX
    {
        return Err(Error::Validation(format!(
            "Temperature {} out of range [{}, {}]",
            request.temperature, TEMP_MIN, TEMP_MAX
        )));
    }

    if !request.voltage.is_finite()
        || request.voltage < VOLTAGE_MIN
        || request.voltage > VOLTAGE_MAX
    {
        return Err(Error::Validation(format!(
            "Voltage {} out of range [{}, {}]",
            request.voltage, VOLTAGE_MIN, VOLTAGE_MAX
        )));
    }

    // State is an open enumeration; only require something to be there.
    if request.state.trim().is_empty() {
        return Err(Error::Validation("State cannot be empty".to_string()));
    }

    Ok(())
}

/// Validates register/login input
pub fn validate_credentials(credentials: &Credentials) -> Result<()> {
    if credentials.phone_number.chars().count() < MIN_PHONE_LEN {
        return Err(Error::Validation(format!(
            "Phone number must be at least {} characters",
            MIN_PHONE_LEN
        )));
    }

    if credentials.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(Error::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }

    Ok(())
}
