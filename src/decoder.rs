//! Decoder for RuuviTag data format 5 (RAWv2) manufacturer data.
//!
//! Only the environmental fields are decoded:
//!
//! | bytes | field                | scaling                 |
//! |-------|----------------------|-------------------------|
//! | 0     | format version (5)   |                         |
//! | 1-2   | temperature, `i16`   | × 0.005 °C              |
//! | 3-4   | humidity, `u16`      | × 0.0025 %              |
//! | 5-6   | pressure, `u16`      | (+ 50000 Pa) / 100 hPa  |
//!
//! All fields are big-endian. Anything after byte 6 is ignored.
//! See: https://docs.ruuvi.com/communication/bluetooth-advertisements/data-format-5-rawv2

use crate::measurement::Measurement;
use std::fmt;
use thiserror::Error;

/// The only payload layout this decoder understands.
pub const SUPPORTED_FORMAT: u8 = 5;

/// Shortest payload that carries all decoded fields.
pub const MIN_PAYLOAD_LEN: usize = 7;

const TEMPERATURE_STEP: f64 = 0.005;
const HUMIDITY_STEP: f64 = 0.0025;
const PRESSURE_OFFSET_PA: f64 = 50_000.0;

/// Payload fields, used to report which one failed to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Temperature,
    Humidity,
    Pressure,
}

impl Field {
    fn offset(self) -> usize {
        match self {
            Field::Temperature => 1,
            Field::Humidity => 3,
            Field::Pressure => 5,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Temperature => write!(f, "temperature"),
            Field::Humidity => write!(f, "humidity"),
            Field::Pressure => write!(f, "pressure"),
        }
    }
}

/// Error types for decoding RuuviTag data.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// The payload is empty or starts with a version other than 5
    #[error("unsupported format: {}", describe_version(.0))]
    UnsupportedFormat(Option<u8>),
    /// A format 5 payload that ends before the pressure field
    #[error("truncated payload: {len} bytes, need at least {min}", min = MIN_PAYLOAD_LEN)]
    TruncatedPayload { len: usize },
    /// A numeric field could not be read as a 16-bit word
    #[error("could not decode {field} field")]
    FieldDecodeFailed { field: Field },
}

fn describe_version(version: &Option<u8>) -> String {
    match version {
        Some(v) => format!("data format {v} (only format {SUPPORTED_FORMAT} is supported)"),
        None => "empty payload".to_string(),
    }
}

/// Decode a data format 5 payload (manufacturer data without the company id).
///
/// The version byte is checked before the length, so a short payload with the
/// wrong version reports `UnsupportedFormat` rather than `TruncatedPayload`.
///
/// # Example
/// ```
/// use ruuvitag_exporter::decode;
///
/// let m = decode(&[0x05, 0x01, 0xF4, 0x27, 0x10, 0xC3, 0x50]).unwrap();
/// assert!((m.temperature - 2.5).abs() < 1e-9);
/// assert!((m.humidity - 25.0).abs() < 1e-9);
/// assert!((m.pressure - 1000.0).abs() < 1e-9);
/// ```
pub fn decode(payload: &[u8]) -> Result<Measurement, DecodeError> {
    match payload.first() {
        Some(&SUPPORTED_FORMAT) => {}
        other => return Err(DecodeError::UnsupportedFormat(other.copied())),
    }

    if payload.len() < MIN_PAYLOAD_LEN {
        return Err(DecodeError::TruncatedPayload { len: payload.len() });
    }

    let temperature = i16::from_be_bytes(read_word(payload, Field::Temperature)?);
    let humidity = u16::from_be_bytes(read_word(payload, Field::Humidity)?);
    let pressure = u16::from_be_bytes(read_word(payload, Field::Pressure)?);

    Ok(Measurement {
        temperature: f64::from(temperature) * TEMPERATURE_STEP,
        humidity: f64::from(humidity) * HUMIDITY_STEP,
        pressure: (f64::from(pressure) + PRESSURE_OFFSET_PA) / 100.0,
    })
}

/// Two big-endian bytes at the field's offset.
fn read_word(payload: &[u8], field: Field) -> Result<[u8; 2], DecodeError> {
    let start = field.offset();
    payload
        .get(start..start + 2)
        .and_then(|bytes| <[u8; 2]>::try_from(bytes).ok())
        .ok_or(DecodeError::FieldDecodeFailed { field })
}
