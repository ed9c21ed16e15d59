//! RuuviTag measurement data structure.

/// A decoded reading from a RuuviTag data format 5 payload.
///
/// Units:
/// - Temperature in Celsius (0.005 °C resolution)
/// - Relative humidity in percent (0.0025 % resolution)
/// - Pressure in hectopascals
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    /// Temperature in Celsius
    pub temperature: f64,
    /// Relative humidity in percent
    pub humidity: f64,
    /// Atmospheric pressure in hectopascals
    pub pressure: f64,
}
