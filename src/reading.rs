//! Decoded sensor values and the observations published to sinks.

use crate::mac_address::MacAddress;
use std::fmt;
use std::ops::RangeInclusive;
use std::time::SystemTime;
use thiserror::Error;

/// Plausible temperature range, hundredths of a degree Celsius.
pub const TEMPERATURE_RANGE: RangeInclusive<i32> = -4_000..=8_500;
/// Plausible relative humidity range, hundredths of a percent.
pub const HUMIDITY_RANGE: RangeInclusive<i32> = 0..=10_000;
/// Battery level range, percent.
pub const BATTERY_RANGE: RangeInclusive<i32> = 0..=100;
/// Plausible RSSI range, dBm.
pub const RSSI_RANGE: RangeInclusive<i32> = -127..=20;
/// Reported when the radio has no RSSI for an advertisement.
pub const UNKNOWN_RSSI: i8 = -127;

/// Clamp a platform RSSI reading into [`RSSI_RANGE`].
pub fn clamp_rssi(rssi: i16) -> i8 {
    let (min, max) = (*RSSI_RANGE.start(), *RSSI_RANGE.end());
    i32::from(rssi).clamp(min, max) as i8
}

/// A field of [`SensorReading`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Temperature,
    Humidity,
    Battery,
    Rssi,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Field::Temperature => "temperature",
            Field::Humidity => "humidity",
            Field::Battery => "battery",
            Field::Rssi => "rssi",
        })
    }
}

/// A field value outside its physically plausible range.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{field} value {value} is out of range")]
pub struct OutOfRange {
    pub field: Field,
    /// Raw value in the field's fixed-point unit
    pub value: i32,
}

/// Sensor values carried by one advertisement.
///
/// Fixed-point fields keep the wire scale so values survive a round trip
/// exactly. `None` means the sensor did not report the field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SensorReading {
    /// Temperature in hundredths of a degree Celsius
    pub temperature: Option<i16>,
    /// Relative humidity in hundredths of a percent
    pub humidity: Option<u16>,
    /// Battery level in percent
    pub battery: Option<u8>,
    /// Signal strength of the carrying advertisement in dBm
    pub rssi: Option<i8>,
}

impl SensorReading {
    pub fn temperature_celsius(&self) -> Option<f64> {
        self.temperature.map(|t| f64::from(t) / 100.0)
    }

    pub fn humidity_percent(&self) -> Option<f64> {
        self.humidity.map(|h| f64::from(h) / 100.0)
    }

    /// True when none of the sensor fields (temperature, humidity, battery) is set.
    pub fn is_empty(&self) -> bool {
        self.temperature.is_none() && self.humidity.is_none() && self.battery.is_none()
    }

    /// Check every present field against its plausible range.
    pub fn validate(&self) -> Result<(), OutOfRange> {
        check(Field::Temperature, self.temperature.map(i32::from), &TEMPERATURE_RANGE)?;
        check(Field::Humidity, self.humidity.map(i32::from), &HUMIDITY_RANGE)?;
        check(Field::Battery, self.battery.map(i32::from), &BATTERY_RANGE)?;
        check(Field::Rssi, self.rssi.map(i32::from), &RSSI_RANGE)
    }
}

/// Present fields only, e.g. `temperature=21.50°C battery=87%`.
impl fmt::Display for SensorReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::with_capacity(4);
        if let Some(t) = self.temperature_celsius() {
            parts.push(format!("temperature={t:.2}°C"));
        }
        if let Some(h) = self.humidity_percent() {
            parts.push(format!("humidity={h:.2}%"));
        }
        if let Some(b) = self.battery {
            parts.push(format!("battery={b}%"));
        }
        if let Some(rssi) = self.rssi {
            parts.push(format!("rssi={rssi}dBm"));
        }
        f.write_str(&parts.join(" "))
    }
}

fn check(field: Field, value: Option<i32>, range: &RangeInclusive<i32>) -> Result<(), OutOfRange> {
    match value {
        Some(value) if !range.contains(&value) => Err(OutOfRange { field, value }),
        _ => Ok(()),
    }
}

/// Which advertisement frame a reading was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    /// Manufacturer-specific TLV frame
    Manufacturer,
    /// Qingping CGG1 service data frame
    Cgg1,
}

impl fmt::Display for FrameFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FrameFormat::Manufacturer => "manufacturer",
            FrameFormat::Cgg1 => "cgg1",
        })
    }
}

/// A reading together with the device it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub mac: MacAddress,
    /// Time the advertisement was received
    pub timestamp: SystemTime,
    pub format: FrameFormat,
    pub reading: SensorReading,
}
