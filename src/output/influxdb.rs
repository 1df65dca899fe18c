//! InfluxDB line protocol output formatter.

use crate::output::OutputFormatter;
use crate::reading::Observation;
use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

/// Default measurement name.
pub const DEFAULT_MEASUREMENT: &str = "qingping_measurement";

/// Field values for InfluxDB line protocol
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FieldValue::Float(num) => write!(f, "{num}"),
            FieldValue::Integer(num) => write!(f, "{num}i"),
        }
    }
}

/// Data point in InfluxDB line protocol
#[derive(Debug)]
pub struct DataPoint<'a> {
    pub measurement: &'a str,
    pub tag_set: BTreeMap<&'static str, String>,
    pub field_set: BTreeMap<&'static str, FieldValue>,
    pub timestamp: Option<SystemTime>,
}

/// Backslash-escape every char in `special`.
fn escape(s: &str, special: &[char], f: &mut fmt::Formatter) -> fmt::Result {
    for c in s.chars() {
        if special.contains(&c) {
            write!(f, "\\")?;
        }
        write!(f, "{c}")?;
    }
    Ok(())
}

/// Measurement names only delimit on commas and spaces.
const MEASUREMENT_SPECIAL: &[char] = &[',', ' '];
const TAG_VALUE_SPECIAL: &[char] = &[',', ' ', '='];

impl fmt::Display for DataPoint<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        escape(self.measurement, MEASUREMENT_SPECIAL, f)?;
        for (key, value) in &self.tag_set {
            write!(f, ",{key}=")?;
            escape(value, TAG_VALUE_SPECIAL, f)?;
        }

        let mut separator = ' ';
        for (key, value) in &self.field_set {
            write!(f, "{separator}{key}={value}")?;
            separator = ',';
        }

        // Pre-epoch clocks get no timestamp; the server assigns one on write
        if let Some(nanos) = self
            .timestamp
            .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
        {
            write!(f, " {nanos}")?;
        }
        Ok(())
    }
}

/// Formats observations as InfluxDB line protocol.
///
/// Tags are the device address and frame format. Only reported fields are
/// written; temperature and humidity as floats, battery and RSSI as integers.
#[derive(Debug, Clone)]
pub struct InfluxDbFormatter {
    measurement_name: String,
}

impl InfluxDbFormatter {
    pub fn new(measurement_name: String) -> Self {
        Self { measurement_name }
    }

    fn to_data_point(&self, observation: &Observation) -> DataPoint<'_> {
        let reading = &observation.reading;

        let mut tag_set = BTreeMap::new();
        tag_set.insert("mac", observation.mac.to_string());
        tag_set.insert("format", observation.format.to_string());

        let mut field_set = BTreeMap::new();
        if let Some(t) = reading.temperature_celsius() {
            field_set.insert("temperature", FieldValue::Float(t));
        }
        if let Some(h) = reading.humidity_percent() {
            field_set.insert("humidity", FieldValue::Float(h));
        }
        if let Some(b) = reading.battery {
            field_set.insert("battery", FieldValue::Integer(b.into()));
        }
        if let Some(rssi) = reading.rssi {
            field_set.insert("rssi", FieldValue::Integer(rssi.into()));
        }

        DataPoint {
            measurement: &self.measurement_name,
            tag_set,
            field_set,
            timestamp: Some(observation.timestamp),
        }
    }
}

impl Default for InfluxDbFormatter {
    fn default() -> Self {
        Self::new(DEFAULT_MEASUREMENT.to_string())
    }
}

impl OutputFormatter for InfluxDbFormatter {
    fn format(&self, observation: &Observation) -> String {
        self.to_data_point(observation).to_string()
    }
}
