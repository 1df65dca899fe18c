//! Decoder for Qingping's native service data frames.
//!
//! Only the CGG1 (round body, e-ink display) plaintext frame is understood:
//!
//! | Offset | Size | Content                               |
//! |--------|------|---------------------------------------|
//! | 0      | 1    | frame control (`0x08`)                |
//! | 1      | 1    | device type (`0x01`, CGG1)            |
//! | 2      | 6    | device address, reversed              |
//! | 8      | ..   | `[type][0x10][len][value; len]` points |
//!
//! Values are little-endian in tenths; they are rescaled to the hundredths
//! used by [`SensorReading`].

use crate::advertisement::ServiceData;
use crate::decoder::{DecodeError, Tlv, Tlvs, fixed};
use crate::reading::{Field, HUMIDITY_RANGE, OutOfRange, SensorReading, TEMPERATURE_RANGE};

/// Qingping service data UUID.
pub const UUID_QINGPING: u16 = 0xFDCD;
/// Xiaomi MiBeacon UUID, also used by older Qingping firmware.
pub const UUID_MIBEACON: u16 = 0xFE95;

const FRAME_CONTROL_CGG1: u8 = 0x08;
const DEVICE_TYPE_CGG1: u8 = 0x01;
const DATA_OFFSET: usize = 8;

const DP_TEMPERATURE: u8 = 0x04;
const DP_HUMIDITY: u8 = 0x06;
const DP_BATTERY: u8 = 0x0A;
const DP_TEMPERATURE_HUMIDITY: u8 = 0x0D;

/// Whether this service data may carry a Qingping frame.
pub fn is_qingping(service: &ServiceData<'_>) -> bool {
    matches!(service.uuid, UUID_QINGPING | UUID_MIBEACON)
}

/// Decode a CGG1 service data frame into a validated reading.
pub fn decode_service_data(service: &ServiceData<'_>) -> Result<SensorReading, DecodeError> {
    let data = service.data;
    let device_type = data.get(1).copied().unwrap_or_default();
    if !is_qingping(service) {
        return Err(DecodeError::BadHeader {
            vendor_id: service.uuid,
            frame_type: device_type,
        });
    }

    let [frame_control, device_type, ..] = *data else {
        return Err(DecodeError::Truncated {
            offset: 0,
            needed: 2,
            available: data.len(),
        });
    };
    // Any other frame control is either another device or an encrypted frame
    if frame_control != FRAME_CONTROL_CGG1 || device_type != DEVICE_TYPE_CGG1 {
        return Err(DecodeError::BadHeader {
            vendor_id: service.uuid,
            frame_type: device_type,
        });
    }
    if data.len() < DATA_OFFSET {
        return Err(DecodeError::Truncated {
            offset: 0,
            needed: DATA_OFFSET,
            available: data.len(),
        });
    }

    let mut reading = SensorReading::default();
    for point in Tlvs::new(data, DATA_OFFSET, 1) {
        apply_data_point(&mut reading, &point?)?;
    }

    reading.validate()?;
    Ok(reading)
}

fn apply_data_point(reading: &mut SensorReading, point: &Tlv<'_>) -> Result<(), DecodeError> {
    match point.code {
        DP_TEMPERATURE => {
            reading.temperature = Some(temperature(i16::from_le_bytes(fixed(point)?))?);
        }
        DP_HUMIDITY => {
            reading.humidity = Some(humidity(i16::from_le_bytes(fixed(point)?))?);
        }
        DP_BATTERY => {
            let [level] = fixed(point)?;
            reading.battery = Some(level);
        }
        DP_TEMPERATURE_HUMIDITY => {
            let [t0, t1, h0, h1] = fixed(point)?;
            reading.temperature = Some(temperature(i16::from_le_bytes([t0, t1]))?);
            reading.humidity = Some(humidity(i16::from_le_bytes([h0, h1]))?);
        }
        _ => {}
    }
    Ok(())
}

fn temperature(tenths: i16) -> Result<i16, OutOfRange> {
    let value = i32::from(tenths) * 10;
    if !TEMPERATURE_RANGE.contains(&value) {
        return Err(OutOfRange {
            field: Field::Temperature,
            value,
        });
    }
    i16::try_from(value).map_err(|_| OutOfRange {
        field: Field::Temperature,
        value,
    })
}

fn humidity(tenths: i16) -> Result<u16, OutOfRange> {
    let value = i32::from(tenths) * 10;
    if !HUMIDITY_RANGE.contains(&value) {
        return Err(OutOfRange {
            field: Field::Humidity,
            value,
        });
    }
    u16::try_from(value).map_err(|_| OutOfRange {
        field: Field::Humidity,
        value,
    })
}
