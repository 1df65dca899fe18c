//! Decoder for the manufacturer-specific sensor frame.
//!
//! Frame layout (all multi-byte values little-endian):
//!
//! | Offset | Size | Content                         |
//! |--------|------|---------------------------------|
//! | 0      | 2    | vendor id (`0x1234`)            |
//! | 2      | 1    | frame type (`0x01`, sensor)     |
//! | 3      | ..   | `[code][len][value; len]` TLVs  |
//!
//! Known codes have a fixed length. Unknown codes are skipped using their
//! declared length so newer firmware fields don't break older decoders.

use crate::advertisement::ManufacturerPayload;
use crate::reading::{OutOfRange, SensorReading};
use thiserror::Error;

/// Vendor identifier expected in the first two payload bytes.
pub const VENDOR_ID: u16 = 0x1234;

/// Frame type carrying sensor TLVs.
pub const FRAME_TYPE_SENSOR: u8 = 0x01;

/// Vendor id plus frame type.
pub const HEADER_LEN: usize = 3;

/// Temperature, `i16`, hundredths of a degree Celsius.
pub const CODE_TEMPERATURE: u8 = 0x01;
/// Relative humidity, `u16`, hundredths of a percent.
pub const CODE_HUMIDITY: u8 = 0x02;
/// Battery level, `u8`, percent.
pub const CODE_BATTERY: u8 = 0x03;

/// Errors returned when a payload cannot be turned into a [`SensorReading`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Payload belongs to another vendor, device or frame type
    #[error("Bad header: vendor {vendor_id:#06x}, frame type {frame_type:#04x}")]
    BadHeader { vendor_id: u16, frame_type: u8 },
    /// Payload ends before the bytes a header or field declares
    #[error("Truncated payload: {needed} bytes needed at offset {offset}, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },
    /// Known field with a declared length that does not match its encoding
    #[error("Field {code:#04x} declares {actual} bytes, expected {expected}")]
    LengthMismatch {
        code: u8,
        expected: usize,
        actual: usize,
    },
    /// Decoded value is physically implausible
    #[error("Implausible reading: {0}")]
    OutOfRange(#[from] OutOfRange),
}

impl DecodeError {
    /// Whether the payload simply belongs to someone else.
    pub fn is_foreign(&self) -> bool {
        matches!(self, DecodeError::BadHeader { .. })
    }
}

/// A bounds-checked cursor over TLV records.
pub(crate) struct Tlvs<'a> {
    bytes: &'a [u8],
    offset: usize,
    /// Bytes between the type code and the length byte
    gap: usize,
}

/// One record yielded by [`Tlvs`].
pub(crate) struct Tlv<'a> {
    pub code: u8,
    pub value: &'a [u8],
}

impl<'a> Tlvs<'a> {
    /// Records start at `offset`, each `[code][gap bytes][len][value]`.
    pub fn new(bytes: &'a [u8], offset: usize, gap: usize) -> Self {
        Self { bytes, offset, gap }
    }
}

impl<'a> Iterator for Tlvs<'a> {
    type Item = Result<Tlv<'a>, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        let remaining = self.bytes.len().checked_sub(self.offset)?;
        if remaining == 0 {
            return None;
        }

        let header = 2 + self.gap;
        if remaining < header {
            let err = DecodeError::Truncated {
                offset: self.offset,
                needed: header,
                available: remaining,
            };
            self.offset = self.bytes.len();
            return Some(Err(err));
        }

        let code = self.bytes[self.offset];
        let len = usize::from(self.bytes[self.offset + header - 1]);
        let start = self.offset + header;
        let available = self.bytes.len() - start;
        if len > available {
            self.offset = self.bytes.len();
            return Some(Err(DecodeError::Truncated {
                offset: start,
                needed: len,
                available,
            }));
        }

        self.offset = start + len;
        Some(Ok(Tlv {
            code,
            value: &self.bytes[start..start + len],
        }))
    }
}

/// Check that a known field carries exactly `N` bytes.
pub(crate) fn fixed<const N: usize>(tlv: &Tlv<'_>) -> Result<[u8; N], DecodeError> {
    tlv.value
        .try_into()
        .map_err(|_| DecodeError::LengthMismatch {
            code: tlv.code,
            expected: N,
            actual: tlv.value.len(),
        })
}

/// Decode a manufacturer payload into a validated reading.
///
/// The returned reading never has `rssi` set; that comes from the packet.
pub fn decode(payload: &ManufacturerPayload<'_>) -> Result<SensorReading, DecodeError> {
    let bytes = payload.bytes;
    let (Some(vendor_id), Some(&frame_type)) = (payload.vendor_id(), bytes.get(2)) else {
        return Err(DecodeError::Truncated {
            offset: 0,
            needed: HEADER_LEN,
            available: bytes.len(),
        });
    };

    if vendor_id != VENDOR_ID || frame_type != FRAME_TYPE_SENSOR {
        return Err(DecodeError::BadHeader {
            vendor_id,
            frame_type,
        });
    }

    let mut reading = SensorReading::default();
    for tlv in Tlvs::new(bytes, HEADER_LEN, 0) {
        let tlv = tlv?;
        match tlv.code {
            CODE_TEMPERATURE => reading.temperature = Some(i16::from_le_bytes(fixed(&tlv)?)),
            CODE_HUMIDITY => reading.humidity = Some(u16::from_le_bytes(fixed(&tlv)?)),
            CODE_BATTERY => reading.battery = Some(u8::from_le_bytes(fixed(&tlv)?)),
            _ => {}
        }
    }

    reading.validate()?;
    Ok(reading)
}

/// Encode the sensor fields of a reading as a manufacturer payload.
///
/// Inverse of [`decode`]; `rssi` is not part of the frame and is dropped.
pub fn encode(reading: &SensorReading) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + 11);
    out.extend_from_slice(&VENDOR_ID.to_le_bytes());
    out.push(FRAME_TYPE_SENSOR);

    let mut field = |code: u8, value: &[u8]| {
        out.push(code);
        out.push(value.len() as u8);
        out.extend_from_slice(value);
    };
    if let Some(t) = reading.temperature {
        field(CODE_TEMPERATURE, &t.to_le_bytes());
    }
    if let Some(h) = reading.humidity {
        field(CODE_HUMIDITY, &h.to_le_bytes());
    }
    if let Some(b) = reading.battery {
        field(CODE_BATTERY, &[b]);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::Field;

    fn decode_bytes(bytes: &[u8]) -> Result<SensorReading, DecodeError> {
        decode(&ManufacturerPayload::new(bytes))
    }

    #[test]
    fn test_decode_temperature_and_humidity() {
        // 2150 = 0x0866, 4500 = 0x1194
        let bytes = [
            0x34, 0x12, 0x01, // header
            0x01, 0x02, 0x66, 0x08, // temperature 21.50
            0x02, 0x02, 0x94, 0x11, // humidity 45.00
        ];
        let reading = decode_bytes(&bytes).unwrap();
        assert_eq!(reading.temperature, Some(2150));
        assert_eq!(reading.humidity, Some(4500));
        assert_eq!(reading.battery, None);
        assert_eq!(reading.rssi, None);
        assert_eq!(reading.temperature_celsius(), Some(21.5));
        assert_eq!(reading.humidity_percent(), Some(45.0));
    }

    #[test]
    fn test_decode_negative_temperature_and_battery() {
        let bytes = [0x34, 0x12, 0x01, 0x01, 0x02, 0x0C, 0xFE, 0x03, 0x01, 0x57];
        let reading = decode_bytes(&bytes).unwrap();
        assert_eq!(reading.temperature, Some(-500));
        assert_eq!(reading.battery, Some(87));
    }

    #[test]
    fn test_declared_length_exceeds_remaining() {
        let bytes = [0x34, 0x12, 0x01, 0x01, 0x04, 0x66, 0x08];
        assert_eq!(
            decode_bytes(&bytes),
            Err(DecodeError::Truncated {
                offset: 5,
                needed: 4,
                available: 2
            })
        );
    }

    #[test]
    fn test_code_without_length_byte() {
        let bytes = [0x34, 0x12, 0x01, 0x01, 0x02, 0x66, 0x08, 0x02];
        assert!(matches!(
            decode_bytes(&bytes),
            Err(DecodeError::Truncated { offset: 7, .. })
        ));
    }

    #[test]
    fn test_short_input_never_yields_reading() {
        let full = [0x34, 0x12, 0x01];
        for len in 0..HEADER_LEN {
            let err = decode_bytes(&full[..len]).unwrap_err();
            assert!(matches!(
                err,
                DecodeError::Truncated { .. } | DecodeError::BadHeader { .. }
            ));
        }
    }

    #[test]
    fn test_header_only_is_empty_reading() {
        let reading = decode_bytes(&[0x34, 0x12, 0x01]).unwrap();
        assert!(reading.is_empty());
    }

    #[test]
    fn test_bad_vendor() {
        let bytes = [0x99, 0x04, 0x01, 0x01, 0x02, 0x66, 0x08];
        let err = decode_bytes(&bytes).unwrap_err();
        assert_eq!(
            err,
            DecodeError::BadHeader {
                vendor_id: 0x0499,
                frame_type: 0x01
            }
        );
        assert!(err.is_foreign());
    }

    #[test]
    fn test_bad_frame_type() {
        let bytes = [0x34, 0x12, 0x02, 0x01, 0x02, 0x66, 0x08];
        assert!(matches!(
            decode_bytes(&bytes),
            Err(DecodeError::BadHeader {
                frame_type: 0x02,
                ..
            })
        ));
    }

    #[test]
    fn test_unknown_codes_are_skipped() {
        let bytes = [
            0x34, 0x12, 0x01, //
            0x7F, 0x03, 0xDE, 0xAD, 0xBE, // unknown, 3 bytes
            0x01, 0x02, 0x66, 0x08, //
            0x80, 0x00, // unknown, empty
            0x02, 0x02, 0x94, 0x11, //
            0x81, 0x01, 0xFF, // unknown, 1 byte
        ];
        let reading = decode_bytes(&bytes).unwrap();
        assert_eq!(reading.temperature, Some(2150));
        assert_eq!(reading.humidity, Some(4500));
    }

    #[test]
    fn test_known_code_with_wrong_length() {
        let bytes = [0x34, 0x12, 0x01, 0x03, 0x02, 0x50, 0x00];
        assert_eq!(
            decode_bytes(&bytes),
            Err(DecodeError::LengthMismatch {
                code: CODE_BATTERY,
                expected: 1,
                actual: 2
            })
        );
    }

    #[test]
    fn test_implausible_humidity_rejected() {
        // 12000 = 120.00 %
        let bytes = [0x34, 0x12, 0x01, 0x02, 0x02, 0xE0, 0x2E];
        assert_eq!(
            decode_bytes(&bytes).unwrap_err(),
            DecodeError::OutOfRange(OutOfRange {
                field: Field::Humidity,
                value: 12_000
            })
        );
    }

    #[test]
    fn test_encode_then_decode_preserves_scale() {
        let readings = [
            SensorReading {
                temperature: Some(2150),
                humidity: Some(4500),
                battery: Some(100),
                rssi: None,
            },
            SensorReading {
                temperature: Some(-3999),
                ..Default::default()
            },
            SensorReading {
                humidity: Some(1),
                battery: Some(0),
                ..Default::default()
            },
        ];
        for reading in readings {
            let bytes = encode(&reading);
            assert_eq!(decode_bytes(&bytes), Ok(reading));
        }
    }

    #[test]
    fn test_encode_layout() {
        let reading = SensorReading {
            temperature: Some(2150),
            battery: Some(50),
            ..Default::default()
        };
        assert_eq!(
            encode(&reading),
            vec![0x34, 0x12, 0x01, 0x01, 0x02, 0x66, 0x08, 0x03, 0x01, 0x32]
        );
    }

    #[test]
    fn test_decode_error_display() {
        let err = DecodeError::BadHeader {
            vendor_id: 0x0499,
            frame_type: 0x05,
        };
        assert_eq!(err.to_string(), "Bad header: vendor 0x0499, frame type 0x05");

        let err = DecodeError::Truncated {
            offset: 5,
            needed: 4,
            available: 2,
        };
        assert_eq!(
            err.to_string(),
            "Truncated payload: 4 bytes needed at offset 5, 2 available"
        );
    }
}
