//! Raw BLE advertisement packets and the AD structures inside them.
//!
//! An advertisement payload is a sequence of AD structures, each laid out as
//! `[length][ad type][length - 1 bytes of data]`.

use crate::mac_address::MacAddress;

/// AD type for 16-bit UUID service data.
pub const AD_TYPE_SERVICE_DATA_16: u8 = 0x16;

/// AD type for manufacturer-specific data.
pub const AD_TYPE_MANUFACTURER_DATA: u8 = 0xFF;

/// One advertisement event as delivered by the host scanner.
///
/// Borrowed from the scanner's receive buffer; only valid for the duration of
/// a single listener callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvertisementPacket<'a> {
    pub address: MacAddress,
    /// Received signal strength in dBm
    pub rssi: i8,
    /// Concatenated AD structures
    pub data: &'a [u8],
}

impl<'a> AdvertisementPacket<'a> {
    pub fn new(address: MacAddress, rssi: i8, data: &'a [u8]) -> Self {
        Self {
            address,
            rssi,
            data,
        }
    }

    pub fn structures(&self) -> AdStructures<'a> {
        AdStructures { rest: self.data }
    }

    /// All manufacturer-specific data structures, in advertisement order.
    pub fn manufacturer_payloads(&self) -> impl Iterator<Item = ManufacturerPayload<'a>> {
        self.structures()
            .filter(|ad| ad.ad_type == AD_TYPE_MANUFACTURER_DATA)
            .map(|ad| ManufacturerPayload::new(ad.data))
    }

    /// All 16-bit service data structures with a complete UUID.
    pub fn service_data(&self) -> impl Iterator<Item = ServiceData<'a>> {
        self.structures()
            .filter(|ad| ad.ad_type == AD_TYPE_SERVICE_DATA_16)
            .filter_map(|ad| ServiceData::parse(ad.data))
    }
}

/// A single `(type, data)` element of an advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdStructure<'a> {
    pub ad_type: u8,
    pub data: &'a [u8],
}

/// Iterator over the AD structures of a payload.
///
/// Stops at a zero length byte (padding) or at a structure whose declared
/// length runs past the end of the buffer.
#[derive(Debug, Clone)]
pub struct AdStructures<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for AdStructures<'a> {
    type Item = AdStructure<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let (&len, tail) = self.rest.split_first()?;
        let len = usize::from(len);
        if len == 0 || len > tail.len() {
            self.rest = &[];
            return None;
        }

        let (body, rest) = tail.split_at(len);
        self.rest = rest;
        Some(AdStructure {
            ad_type: body[0],
            data: &body[1..],
        })
    }
}

/// Manufacturer-specific data, starting with the little-endian company identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManufacturerPayload<'a> {
    pub bytes: &'a [u8],
}

impl<'a> ManufacturerPayload<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    /// Company identifier, if at least two bytes are present.
    pub fn vendor_id(&self) -> Option<u16> {
        match self.bytes {
            [lo, hi, ..] => Some(u16::from_le_bytes([*lo, *hi])),
            _ => None,
        }
    }
}

/// 16-bit UUID service data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceData<'a> {
    pub uuid: u16,
    pub data: &'a [u8],
}

impl<'a> ServiceData<'a> {
    /// Split an AD type 0x16 body into UUID and payload.
    pub fn parse(body: &'a [u8]) -> Option<Self> {
        match body {
            [lo, hi, data @ ..] => Some(Self {
                uuid: u16::from_le_bytes([*lo, *hi]),
                data,
            }),
            _ => None,
        }
    }
}

/// Builds raw advertisement bytes from already separated fields.
///
/// Used by backends (BlueZ) that hand out parsed maps instead of the raw
/// payload. Structures longer than an AD length byte can express are skipped.
#[derive(Debug, Default, Clone)]
pub struct AdvertisementBuilder {
    buf: Vec<u8>,
}

impl AdvertisementBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn structure(mut self, ad_type: u8, parts: &[&[u8]]) -> Self {
        let data_len: usize = parts.iter().map(|p| p.len()).sum();
        let Ok(len) = u8::try_from(data_len + 1) else {
            return self;
        };
        self.buf.push(len);
        self.buf.push(ad_type);
        for part in parts {
            self.buf.extend_from_slice(part);
        }
        self
    }

    pub fn manufacturer_data(self, company_id: u16, data: &[u8]) -> Self {
        self.structure(
            AD_TYPE_MANUFACTURER_DATA,
            &[&company_id.to_le_bytes(), data],
        )
    }

    pub fn service_data(self, uuid: u16, data: &[u8]) -> Self {
        self.structure(AD_TYPE_SERVICE_DATA_16, &[&uuid.to_le_bytes(), data])
    }

    pub fn build(self) -> Vec<u8> {
        self.buf
    }
}
