use crate::advertisement::AdvertisementBuilder;
use crate::decoder::{FRAME_TYPE_SENSOR, VENDOR_ID};
use crate::mac_address::MacAddress;

/// A stable device address for unit tests.
pub const TEST_MAC: MacAddress = MacAddress([0x58, 0x2D, 0x34, 0x10, 0x20, 0x30]);

/// Raw advertisement with a flags structure and a sensor frame carrying `tlvs`.
pub fn sensor_advertisement(tlvs: &[u8]) -> Vec<u8> {
    let mut frame = vec![FRAME_TYPE_SENSOR];
    frame.extend_from_slice(tlvs);
    AdvertisementBuilder::new()
        .structure(0x01, &[&[0x06]])
        .manufacturer_data(VENDOR_ID, &frame)
        .build()
}
