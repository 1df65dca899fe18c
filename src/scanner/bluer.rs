//! BlueZ D-Bus backend.
//!
//! This backend uses the `bluer` crate to communicate with the BlueZ daemon
//! via D-Bus. It requires the `bluetoothd` daemon to be running.
//!
//! BlueZ only exposes advertisement contents as parsed property maps, so the
//! raw AD bytes are rebuilt before they reach the listeners.

use super::ScanError;
use crate::advertisement::{
    AD_TYPE_MANUFACTURER_DATA, AD_TYPE_SERVICE_DATA_16, AdvertisementBuilder, AdvertisementPacket,
};
use crate::decoder::VENDOR_ID;
use crate::mac_address::MacAddress;
use crate::reading::{UNKNOWN_RSSI, clamp_rssi};
use crate::service_data::{UUID_MIBEACON, UUID_QINGPING};
use crate::tracker::ListenerRegistry;
use bluer::monitor::{Monitor, MonitorEvent, Pattern};
use bluer::{Adapter, Address, Session, UuidExt};
use futures::StreamExt;
use log::debug;
use std::sync::Arc;

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

/// Advertisement monitor patterns: the vendor id and both Qingping service UUIDs.
fn patterns() -> Vec<Pattern> {
    let pattern = |data_type, id: u16| Pattern {
        data_type,
        start_position: 0,
        content: id.to_le_bytes().to_vec(),
    };
    vec![
        pattern(AD_TYPE_MANUFACTURER_DATA, VENDOR_ID),
        pattern(AD_TYPE_SERVICE_DATA_16, UUID_QINGPING),
        pattern(AD_TYPE_SERVICE_DATA_16, UUID_MIBEACON),
    ]
}

/// Start a passive scan through BlueZ.
///
/// Initializes the default adapter, registers an advertisement monitor and
/// spawns the event loop. Runs until the monitor stream ends.
pub async fn start_scan(listeners: Arc<ListenerRegistry>) -> Result<(), ScanError> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;

    let monitor_manager = adapter.monitor().await?;
    let mut monitor_handle = monitor_manager
        .register(Monitor {
            patterns: Some(patterns()),
            ..Default::default()
        })
        .await?;

    // Spawn a task that owns all Bluetooth state and runs the event loop
    tokio::spawn(async move {
        let _session = session;
        let _monitor_manager = monitor_manager;

        while let Some(event) = monitor_handle.next().await {
            if let MonitorEvent::DeviceFound(device_id) = event
                && let Err(e) = process_device(&adapter, device_id.device, &listeners).await
            {
                debug!("{}: {e}", MacAddress::from(device_id.device));
            }
        }
    });

    Ok(())
}

/// Rebuild the advertisement of a discovered device and dispatch it.
async fn process_device(
    adapter: &Adapter,
    address: Address,
    listeners: &ListenerRegistry,
) -> Result<(), ScanError> {
    let device = adapter.device(address)?;

    let mut builder = AdvertisementBuilder::new();
    for (company_id, data) in device.manufacturer_data().await?.unwrap_or_default() {
        builder = builder.manufacturer_data(company_id, &data);
    }
    for (uuid, data) in device.service_data().await?.unwrap_or_default() {
        if let Some(uuid) = uuid.as_u16() {
            builder = builder.service_data(uuid, &data);
        }
    }
    let raw = builder.build();
    if raw.is_empty() {
        return Ok(());
    }

    let rssi = device.rssi().await?.map_or(UNKNOWN_RSSI, clamp_rssi);
    listeners.dispatch(&AdvertisementPacket::new(address.into(), rssi, &raw));
    Ok(())
}
