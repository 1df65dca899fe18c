//! Advertisement listener that turns Qingping payloads into published observations.
//!
//! [`Dispatcher::on_advertisement`] runs inside the host scanner's radio
//! callback: it never blocks and never fails. Anything that is not a valid
//! Qingping frame from an accepted device is dropped and counted.

use crate::advertisement::AdvertisementPacket;
use crate::config::ListenerConfig;
use crate::decoder::{self, DecodeError};
use crate::filter::DeviceFilter;
use crate::reading::{FrameFormat, Observation, SensorReading, clamp_rssi};
use crate::service_data;
use log::{debug, trace, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Receives every advertisement the host scanner observes.
pub trait AdvertisementListener: Send + Sync {
    fn on_advertisement(&self, packet: &AdvertisementPacket<'_>);
}

/// Sink for decoded observations.
pub trait Publisher: Send + Sync {
    /// Hand over one observation. Returns `false` if it was dropped.
    fn publish(&self, observation: Observation) -> bool;
}

impl<F> Publisher for F
where
    F: Fn(Observation) + Send + Sync,
{
    fn publish(&self, observation: Observation) -> bool {
        self(observation);
        true
    }
}

/// Publisher that forwards observations into a bounded channel without waiting.
///
/// Observations are dropped (with a warning) while the channel is full.
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    tx: mpsc::Sender<Observation>,
}

impl ChannelPublisher {
    pub fn new(tx: mpsc::Sender<Observation>) -> Self {
        Self { tx }
    }
}

impl Publisher for ChannelPublisher {
    fn publish(&self, observation: Observation) -> bool {
        match self.tx.try_send(observation) {
            Ok(()) => true,
            Err(TrySendError::Full(dropped)) => {
                warn!("Output channel full, dropping reading from {}", dropped.mac);
                false
            }
            Err(TrySendError::Closed(_)) => {
                trace!("Output channel closed");
                false
            }
        }
    }
}

/// Event counters shared between the dispatcher and whoever reports on it.
#[derive(Debug, Default)]
pub struct Diagnostics {
    filtered_out: AtomicU64,
    ignored: AtomicU64,
    foreign: AtomicU64,
    malformed: AtomicU64,
    published: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time copy of [`Diagnostics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    /// Advertisements from devices outside the filter
    pub filtered_out: u64,
    /// Advertisements without a usable payload
    pub ignored: u64,
    /// Payloads from other vendors or devices
    pub foreign: u64,
    /// Qingping payloads that failed to decode
    pub malformed: u64,
    /// Observations accepted by the publisher
    pub published: u64,
    /// Decoded observations the publisher could not accept
    pub dropped: u64,
}

impl DiagnosticsSnapshot {
    pub fn decode_failures(&self) -> u64 {
        self.foreign + self.malformed
    }
}

impl Diagnostics {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            filtered_out: self.filtered_out.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            foreign: self.foreign.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Filters, decodes and publishes Qingping advertisements.
pub struct Dispatcher<P> {
    filter: DeviceFilter,
    service_data: bool,
    publisher: P,
    diagnostics: Arc<Diagnostics>,
}

impl<P: Publisher> Dispatcher<P> {
    pub fn new(filter: DeviceFilter, publisher: P) -> Self {
        Self {
            filter,
            service_data: true,
            publisher,
            diagnostics: Arc::default(),
        }
    }

    pub fn from_config(config: &ListenerConfig, publisher: P) -> Self {
        Self {
            service_data: config.service_data,
            ..Self::new(config.device_filter(), publisher)
        }
    }

    /// Shared handle to this dispatcher's counters.
    pub fn diagnostics(&self) -> Arc<Diagnostics> {
        Arc::clone(&self.diagnostics)
    }

    fn handle(
        &self,
        packet: &AdvertisementPacket<'_>,
        format: FrameFormat,
        decoded: Result<SensorReading, DecodeError>,
    ) {
        match decoded {
            Ok(reading) if reading.is_empty() => {
                trace!("{}: {format} frame without sensor fields", packet.address);
                Diagnostics::bump(&self.diagnostics.ignored);
            }
            Ok(reading) => {
                let reading = SensorReading {
                    rssi: Some(clamp_rssi(packet.rssi.into())),
                    ..reading
                };
                debug!("Got {format} reading from {}: {reading}", packet.address);
                let observation = Observation {
                    mac: packet.address,
                    timestamp: SystemTime::now(),
                    format,
                    reading,
                };
                if self.publisher.publish(observation) {
                    Diagnostics::bump(&self.diagnostics.published);
                } else {
                    Diagnostics::bump(&self.diagnostics.dropped);
                }
            }
            Err(e) if e.is_foreign() => {
                trace!("{}: {e}", packet.address);
                Diagnostics::bump(&self.diagnostics.foreign);
            }
            Err(e) => {
                debug!("{}: {e}", packet.address);
                Diagnostics::bump(&self.diagnostics.malformed);
            }
        }
    }
}

impl<P: Publisher> AdvertisementListener for Dispatcher<P> {
    fn on_advertisement(&self, packet: &AdvertisementPacket<'_>) {
        if !self.filter.accepts(&packet.address) {
            Diagnostics::bump(&self.diagnostics.filtered_out);
            return;
        }

        let mut candidates = 0;
        for payload in packet.manufacturer_payloads() {
            candidates += 1;
            self.handle(packet, FrameFormat::Manufacturer, decoder::decode(&payload));
        }
        if self.service_data {
            for service in packet.service_data().filter(service_data::is_qingping) {
                candidates += 1;
                self.handle(
                    packet,
                    FrameFormat::Cgg1,
                    service_data::decode_service_data(&service),
                );
            }
        }

        if candidates == 0 {
            Diagnostics::bump(&self.diagnostics.ignored);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advertisement::AdvertisementBuilder;
    use crate::decoder::VENDOR_ID;
    use crate::mac_address::MacAddress;
    use crate::service_data::UUID_QINGPING;
    use crate::test_utils::{TEST_MAC, sensor_advertisement};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<Observation>>);

    impl Publisher for Collect {
        fn publish(&self, observation: Observation) -> bool {
            self.0.lock().unwrap().push(observation);
            true
        }
    }

    fn dispatcher(filter: DeviceFilter) -> Dispatcher<Collect> {
        Dispatcher::new(filter, Collect::default())
    }

    fn published(dispatcher: &Dispatcher<Collect>) -> Vec<Observation> {
        dispatcher.publisher.0.lock().unwrap().clone()
    }

    fn temperature_advertisement() -> Vec<u8> {
        sensor_advertisement(&[0x01, 0x02, 0x66, 0x08])
    }

    #[test]
    fn test_publishes_reading_with_rssi() {
        let dispatcher = dispatcher(DeviceFilter::accept_all());
        let raw = temperature_advertisement();
        dispatcher.on_advertisement(&AdvertisementPacket::new(TEST_MAC, -61, &raw));

        let published = published(&dispatcher);
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].mac, TEST_MAC);
        assert_eq!(published[0].format, FrameFormat::Manufacturer);
        assert_eq!(published[0].reading.temperature, Some(2150));
        assert_eq!(published[0].reading.rssi, Some(-61));
        assert_eq!(dispatcher.diagnostics().snapshot().published, 1);
    }

    #[test]
    fn test_filter_rejects_before_decoding() {
        let other = MacAddress([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
        let dispatcher = dispatcher([other].into_iter().collect());
        let raw = temperature_advertisement();
        dispatcher.on_advertisement(&AdvertisementPacket::new(TEST_MAC, -61, &raw));

        assert!(published(&dispatcher).is_empty());
        let stats = dispatcher.diagnostics().snapshot();
        assert_eq!(stats.filtered_out, 1);
        assert_eq!(stats.decode_failures(), 0);
    }

    #[test]
    fn test_packet_without_payload_is_ignored() {
        let dispatcher = dispatcher(DeviceFilter::accept_all());
        let raw = AdvertisementBuilder::new().structure(0x09, &[b"CGG1"]).build();
        dispatcher.on_advertisement(&AdvertisementPacket::new(TEST_MAC, -80, &raw));

        assert!(published(&dispatcher).is_empty());
        assert_eq!(dispatcher.diagnostics().snapshot().ignored, 1);
    }

    #[test]
    fn test_counts_foreign_and_malformed() {
        let dispatcher = dispatcher(DeviceFilter::accept_all());

        let foreign = AdvertisementBuilder::new()
            .manufacturer_data(0x0499, &[0x05, 0x12, 0xFC])
            .build();
        dispatcher.on_advertisement(&AdvertisementPacket::new(TEST_MAC, -70, &foreign));

        let truncated = AdvertisementBuilder::new()
            .manufacturer_data(VENDOR_ID, &[0x01, 0x01, 0x04, 0x66, 0x08])
            .build();
        dispatcher.on_advertisement(&AdvertisementPacket::new(TEST_MAC, -70, &truncated));

        assert!(published(&dispatcher).is_empty());
        let stats = dispatcher.diagnostics().snapshot();
        assert_eq!(stats.foreign, 1);
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.decode_failures(), 2);
        assert_eq!(stats.published, 0);
    }

    #[test]
    fn test_empty_reading_not_published() {
        let dispatcher = dispatcher(DeviceFilter::accept_all());
        let raw = sensor_advertisement(&[0x7F, 0x01, 0x00]);
        dispatcher.on_advertisement(&AdvertisementPacket::new(TEST_MAC, -70, &raw));

        assert!(published(&dispatcher).is_empty());
        assert_eq!(dispatcher.diagnostics().snapshot().ignored, 1);
    }

    fn cgg1_advertisement() -> Vec<u8> {
        let frame = [
            0x08, 0x01, 0x30, 0x20, 0x10, 0x34, 0x2D, 0x58, // header
            0x0A, 0x10, 0x01, 0x4B, // battery 75 %
        ];
        AdvertisementBuilder::new()
            .service_data(UUID_QINGPING, &frame)
            .build()
    }

    #[test]
    fn test_service_data_frames() {
        let dispatcher = dispatcher(DeviceFilter::accept_all());
        let raw = cgg1_advertisement();
        dispatcher.on_advertisement(&AdvertisementPacket::new(TEST_MAC, -55, &raw));

        let published = published(&dispatcher);
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].format, FrameFormat::Cgg1);
        assert_eq!(published[0].reading.battery, Some(75));
    }

    #[test]
    fn test_service_data_can_be_disabled() {
        let config = ListenerConfig {
            service_data: false,
            ..Default::default()
        };
        let dispatcher = Dispatcher::from_config(&config, Collect::default());
        let raw = cgg1_advertisement();
        dispatcher.on_advertisement(&AdvertisementPacket::new(TEST_MAC, -55, &raw));

        assert!(published(&dispatcher).is_empty());
        assert_eq!(dispatcher.diagnostics().snapshot().ignored, 1);
    }

    #[test]
    fn test_closure_publisher() {
        let count = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&count);
        let dispatcher = Dispatcher::new(DeviceFilter::accept_all(), move |_: Observation| {
            seen.fetch_add(1, Ordering::Relaxed);
        });
        let raw = temperature_advertisement();
        for _ in 0..3 {
            dispatcher.on_advertisement(&AdvertisementPacket::new(TEST_MAC, -61, &raw));
        }
        assert_eq!(count.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_channel_publisher_drops_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let dispatcher = Dispatcher::new(DeviceFilter::accept_all(), ChannelPublisher::new(tx));
        let raw = temperature_advertisement();
        dispatcher.on_advertisement(&AdvertisementPacket::new(TEST_MAC, -61, &raw));
        dispatcher.on_advertisement(&AdvertisementPacket::new(TEST_MAC, -62, &raw));

        dispatcher.on_advertisement(&AdvertisementPacket::new(TEST_MAC, -63, &raw));

        let first = rx.try_recv().unwrap();
        assert_eq!(first.reading.rssi, Some(-61));
        assert!(rx.try_recv().is_err());

        let stats = dispatcher.diagnostics().snapshot();
        assert_eq!(stats.published, 1);
        assert_eq!(stats.dropped, 2);
    }

    #[test]
    fn test_channel_publisher_counts_closed_channel_as_dropped() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let dispatcher = Dispatcher::new(DeviceFilter::accept_all(), ChannelPublisher::new(tx));
        let raw = temperature_advertisement();
        dispatcher.on_advertisement(&AdvertisementPacket::new(TEST_MAC, -61, &raw));

        let stats = dispatcher.diagnostics().snapshot();
        assert_eq!(stats.published, 0);
        assert_eq!(stats.dropped, 1);
    }

    #[test]
    fn test_rssi_kept_in_plausible_range() {
        let dispatcher = dispatcher(DeviceFilter::accept_all());
        let raw = temperature_advertisement();
        dispatcher.on_advertisement(&AdvertisementPacket::new(TEST_MAC, 127, &raw));
        dispatcher.on_advertisement(&AdvertisementPacket::new(TEST_MAC, -128, &raw));

        let published = published(&dispatcher);
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].reading.rssi, Some(20));
        assert_eq!(published[1].reading.rssi, Some(-127));
        assert!(published.iter().all(|o| o.reading.validate().is_ok()));
    }
}
