//! `qingping-listener` library.
//!
//! The binary (`src/main.rs`) is responsible for logging setup and process exit codes.
//! The core “business logic” lives in [`crate::app`] where it can be tested
//! deterministically with an injected scanner and output stream. Everything
//! below the scanner (decoding, filtering, dispatch) is plain synchronous code
//! that a host BLE stack can drive through [`tracker::register`].

pub mod advertisement;
pub mod app;
pub mod config;
pub mod decoder;
pub mod dispatcher;
pub mod filter;
pub mod mac_address;
pub mod output;
pub mod reading;
pub mod scanner;
pub mod service_data;
pub mod tracker;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use advertisement::{AdvertisementBuilder, AdvertisementPacket, ManufacturerPayload, ServiceData};
pub use config::{ConfigError, ListenerConfig};
pub use decoder::{DecodeError, decode, encode};
pub use dispatcher::{
    AdvertisementListener, ChannelPublisher, Diagnostics, DiagnosticsSnapshot, Dispatcher, Publisher,
};
pub use filter::DeviceFilter;
pub use mac_address::MacAddress;
pub use output::OutputFormatter;
pub use output::influxdb::InfluxDbFormatter;
pub use reading::{FrameFormat, Observation, SensorReading};
pub use scanner::{Backend, ScanError};
pub use service_data::decode_service_data;
pub use tracker::{BleTracker, ListenerRegistry, register};
