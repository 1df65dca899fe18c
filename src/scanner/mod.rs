//! BLE scanner backends.
//!
//! A backend owns the radio side: it turns whatever the platform delivers into
//! [`AdvertisementPacket`](crate::advertisement::AdvertisementPacket)s and
//! hands each one to the injected [`ListenerRegistry`]. Decoding lives in the
//! listeners, not here.

#[cfg(feature = "bluer")]
pub mod bluer;

#[cfg(feature = "hci")]
pub mod hci;

use crate::tracker::ListenerRegistry;
use log::info;
use std::sync::Arc;
use thiserror::Error;

/// Error type for scanner operations.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
}

/// Available scanner backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    /// BlueZ D-Bus backend (requires bluetoothd daemon)
    #[cfg(feature = "bluer")]
    #[value(alias = "bluez")]
    Bluer,
    /// Raw HCI socket backend (direct kernel access, no daemon required)
    #[cfg(feature = "hci")]
    #[value(alias = "raw")]
    Hci,
}

impl Default for Backend {
    fn default() -> Self {
        #[cfg(feature = "bluer")]
        return Backend::Bluer;
        #[cfg(all(feature = "hci", not(feature = "bluer")))]
        return Backend::Hci;
        #[cfg(not(any(feature = "bluer", feature = "hci")))]
        compile_error!("At least one backend feature must be enabled");
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "bluer")]
            Backend::Bluer => write!(f, "bluer"),
            #[cfg(feature = "hci")]
            Backend::Hci => write!(f, "hci"),
        }
    }
}

/// Start scanning with the given backend, feeding every advertisement to `listeners`.
///
/// Returns once the scan is running; scanning continues on a spawned task
/// that holds the registry until the radio side shuts down.
pub async fn start_scan(backend: Backend, listeners: Arc<ListenerRegistry>) -> Result<(), ScanError> {
    info!("Starting {backend} scanner with {} listener(s)", listeners.len());
    match backend {
        #[cfg(feature = "bluer")]
        Backend::Bluer => bluer::start_scan(listeners).await,
        #[cfg(feature = "hci")]
        Backend::Hci => hci::start_scan(listeners).await,
    }
}
