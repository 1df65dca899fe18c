//! Listener configuration.
//!
//! Configuration is validated when it is loaded: a malformed device address or
//! an unknown key fails here, before any listener is constructed.
//!
//! ```json
//! {
//!   "mac_address": ["58:2D:34:10:20:30"],
//!   "service_data": true
//! }
//! ```

use crate::filter::DeviceFilter;
use crate::mac_address::MacAddress;
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors returned when loading a configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Validated settings for one listener.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListenerConfig {
    /// Devices to listen to; empty listens to every Qingping device
    #[serde(default)]
    pub mac_address: Vec<MacAddress>,
    /// Also decode native Qingping service data frames
    #[serde(default = "default_service_data")]
    pub service_data: bool,
}

fn default_service_data() -> bool {
    true
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            mac_address: Vec::new(),
            service_data: default_service_data(),
        }
    }
}

impl ListenerConfig {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::from_json(&text).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    /// Add addresses given outside the file, e.g. on the command line.
    pub fn with_addresses(mut self, addresses: impl IntoIterator<Item = MacAddress>) -> Self {
        self.mac_address.extend(addresses);
        self
    }

    pub fn device_filter(&self) -> DeviceFilter {
        self.mac_address.iter().copied().collect()
    }
}
