//! Device allow-list applied before any payload inspection.

use crate::mac_address::MacAddress;
use std::collections::HashSet;

/// Set of device addresses a listener cares about.
///
/// An empty set accepts every device. Built once from configuration and never
/// modified afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceFilter {
    allowed: HashSet<MacAddress>,
}

impl DeviceFilter {
    /// A filter that accepts every device.
    pub fn accept_all() -> Self {
        Self::default()
    }

    pub fn is_accept_all(&self) -> bool {
        self.allowed.is_empty()
    }

    pub fn accepts(&self, address: &MacAddress) -> bool {
        self.allowed.is_empty() || self.allowed.contains(address)
    }

    pub fn len(&self) -> usize {
        self.allowed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }
}

impl FromIterator<MacAddress> for DeviceFilter {
    fn from_iter<I: IntoIterator<Item = MacAddress>>(iter: I) -> Self {
        Self {
            allowed: iter.into_iter().collect(),
        }
    }
}
