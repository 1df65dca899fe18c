//! Registration of listeners with the host BLE scanner.
//!
//! The scanner backends don't know about Qingping frames; they hand every
//! advertisement to a [`ListenerRegistry`]. Listeners are registered before
//! scanning starts and the registry is shared read-only afterwards.

use crate::advertisement::AdvertisementPacket;
use crate::dispatcher::AdvertisementListener;
use std::fmt;
use std::sync::Arc;

/// Host-side registration entry point for advertisement listeners.
pub trait BleTracker {
    fn register_listener(&mut self, listener: Arc<dyn AdvertisementListener>);
}

/// Register `listener` with the host tracker.
pub fn register(tracker: &mut dyn BleTracker, listener: Arc<dyn AdvertisementListener>) {
    tracker.register_listener(listener);
}

/// Fan-out of advertisements to every registered listener.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Vec<Arc<dyn AdvertisementListener>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Deliver one advertisement to all listeners, in registration order.
    pub fn dispatch(&self, packet: &AdvertisementPacket<'_>) {
        for listener in &self.listeners {
            listener.on_advertisement(packet);
        }
    }
}

impl BleTracker for ListenerRegistry {
    fn register_listener(&mut self, listener: Arc<dyn AdvertisementListener>) {
        self.listeners.push(listener);
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
