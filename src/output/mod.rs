//! Output formatters for published observations.
//!
//! The binary prints one line per observation; the trait keeps the line
//! format swappable.

pub mod influxdb;

use crate::reading::Observation;

/// Converts an observation into a single output line.
pub trait OutputFormatter: Send + Sync {
    fn format(&self, observation: &Observation) -> String;
}
