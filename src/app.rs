//! Core application runner for `qingping-listener`.
//!
//! Decoupled from process setup (logging, exit codes) so the whole
//! scan → dispatch → format pipeline can be driven by a fake scanner in tests.

use crate::config::{ConfigError, ListenerConfig};
use crate::dispatcher::{ChannelPublisher, DiagnosticsSnapshot, Dispatcher};
use crate::mac_address::MacAddress;
use crate::output::OutputFormatter;
use crate::output::influxdb::{DEFAULT_MEASUREMENT, InfluxDbFormatter};
use crate::reading::Observation;
use crate::scanner::{Backend, ScanError};
use crate::tracker::{ListenerRegistry, register};
use clap::Parser;
use log::info;
use std::future::Future;
use std::io;
use std::io::Write;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Buffered observations between the radio callback and the output loop.
pub const OBSERVATION_CHANNEL_BUFFER_SIZE: usize = 100;

/// Command line options.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// The name of the measurement in InfluxDB line protocol.
    #[arg(long, default_value = DEFAULT_MEASUREMENT)]
    pub influxdb_measurement: String,

    /// Only listen to this device. Repeat for several devices.
    /// Format: --mac 58:2D:34:10:20:30
    #[arg(long = "mac", value_name = "MAC")]
    pub macs: Vec<MacAddress>,

    /// JSON listener configuration file.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Ignore native Qingping service data frames.
    #[arg(long)]
    pub no_service_data: bool,

    /// Verbose output, log decode errors for unrecognized data
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Bluetooth scanner backend to use
    #[arg(long, default_value_t, value_enum)]
    pub backend: Backend,
}

impl Options {
    /// Merge the config file (if any) with command line overrides.
    pub fn listener_config(&self) -> Result<ListenerConfig, ConfigError> {
        let config = match &self.config {
            Some(path) => ListenerConfig::load(path)?,
            None => ListenerConfig::default(),
        };
        let mut config = config.with_addresses(self.macs.iter().copied());
        if self.no_service_data {
            config.service_data = false;
        }
        Ok(config)
    }
}

/// Errors returned by the core run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Scanner abstraction to enable deterministic unit tests without Bluetooth hardware.
pub trait Scanner: Send + Sync {
    /// Start delivering advertisements to `listeners` in the background.
    fn start_scan(
        &self,
        backend: Backend,
        listeners: Arc<ListenerRegistry>,
    ) -> Pin<Box<dyn Future<Output = Result<(), ScanError>> + Send + '_>>;
}

/// Real scanner implementation that delegates to the compiled-in backends.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealScanner;

impl Scanner for RealScanner {
    fn start_scan(
        &self,
        backend: Backend,
        listeners: Arc<ListenerRegistry>,
    ) -> Pin<Box<dyn Future<Output = Result<(), ScanError>> + Send + '_>> {
        Box::pin(crate::scanner::start_scan(backend, listeners))
    }
}

fn write_observation(
    formatter: &dyn OutputFormatter,
    observation: &Observation,
    out: &mut dyn Write,
) -> io::Result<()> {
    let line = formatter.format(observation);
    writeln!(out, "{line}")
}

/// Run the listener until the scanner stops, writing one line per observation to `out`.
///
/// Returns the dispatcher's counters once the scanner has released the
/// listeners and every buffered observation has been written.
pub async fn run_with_io(
    options: Options,
    scanner: &dyn Scanner,
    out: &mut dyn Write,
) -> Result<DiagnosticsSnapshot, RunError> {
    let config = options.listener_config()?;
    let formatter = InfluxDbFormatter::new(options.influxdb_measurement);

    let (tx, mut observations) = mpsc::channel(OBSERVATION_CHANNEL_BUFFER_SIZE);
    let dispatcher = Dispatcher::from_config(&config, ChannelPublisher::new(tx));
    let diagnostics = dispatcher.diagnostics();

    let filter = config.device_filter();
    if filter.is_accept_all() {
        info!("Listening to all Qingping devices");
    } else {
        info!("Listening to {} Qingping device(s)", filter.len());
    }

    let mut registry = ListenerRegistry::new();
    register(&mut registry, Arc::new(dispatcher));
    scanner.start_scan(options.backend, Arc::new(registry)).await?;

    while let Some(observation) = observations.recv().await {
        write_observation(&formatter, &observation, out)?;
    }

    let stats = diagnostics.snapshot();
    info!(
        "Scan finished: {} published, {} dropped, {} filtered out, {} ignored, {} decode failures",
        stats.published,
        stats.dropped,
        stats.filtered_out,
        stats.ignored,
        stats.decode_failures()
    );
    Ok(stats)
}
