pub mod data;
pub mod sink;

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::ValueEnum;
use tracing::{debug, info, warn};

use crate::devices::{DEFAULT_BAUD, LoggingMode, Result, WattsUp};
use data::Reply;
use sink::{Dashboard, Format, LineSink, NetworkSink, Sink, SinkError};

/// What the meter is told to do once connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Command {
    /// Record samples to stdout or a file
    #[default]
    Log,
    /// Record samples to the meter's internal memory
    Internal,
    /// Have the meter post samples to a server itself
    Network,
}

impl Command {
    pub fn logging_mode(self) -> LoggingMode {
        match self {
            Command::Log => LoggingMode::External,
            Command::Internal => LoggingMode::Internal,
            Command::Network => LoggingMode::Tcp,
        }
    }
}

/// Target of the network sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkTarget {
    pub host: String,
    pub port: u16,
    pub path: String,
}

/// Configuration for a logging session, fixed at startup.
#[derive(Debug, Clone)]
pub struct MeterConfig {
    pub port: String,                   // serial device path
    pub baud: u32,                      // serial line speed
    pub interval: u32,                  // seconds between samples
    pub command: Command,               // logging mode requested from the meter
    pub format: Format,                 // line format for terminal and file output
    pub interactive: bool,              // full-screen display instead of plain lines
    pub outfile: Option<PathBuf>,       // append samples here
    pub network: Option<NetworkTarget>, // POST samples here
    pub meter_id: String,               // id reported in network posts
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud: DEFAULT_BAUD,
            interval: 1,
            command: Command::Log,
            format: Format::Raw,
            interactive: false,
            outfile: None,
            network: None,
            meter_id: "wattsup".to_string(),
        }
    }
}

/// Counters reported when a session ends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub dispatched: u64,
    pub skipped: u64,
    pub sink_failures: u64,
}

/// Open every sink the configuration asks for.
///
/// Terminal output is plain lines unless interactive; it is left out when
/// samples already go to a file or a server and no display was requested.
pub fn build_sinks(config: &MeterConfig) -> std::result::Result<Vec<Box<dyn Sink>>, SinkError> {
    let mut sinks: Vec<Box<dyn Sink>> = Vec::new();

    if config.interactive {
        sinks.push(Box::new(Dashboard::new(
            config.interval,
            config.outfile.clone(),
        )?));
    } else if config.outfile.is_none() && config.network.is_none() {
        sinks.push(Box::new(LineSink::stdout(config.format)));
    }

    if let Some(path) = &config.outfile {
        sinks.push(Box::new(LineSink::append(path, config.format)?));
    }

    if let Some(target) = &config.network {
        sinks.push(Box::new(NetworkSink::new(
            &target.host,
            target.port,
            &target.path,
            &config.meter_id,
        )?));
    }

    Ok(sinks)
}

/// Read records until the stream closes, `stop` is set or a sink asks to quit.
///
/// `stop` is checked between reads, so it takes effect within one read
/// timeout. Malformed records and sink failures are logged and skipped.
pub fn run_logging<T: Read + Write>(
    meter: &mut WattsUp<T>,
    sinks: &mut [Box<dyn Sink>],
    stop: &AtomicBool,
) -> Result<RunSummary> {
    info!("Reading samples from {}", meter.path());
    let mut summary = RunSummary::default();

    loop {
        if stop.load(Ordering::SeqCst) || sinks.iter_mut().any(|sink| sink.quit_requested()) {
            info!("Stopped by operator");
            break;
        }

        let line = match meter.read_line() {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("Serial stream closed");
                break;
            }
            Err(e) if e.is_timeout() => continue,
            Err(e) => return Err(e),
        };

        match Reply::parse(&line) {
            Ok(Reply::Data(sample)) => {
                for sink in sinks.iter_mut() {
                    if let Err(e) = sink.dispatch(&sample) {
                        warn!("Failed to dispatch sample: {}", e);
                        summary.sink_failures += 1;
                    }
                }
                summary.dispatched += 1;
            }
            Ok(Reply::Header(columns)) => debug!("Header: {}", columns.join(", ")),
            Ok(Reply::Other(other)) => debug!("Ignoring line: {}", other),
            Err(e) => {
                warn!("Skipping malformed record {:?}: {}", line, e);
                summary.skipped += 1;
            }
        }
    }

    info!(
        "Session finished: {} samples, {} skipped, {} sink failures",
        summary.dispatched, summary.skipped, summary.sink_failures
    );
    Ok(summary)
}
