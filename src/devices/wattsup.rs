use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::Path;
use std::time::Duration;

use serialport::SerialPort;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::session::data::Reply;

pub const DEFAULT_BAUD: u32 = 115_200;

const HEADER_REQUEST: &str = "#H,R,0;";
const SOFT_RESET: &str = "#V,W,0;";
const FULL_HANDLING: u8 = 2;
const MAX_HEADER_ATTEMPTS: usize = 10;
const READ_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum WattsUpError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Serial error: {0}")]
    SerialError(#[from] serialport::Error),

    #[error("Unable to find {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Meter did not answer the header request after {0} attempts")]
    NoHeader(usize),

    #[error("Device not connected")]
    NotConnected,
}

impl WattsUpError {
    /// A read that ran into the serial timeout without a complete line.
    pub fn is_timeout(&self) -> bool {
        matches!(self, WattsUpError::IoError(e) if e.kind() == io::ErrorKind::TimedOut)
    }
}

pub type Result<T> = std::result::Result<T, WattsUpError>;

/// Where the meter sends its samples once logging starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    /// Stream `#d` records over the serial line.
    External,
    /// Keep samples in the meter's internal memory.
    Internal,
    /// Push samples over the meter's own network interface.
    Tcp,
}

impl LoggingMode {
    fn code(self) -> char {
        match self {
            LoggingMode::External => 'E',
            LoggingMode::Internal => 'I',
            LoggingMode::Tcp => 'T',
        }
    }
}

pub struct WattsUp<T: Read + Write = Box<dyn SerialPort>> {
    device: Option<BufReader<T>>,
    path: String,
    baud: u32,
    pending: Vec<u8>,
}

impl WattsUp {
    pub fn new(path: &str, baud: u32) -> Self {
        info!("Initializing Watts Up with port {} at {} baud", path, baud);
        WattsUp {
            device: None,
            path: path.to_string(),
            baud,
            pending: Vec::new(),
        }
    }

    pub fn connect(&mut self) -> Result<()> {
        info!("Looking for {}", self.path);
        if !Path::new(&self.path).exists() {
            error!("Serial device {} does not exist", self.path);
            return Err(WattsUpError::NotFound(self.path.clone()));
        }

        let port = serialport::new(&self.path, self.baud)
            .timeout(READ_TIMEOUT)
            .open()?;
        self.device = Some(BufReader::new(port));
        self.pending.clear();

        info!("Watts Up connected on {}", self.path);
        Ok(())
    }
}

impl<T: Read + Write> WattsUp<T> {
    /// Wrap an already open transport, e.g. a pseudo terminal or a test double.
    pub fn with_transport(path: &str, transport: T) -> Self {
        WattsUp {
            device: Some(BufReader::new(transport)),
            path: path.to_string(),
            baud: DEFAULT_BAUD,
            pending: Vec::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_connected(&self) -> bool {
        self.device.is_some()
    }

    pub fn transport(&self) -> Option<&T> {
        self.device.as_ref().map(BufReader::get_ref)
    }

    /// Release the serial handle. Later calls fail with `NotConnected`.
    pub fn close(&mut self) {
        if self.device.take().is_some() {
            info!("Closed {}", self.path);
        }
    }

    pub fn write(&mut self, command: &str) -> Result<()> {
        if let Some(device) = &mut self.device {
            debug!("Sending command to Watts Up: {}", command);
            let port = device.get_mut();
            port.write_all(command.as_bytes())?;
            port.flush()?;
            Ok(())
        } else {
            error!("Attempted to write to Watts Up but device is not connected");
            Err(WattsUpError::NotConnected)
        }
    }

    /// Read one newline-terminated line, without its line ending.
    ///
    /// Returns `Ok(None)` once the stream is closed. Bytes received before a
    /// timeout are kept and completed by the next call.
    pub fn read_line(&mut self) -> Result<Option<String>> {
        let Some(device) = &mut self.device else {
            error!("Attempted to read from Watts Up but device is not connected");
            return Err(WattsUpError::NotConnected);
        };

        let n = device.read_until(b'\n', &mut self.pending)?;
        if n == 0 && self.pending.is_empty() {
            return Ok(None);
        }

        let line = String::from_utf8_lossy(&self.pending).trim().to_string();
        self.pending.clear();
        debug!("Received line from Watts Up: {}", line);
        Ok(Some(line))
    }

    /// Ask the meter for the names of its data columns.
    pub fn header(&mut self) -> Result<Vec<String>> {
        info!("Retrieving header information");
        for attempt in 1..=MAX_HEADER_ATTEMPTS {
            self.write(HEADER_REQUEST)?;
            match self.read_line() {
                Ok(Some(line)) => match Reply::parse(&line) {
                    Ok(Reply::Header(columns)) => {
                        info!("Meter reported {} columns", columns.len());
                        return Ok(columns);
                    }
                    _ => debug!("Ignoring reply while waiting for header: {}", line),
                },
                Ok(None) => return Err(WattsUpError::NotConnected),
                Err(e) if e.is_timeout() => {
                    warn!("No header reply yet (attempt {})", attempt);
                }
                Err(e) => return Err(e),
            }
        }
        Err(WattsUpError::NoHeader(MAX_HEADER_ATTEMPTS))
    }

    /// Start logging at `interval` seconds per sample.
    pub fn configure(&mut self, interval: u32, mode: LoggingMode) -> Result<()> {
        if interval == 0 {
            return Err(WattsUpError::InvalidArgument(
                "sample interval must be at least 1 second".to_string(),
            ));
        }
        info!("Setting {:?} logging every {} s", mode, interval);
        self.write(&format!("#L,W,3,{},,{};", mode.code(), interval))?;
        if mode == LoggingMode::Internal {
            self.write(&format!("#O,W,1,{}", FULL_HANDLING))?;
        }
        Ok(())
    }

    pub fn reset(&mut self) -> Result<()> {
        info!("Resetting the Watts Up");
        self.write(SOFT_RESET)
    }
}
