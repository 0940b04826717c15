use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use tracing::{error, info, warn};

use wattsup::devices::{DEFAULT_BAUD, WattsUp};
use wattsup::logging::setup_logging;
use wattsup::session::sink::{Format, save_file_name};
use wattsup::session::{self, Command, MeterConfig, NetworkTarget};

/// Get data from a Watts Up power meter.
#[derive(Parser, Debug)]
#[command(name = "wattsup", version)]
struct Options {
    /// USB serial port that the meter is connected to
    #[arg(short = 'p', long = "port")]
    port: String,

    /// Serial line speed
    #[arg(long, default_value_t = DEFAULT_BAUD)]
    baud: u32,

    /// The command to send to the meter
    #[arg(short = 'c', long = "command", value_enum, default_value_t = Command::Log)]
    command: Command,

    /// How to display the data in log mode
    #[arg(short = 'f', long = "format", value_enum, default_value_t = Format::Raw)]
    format: Format,

    /// Sample interval in seconds
    #[arg(short = 's', long = "sample-interval", default_value_t = 1,
          value_parser = clap::value_parser!(u32).range(1..))]
    interval: u32,

    /// Live full-screen display of the latest sample
    #[arg(short = 'i', long = "interactive")]
    interactive: bool,

    /// File to append samples to in log mode
    #[arg(long = "outfile", conflicts_with = "save")]
    outfile: Option<PathBuf>,

    /// Like --outfile, but the file name is set for you
    #[arg(long = "save")]
    save: bool,

    /// POST every sample to http://HOST:PORT/PATH
    #[arg(short = 'n', long = "network", num_args = 3,
          value_names = ["HOST", "PORT", "PATH"])]
    network: Option<Vec<String>>,

    /// Meter id reported in network posts
    #[arg(long = "id", default_value = "wattsup")]
    id: String,

    /// Print the data header info and exit
    #[arg(long = "header")]
    header: bool,

    /// Soft reset the meter before anything else
    #[arg(long = "reset")]
    reset: bool,

    /// Extra output messages
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

impl Options {
    fn into_config(self) -> Result<MeterConfig, String> {
        let network = match self.network.as_deref() {
            Some([host, port, path]) => Some(NetworkTarget {
                host: host.clone(),
                port: port
                    .parse()
                    .map_err(|_| format!("invalid network port {:?}", port))?,
                path: path.clone(),
            }),
            Some(other) => return Err(format!("expected HOST PORT PATH, got {:?}", other)),
            None => None,
        };

        // Sink flags only apply while the client itself reads samples
        if self.command != Command::Log {
            let mut ignored = Vec::new();
            if network.is_some() {
                ignored.push("--network");
            }
            if self.outfile.is_some() {
                ignored.push("--outfile");
            }
            if self.save {
                ignored.push("--save");
            }
            if self.interactive {
                ignored.push("--interactive");
            }
            if !ignored.is_empty() {
                return Err(format!(
                    "{} cannot be used with --command {:?}; the meter logs on its own",
                    ignored.join(", "),
                    self.command
                ));
            }
        }

        let outfile = if self.save {
            Some(save_file_name())
        } else {
            self.outfile
        };

        Ok(MeterConfig {
            port: self.port,
            baud: self.baud,
            interval: self.interval,
            command: self.command,
            format: self.format,
            interactive: self.interactive,
            outfile,
            network,
            meter_id: self.id,
        })
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let options = Options::parse();
    let header_only = options.header;
    let reset = options.reset;

    // Set up logging; the dashboard owns the terminal so logs go to file only
    let _guard = setup_logging("wattsup.log", options.verbose, !options.interactive);
    info!("Starting wattsup");

    let config = options.into_config()?;

    // Connect to the meter
    let mut meter = WattsUp::new(&config.port, config.baud);
    if let Err(e) = meter.connect() {
        error!("Failed to connect to the meter: {}", e);
        return Err(Box::new(e));
    }

    if reset {
        meter.reset()?;
    }

    if header_only {
        let columns = meter.header()?;
        println!("Headings: {}", columns.join(", "));
        return Ok(());
    }

    meter.configure(config.interval, config.command.logging_mode())?;
    if config.command != Command::Log {
        info!("Meter set to {:?} mode, nothing to read here", config.command);
        meter.close();
        return Ok(());
    }

    // Ctrl-C ends the run between reads instead of killing the process
    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = Arc::clone(&stop);
    if let Err(e) = ctrlc::set_handler(move || handler_stop.store(true, Ordering::SeqCst)) {
        warn!("Could not install the interrupt handler: {}", e);
    }

    let mut sinks = session::build_sinks(&config)?;
    let result = session::run_logging(&mut meter, &mut sinks, &stop);

    // Restore the terminal and close files before reporting
    drop(sinks);
    meter.close();

    match result {
        Ok(summary) => {
            if summary.skipped > 0 {
                warn!("{} malformed records were skipped", summary.skipped);
            }
            info!("Application shutting down");
            Ok(())
        }
        Err(e) => {
            error!("Lost the meter: {}", e);
            Err(Box::new(e))
        }
    }
}
