use clap::Parser;
use tracing::{error, info};

use wattsup::collector::{Collector, DEFAULT_PORT};
use wattsup::logging::setup_logging;

/// Print samples pushed by a Watts Up meter as JSON lines.
#[derive(Parser, Debug)]
#[command(name = "wattsup-collector", version)]
struct Options {
    /// TCP port to listen on
    #[arg(short = 'p', long = "port", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Extra output messages
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let options = Options::parse();
    let _guard = setup_logging("collector.log", options.verbose, true);

    let collector = match Collector::bind(options.port) {
        Ok(collector) => collector,
        Err(e) => {
            error!("{}", e);
            return Err(Box::new(e));
        }
    };
    info!("Waiting for samples on port {}", options.port);

    let stdout = std::io::stdout();
    collector.serve(&mut stdout.lock());
    Ok(())
}
