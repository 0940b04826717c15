mod wattsup;

#[cfg(test)]
pub mod fake;

pub use wattsup::{DEFAULT_BAUD, LoggingMode, Result, WattsUp, WattsUpError};
