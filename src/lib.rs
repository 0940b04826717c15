//! Read power samples from a Watts Up? meter and route them to sinks, or
//! collect the samples such a meter pushes over HTTP.

pub mod collector;
pub mod devices;
pub mod logging;
pub mod push;
pub mod session;
