//! Driver-facing entry point: configure a run, start it, stop it and query
//! what it found.

pub mod config;
pub mod controller;
pub mod logging;
pub mod session;

pub use config::{ConfigError, CrawlConfig};
pub use controller::{CrawlController, CrawlHandle};
pub use logging::init_tracing;
pub use session::{CrawlSession, SessionReport};
