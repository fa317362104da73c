//! Sets up tracing for the nightshift operator

use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::conf::Tracing;

/// Setup our tracing subscriber
///
/// The RUST_LOG env var wins over the configured level when it is set.
///
/// # Arguments
///
/// * `conf` - The tracing settings to apply
pub fn setup(conf: &Tracing) {
    // honor RUST_LOG when set and fall back to the configured level
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(conf.level.as_str()));
    // log structured events to stdout
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
