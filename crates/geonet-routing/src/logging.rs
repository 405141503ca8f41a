//! Logging setup with a runtime-adjustable level

use crate::error::{Result, RoutingError};
use std::sync::OnceLock;
use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

static FILTER_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

fn filter_for(level: Level) -> EnvFilter {
    EnvFilter::default().add_directive(LevelFilter::from_level(level).into())
}

/// Install a global fmt subscriber logging at `level`
///
/// Fails if a global subscriber is already installed.
pub fn init(level: Level) -> Result<()> {
    let (filter, handle) = reload::Layer::new(filter_for(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init()
        .map_err(|e| RoutingError::Logging(e.to_string()))?;

    FILTER_HANDLE
        .set(handle)
        .map_err(|_| RoutingError::Logging("Logging already initialised".to_string()))
}

/// Change the log level of the subscriber installed by [`init`]
pub fn set_level(level: Level) -> Result<()> {
    let handle = FILTER_HANDLE
        .get()
        .ok_or_else(|| RoutingError::Logging("Logging not initialised".to_string()))?;

    handle
        .modify(|filter| *filter = filter_for(level))
        .map_err(|e| RoutingError::Logging(e.to_string()))
}
