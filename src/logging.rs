//! Tracing setup: console plus a non-blocking log file.
//!
//! Logging starts before the config is read, so the level filter sits
//! behind a reload layer and is switched once the `debug` flag is known.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Registry, fmt, layer::SubscriberExt, reload, util::SubscriberInitExt,
};

use crate::error::Error;

/// Log file written in the working directory.
pub const LOG_FILE: &str = "sms_forwarder.log";

type FilterHandle = reload::Handle<EnvFilter, Registry>;

/// Default filter; `RUST_LOG` takes precedence.
fn default_filter(debug: bool) -> &'static str {
    if debug { "debug" } else { "info" }
}

/// Keeps the file writer alive and allows changing the level later.
pub struct Logging {
    _guard: WorkerGuard,
    filter: FilterHandle,
}

impl Logging {
    /// Apply the config's `debug` flag unless `RUST_LOG` was given.
    pub fn set_debug(&self, debug: bool) -> Result<(), Error> {
        if std::env::var_os("RUST_LOG").is_some() {
            return Ok(());
        }
        reload_level(&self.filter, debug)
    }
}

fn reload_level(handle: &FilterHandle, debug: bool) -> Result<(), Error> {
    handle
        .reload(EnvFilter::new(default_filter(debug)))
        .map_err(|e| Error::Logging(e.to_string()))
}

/// Install the global subscriber at `info` (or `RUST_LOG`).
///
/// Console output goes to stderr because stdout carries the modem bridge.
/// Keep the returned value alive or buffered file output is lost.
pub fn init_logging(log_dir: &Path) -> Result<Logging, Error> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(false)));
    let (filter_layer, filter_handle) = reload::Layer::new(filter);

    let file_appender = tracing_appender::rolling::never(log_dir, LOG_FILE);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))?;

    Ok(Logging {
        _guard: guard,
        filter: filter_handle,
    })
}

#[cfg(test)]
mod tests {
    use tracing::Level;

    use super::*;

    #[test]
    fn debug_flag_selects_filter() {
        assert_eq!(default_filter(true), "debug");
        assert_eq!(default_filter(false), "info");
    }

    #[test]
    fn reload_switches_debug_on_and_off() {
        let (layer, handle) = reload::Layer::new(EnvFilter::new(default_filter(false)));
        let subscriber = tracing_subscriber::registry().with(layer);
        let _default = tracing::subscriber::set_default(subscriber);

        assert!(tracing::enabled!(Level::INFO));
        assert!(!tracing::enabled!(Level::DEBUG));

        reload_level(&handle, true).unwrap();
        assert!(tracing::enabled!(Level::DEBUG));

        reload_level(&handle, false).unwrap();
        assert!(!tracing::enabled!(Level::DEBUG));
    }
}
