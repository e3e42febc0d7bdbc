//! Tracing setup for the binary

use std::time::Instant;
use tracing::debug;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Keeps logging alive for the process lifetime; logs shutdown on drop
pub struct LogGuard {
    started: Instant,
}

impl Drop for LogGuard {
    fn drop(&mut self) {
        debug!("Shutting down after {:.1?}", self.started.elapsed());
    }
}

/// `RUST_LOG` wins; otherwise `-v` picks debug and `-vv` trace
pub fn init(verbose: u8) -> LogGuard {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    LogGuard { started: Instant::now() }
}
