//! Structured logging, in the same shape as `flux::logging`: a root `slog`
//! `Logger` built from a `sloggers` config, handed down to every subsystem
//! that owns a thread (conductor, heartbeat, heartmonitor, server loop).

pub use slog::{self, debug, error, info, o, trace, warn, Logger};

use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;

/// Build the default terminal logger used when the caller doesn't supply
/// their own. Mirrors `flux::logging::init`, minus the embedded TOML
/// round-trip the original used purely to demonstrate config loading.
pub fn default_logger() -> Logger {
    let mut builder = TerminalLoggerBuilder::new();
    builder.level(Severity::Debug);
    builder.destination(Destination::Stderr);

    builder
        .build()
        .unwrap_or_else(|_| Logger::root(slog::Discard, o!()))
}

/// A logger that discards everything, for tests and embeddings that don't
/// want console noise.
pub fn discard() -> Logger {
    Logger::root(slog::Discard, o!())
}
