//! Logging setup.
//!
//! Everything in the crate logs through `tracing` and pulls the macros in
//! via [`prelude`]. Binaries call [`init`] once at startup.

use std::io::IsTerminal;

use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::fmt::time::LocalTime;
use tracing_subscriber::prelude::*;

pub mod prelude {
    pub use tracing::{debug, error, info, trace, warn};
}

use prelude::*;

/// How chatty the process should be when `RUST_LOG` is unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Verbose,
    Debug,
}

impl Verbosity {
    pub fn from_flags(debug: bool, verbose: bool) -> Self {
        if debug {
            Verbosity::Debug
        } else if verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Quiet
        }
    }

    fn level(self) -> LevelFilter {
        match self {
            Verbosity::Quiet => LevelFilter::WARN,
            Verbosity::Verbose => LevelFilter::INFO,
            Verbosity::Debug => LevelFilter::DEBUG,
        }
    }
}

/// Install the global subscriber.
///
/// Under a service manager the journal is preferred; a terminal session
/// gets human-readable lines with local timestamps. Calling this twice is
/// harmless, the second subscriber is simply not installed.
pub fn init(verbosity: Verbosity) {
    let filter = EnvFilter::builder()
        .with_default_directive(verbosity.level().into())
        .from_env_lossy();

    if running_as_service() {
        match tracing_journald::layer() {
            Ok(journald) => {
                let _ = tracing_subscriber::registry()
                    .with(filter)
                    .with(journald)
                    .try_init();
                return;
            }
            Err(e) => {
                eprintln!("journald unavailable, logging to stderr: {e}");
            }
        }
    }

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_timer(LocalTime::rfc_3339())
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .try_init();

    trace!("Logging initialized");
}

/// Heuristics for "started by a service manager rather than a user".
fn running_as_service() -> bool {
    if std::env::var_os("INVOCATION_ID").is_some() || std::env::var_os("JOURNAL_STREAM").is_some()
    {
        return true;
    }

    if !std::io::stdin().is_terminal() {
        return true;
    }

    nix::unistd::getppid().as_raw() == 1
}
