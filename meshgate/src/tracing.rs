//! Logging setup for the gateway daemon and CLI.
//!
//! Binaries call one of the init_* functions once at startup to install a
//! subscriber. Library code only emits events; it goes through
//! `use crate::tracing::prelude::*` for the `trace!()` .. `error!()` macros.

use std::env;
use time::OffsetDateTime;
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt::{format::Writer, time::FormatTime},
    prelude::*,
};

pub mod prelude {
    #[allow(unused_imports)]
    pub use tracing::{debug, error, info, trace, warn};
}

use prelude::*;

/// Initialize logging for the daemon.
///
/// Under systemd (JOURNAL_STREAM set) events go to journald, otherwise to
/// stdout.
pub fn init_journald_or_stdout() {
    if env::var("JOURNAL_STREAM").is_ok() {
        if let Ok(layer) = tracing_journald::layer() {
            tracing_subscriber::registry()
                .with(env_filter(LevelFilter::INFO))
                .with(layer)
                .init();
        } else {
            use_stdout(LevelFilter::INFO);
            error!("Failed to initialize journald logging, using stdout.");
        }
    } else {
        use_stdout(LevelFilter::INFO);
    }
}

/// Initialize quieter stdout logging for interactive tools.
pub fn init_cli() {
    use_stdout(LevelFilter::WARN);
}

// RUST_LOG wins when set; otherwise `default` applies to everything.
fn env_filter(default: LevelFilter) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(default.into())
        .with_env_var("RUST_LOG")
        .from_env_lossy()
}

fn use_stdout(default: LevelFilter) {
    tracing_subscriber::registry()
        .with(env_filter(default))
        .with(tracing_subscriber::fmt::layer().with_timer(LocalTimer))
        .init();
}

// Local wall-clock time to the second. The default UTC timestamps are long and
// hard to line up with radio-side logs.
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = OffsetDateTime::now_local().unwrap_or(OffsetDateTime::now_utc());
        let formatted = now
            .format(time::macros::format_description!("[hour]:[minute]:[second]"))
            .map_err(|_| std::fmt::Error)?;
        write!(w, "{formatted}")
    }
}
