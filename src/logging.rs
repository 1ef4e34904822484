//! Logging initialization with file output support
//!
//! With a log directory, three layers are installed:
//! - console output filtered by `RUST_LOG` (default `info`)
//! - `keygate.log` with the same filter
//! - `security.log` holding only [`security_log`](crate::security_log) events
//!
//! The audit file ignores `RUST_LOG`, so raising the level elsewhere never
//! silences it.

use std::path::{Path, PathBuf};

use tracing::{Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::security_log;

const LOG_FILE: &str = "keygate.log";
const AUDIT_LOG_FILE: &str = "security.log";

/// Writer guards for the file layers. Keep alive for the program's lifetime.
pub struct LogGuards {
    _output: WorkerGuard,
    _audit: WorkerGuard,
}

/// Initialize logging with optional file output.
pub fn init_logging(log_dir: Option<PathBuf>) -> Option<LogGuards> {
    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_filter(output_filter());

    match log_dir {
        Some(dir) => {
            // Daily rotating log file
            let file_appender = tracing_appender::rolling::daily(&dir, LOG_FILE);
            let (non_blocking, output_guard) = tracing_appender::non_blocking(file_appender);

            let file_layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true)
                .with_filter(output_filter());

            let (audit_layer, audit_guard) = audit_layer(&dir);

            tracing_subscriber::registry()
                .with(console_layer)
                .with(file_layer)
                .with(audit_layer)
                .init();

            Some(LogGuards {
                _output: output_guard,
                _audit: audit_guard,
            })
        }
        None => {
            // Console-only logging
            tracing_subscriber::registry().with(console_layer).init();
            None
        }
    }
}

fn output_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Accepts security events at `INFO` and above, nothing else
fn audit_filter() -> Targets {
    Targets::new().with_target(security_log::TARGET, Level::INFO)
}

/// Daily rotating `security.log` in `dir` for security events only
fn audit_layer<S>(dir: &Path) -> (impl Layer<S> + Send + Sync + use<S>, WorkerGuard)
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let appender = tracing_appender::rolling::daily(dir, AUDIT_LOG_FILE);
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);

    let layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(false)
        .with_filter(audit_filter());

    (layer, guard)
}
