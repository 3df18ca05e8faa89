/*!
 * Logging and tracing initialization
 */

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::LogLevel;
use crate::error::{RelayError, Result};
use crate::supervisor::registry::PID_PLACEHOLDER;

/// Initialize structured logging.
///
/// `RUST_LOG` wins over `level`. A log file (always set for detached
/// children) gets JSON lines; otherwise a compact layer writes to stderr
/// so stdout stays free for tailed records.
pub fn init_logging(level: LogLevel, log_file: Option<&Path>) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            EnvFilter::try_new(format!("audit_listener={}", level.to_tracing_level()))
        })
        .map_err(|e| RelayError::config(format!("failed to create log filter: {}", e)))?;

    match log_file {
        Some(path) => init_file_logging(&resolve_log_path(path, std::process::id()), env_filter),
        None => {
            init_stderr_logging(env_filter);
            Ok(())
        }
    }
}

/// Substitute `%PID%` in a log-file template
pub fn resolve_log_path(template: &Path, pid: u32) -> PathBuf {
    let raw = template.to_string_lossy();
    if raw.contains(PID_PLACEHOLDER) {
        PathBuf::from(raw.replace(PID_PLACEHOLDER, &pid.to_string()))
    } else {
        template.to_path_buf()
    }
}

fn init_stderr_logging(env_filter: EnvFilter) {
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_span_events(FmtSpan::NONE)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn init_file_logging(log_path: &Path, env_filter: EnvFilter) -> Result<()> {
    if let Some(parent) = log_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        crate::persist::ensure_private_dir(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .map_err(|e| RelayError::config(format!("failed to open log file: {}", e)))?;

    let fmt_layer = fmt::layer()
        .with_writer(file)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(false)
        .json();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    Ok(())
}

/// Initialize logging for tests; safe to call repeatedly
#[cfg(test)]
pub fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("audit_listener=debug"));

        let fmt_layer = fmt::layer().with_test_writer().with_target(false).compact();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .ok();
    });
}
