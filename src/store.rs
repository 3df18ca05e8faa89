/*!
 * Append-only event store
 *
 * Every accepted delivery ends up here as newline-delimited JSON. Records
 * are opaque: they are never parsed, deduplicated or rewritten. Appends
 * from concurrent handlers in one process are serialized by an internal
 * lock; two processes sharing one profile are not coordinated.
 */

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Serialize;
use thiserror::Error;

use crate::error::{RelayError, Result};
use crate::persist;

const STATE_TEMP_PREFIX: &str = ".auditlogs-";

/// Failed batch append, carrying how many records made it to the file
#[derive(Debug, Error)]
#[error("{source} ({written} record(s) written)")]
pub struct AppendError {
    pub written: usize,
    #[source]
    pub source: RelayError,
}

impl From<AppendError> for RelayError {
    fn from(err: AppendError) -> Self {
        err.source
    }
}

/// Split a delivery body into records.
///
/// Lines are trimmed (which also strips a trailing CR) and blank lines are
/// dropped; the survivors keep their relative order.
pub fn split_payload_records(payload: &str) -> Vec<String> {
    payload
        .trim()
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug)]
pub struct EventStore {
    events_file: PathBuf,
    lock: Mutex<()>,
}

impl EventStore {
    pub fn new(events_file: impl Into<PathBuf>) -> Self {
        Self {
            events_file: events_file.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn events_file(&self) -> &Path {
        &self.events_file
    }

    /// Split `payload` and append the surviving records
    pub fn append(&self, payload: &str) -> std::result::Result<usize, AppendError> {
        self.append_records(&split_payload_records(payload))
    }

    /// Append each record plus `\n`, then fsync once for the batch.
    ///
    /// An empty batch is a no-op. On a mid-batch failure the error reports
    /// the number of records already written.
    pub fn append_records(&self, records: &[String]) -> std::result::Result<usize, AppendError> {
        if records.is_empty() {
            return Ok(0);
        }

        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let fail = |written: usize, action: &str, err: std::io::Error| AppendError {
            written,
            source: RelayError::execution(action, err),
        };

        if let Some(parent) = self.events_file.parent().filter(|p| !p.as_os_str().is_empty()) {
            persist::ensure_private_dir(parent)
                .map_err(|e| fail(0, "create audit-log directory", e))?;
        }
        let mut file = persist::open_private_append(&self.events_file)
            .map_err(|e| fail(0, "open audit-log event file", e))?;

        let mut written = 0;
        for record in records {
            let mut line = Vec::with_capacity(record.len() + 1);
            line.extend_from_slice(record.as_bytes());
            line.push(b'\n');
            file.write_all(&line)
                .map_err(|e| fail(written, "write audit-log event", e))?;
            written += 1;
        }

        file.sync_all()
            .map_err(|e| fail(written, "sync audit-log event file", e))?;

        tracing::debug!(
            events_file = %self.events_file.display(),
            records = written,
            "appended audit-log records"
        );
        Ok(written)
    }
}

/// Atomically replace a JSON state file (listener or destination snapshot)
pub fn write_state<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    persist::write_json_atomic(path, value, STATE_TEMP_PREFIX)
}
