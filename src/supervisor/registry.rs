/*!
 * Process records for detached listeners
 *
 * One JSON file per supervised process under `<config>/kongctl/processes`.
 * Files are created atomically and removed without any cross-process lock;
 * removal is idempotent.
 */

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::redact::redact_args;
use crate::error::{RelayError, Result};
use crate::paths;
use crate::persist;

/// Environment variable carrying the record path template to a detached child
pub const PROCESS_RECORD_ENV: &str = "KONGCTL_PROCESS_RECORD_FILE";

/// Replaced by the process id in path templates
pub const PID_PLACEHOLDER: &str = "%PID%";

pub const PROCESS_KIND_LISTEN: &str = "konnect.audit-logs.listen";

const PROCESSES_DIR: &str = "processes";
const RECORD_EXTENSION: &str = "json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub pid: i32,
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub profile: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub log_file: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time_ticks: Option<u64>,
}

/// A record together with the file it was read from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredRecord {
    #[serde(flatten)]
    pub record: ProcessRecord,
    pub file: PathBuf,
}

/// Directory of process records
#[derive(Debug, Clone)]
pub struct ProcessRegistry {
    dir: PathBuf,
}

impl ProcessRegistry {
    /// The registry under the user's config directory
    pub fn resolve() -> Result<Self> {
        Ok(Self::under(paths::app_config_dir()?.join(PROCESSES_DIR)))
    }

    pub fn under(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<dir>/%PID%.json`, creating the directory
    pub fn path_template(&self) -> Result<PathBuf> {
        persist::ensure_private_dir(&self.dir).map_err(|e| {
            RelayError::execution("create detached process directory", e)
        })?;
        Ok(self
            .dir
            .join(format!("{}.{}", PID_PLACEHOLDER, RECORD_EXTENSION)))
    }

    pub fn path_for_pid(&self, pid: i32) -> PathBuf {
        self.dir.join(format!("{}.{}", pid, RECORD_EXTENSION))
    }

    /// Every readable record, newest first then by pid
    pub fn list(&self) -> Result<Vec<StoredRecord>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(RelayError::execution("read detached process directory", e)),
        };

        let mut records = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() || path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            match read_record(&path) {
                Ok(record) => records.push(StoredRecord { record, file: path }),
                Err(e) => {
                    tracing::debug!(file = %path.display(), error = %e, "skipping unreadable process record");
                }
            }
        }

        records.sort_by(|a, b| {
            b.record
                .created_at
                .cmp(&a.record.created_at)
                .then_with(|| a.record.pid.cmp(&b.record.pid))
        });
        Ok(records)
    }
}

/// Expand `%PID%` in a record path template
pub fn resolve_path_from_template(template: &str, pid: i32) -> Option<PathBuf> {
    let template = template.trim();
    if template.is_empty() {
        return None;
    }
    Some(PathBuf::from(template.replace(PID_PLACEHOLDER, &pid.to_string())))
}

/// The record path this process inherited from its launcher, if any
pub fn resolve_path_from_env(pid: i32) -> Option<PathBuf> {
    let template = std::env::var(PROCESS_RECORD_ENV).ok()?;
    resolve_path_from_template(&template, pid)
}

/// Persist `record` atomically at `path`, trimming fields and redacting args
pub fn write_record(path: &Path, mut record: ProcessRecord) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(RelayError::config("process record path is required"));
    }
    if record.pid <= 0 {
        return Err(RelayError::config("process PID must be greater than zero"));
    }
    record.kind = record.kind.trim().to_string();
    record.profile = record.profile.trim().to_string();
    record.log_file = record.log_file.trim().to_string();
    record.args = redact_args(&record.args);

    persist::write_json_atomic(path, &record, ".process-")
}

pub fn read_record(path: &Path) -> Result<ProcessRecord> {
    let raw = fs::read(path)?;
    let record: ProcessRecord = serde_json::from_slice(&raw)?;
    if record.pid <= 0 {
        return Err(RelayError::Process("invalid process record PID".to_string()));
    }
    Ok(record)
}

/// Remove a record file; a missing file is not an error
pub fn remove_record(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Ok(());
    }
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
