//! `ps`: list and stop detached listeners

use std::io::{self, Write};
use std::time::Duration;

use comfy_table::{Cell, Table};
use serde::Serialize;

use crate::error::{RelayError, Result};
use crate::output::{create_table, header_cell, print_json, status_cell, terminal_value};
use crate::supervisor::registry::remove_record;
use crate::supervisor::{inspect, terminate, ProcessRegistry, ProcessStatus, RuntimeState, StoredRecord};

/// A record with its current liveness
#[derive(Debug, Clone, Serialize)]
pub struct ProcessRow {
    #[serde(flatten)]
    pub stored: StoredRecord,
    #[serde(flatten)]
    pub runtime: RuntimeState,
}

/// What `stop` did with one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Signalled, exited, record removed
    Terminated,
    /// Already gone or pid recycled; record removed without signalling
    Pruned(ProcessStatus),
}

pub fn inspect_all(registry: &ProcessRegistry) -> Result<Vec<ProcessRow>> {
    Ok(registry
        .list()?
        .into_iter()
        .map(|stored| {
            let runtime = inspect(stored.record.pid, stored.record.start_time_ticks);
            ProcessRow { stored, runtime }
        })
        .collect())
}

pub fn list(registry: &ProcessRegistry, json: bool) -> Result<()> {
    let rows = inspect_all(registry)?;
    let mut out = io::stdout();
    if json {
        return print_json(&mut out, &rows);
    }
    if rows.is_empty() {
        writeln!(out, "No detached processes found.")?;
        return Ok(());
    }
    writeln!(out, "{}", process_table(&rows))?;
    Ok(())
}

pub fn process_table(rows: &[ProcessRow]) -> Table {
    let mut table = create_table();
    table.set_header(
        ["STATUS", "PID", "KIND", "PROFILE", "CREATED", "LOG FILE", "CHECK ERROR"]
            .into_iter()
            .map(header_cell)
            .collect::<Vec<_>>(),
    );
    for row in rows {
        let record = &row.stored.record;
        table.add_row(vec![
            status_cell(row.runtime.status),
            Cell::new(record.pid),
            Cell::new(terminal_value(&record.kind)),
            Cell::new(terminal_value(&record.profile)),
            Cell::new(record.created_at.format("%Y-%m-%d %H:%M:%S UTC").to_string()),
            Cell::new(terminal_value(&record.log_file)),
            Cell::new(terminal_value(row.runtime.check_error.as_deref().unwrap_or_default())),
        ]);
    }
    table
}

/// Stop one record.
///
/// RUNNING is terminated then removed. EXITED and STALE are pruned; a STALE
/// pid belongs to someone else and is never signalled. UNKNOWN is an error
/// and the record stays.
pub fn stop_record(stored: &StoredRecord, timeout: Duration) -> Result<StopOutcome> {
    let pid = stored.record.pid;
    let state = inspect(pid, stored.record.start_time_ticks);
    let outcome = match state.status {
        ProcessStatus::Running => {
            terminate(pid, timeout)?;
            StopOutcome::Terminated
        }
        ProcessStatus::Exited | ProcessStatus::Stale => StopOutcome::Pruned(state.status),
        ProcessStatus::Unknown => {
            return Err(RelayError::Process(format!(
                "cannot determine state of process {}: {}",
                pid,
                state.check_error.as_deref().unwrap_or("unknown error")
            )))
        }
    };
    remove_record(&stored.file)?;
    tracing::debug!(pid, outcome = ?outcome, record_file = %stored.file.display(), "stopped detached process");
    Ok(outcome)
}

pub fn stop(registry: &ProcessRegistry, pid: Option<i32>, all: bool, timeout: Duration) -> Result<()> {
    let records = registry.list()?;
    let targets: Vec<&StoredRecord> = match (pid, all) {
        (Some(_), true) => return Err(RelayError::config("use either a PID or --all, not both")),
        (None, false) => return Err(RelayError::config("provide a PID or --all")),
        (Some(pid), false) => {
            let found: Vec<&StoredRecord> = records.iter().filter(|s| s.record.pid == pid).collect();
            if found.is_empty() {
                return Err(RelayError::config(format!(
                    "no detached process record found for pid {}",
                    pid
                )));
            }
            found
        }
        (None, true) => records.iter().collect(),
    };

    let mut out = io::stdout();
    let mut failures = Vec::new();
    for stored in targets {
        match stop_record(stored, timeout) {
            Ok(outcome) => writeln!(out, "{}", describe_outcome(stored.record.pid, outcome))?,
            Err(e) => failures.push(RelayError::execution(
                format!("failed to stop process {}", stored.record.pid),
                e,
            )),
        }
    }
    match failures.len() {
        0 => Ok(()),
        1 => Err(failures.remove(0)),
        _ => Err(RelayError::Joined(failures)),
    }
}

pub fn describe_outcome(pid: i32, outcome: StopOutcome) -> String {
    match outcome {
        StopOutcome::Terminated => format!("Stopped process {}.", pid),
        StopOutcome::Pruned(ProcessStatus::Stale) => {
            format!("Removed stale record for process {} (pid reused; not signalled).", pid)
        }
        StopOutcome::Pruned(_) => format!("Removed record for exited process {}.", pid),
    }
}
