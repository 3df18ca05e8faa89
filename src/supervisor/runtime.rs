//! Liveness inspection and termination of recorded processes
//!
//! A pid alone is not an identity: the kernel recycles them. On Linux the
//! start time (clock ticks since boot, field 22 of `/proc/<pid>/stat`) is
//! read alongside and compared with the recorded value.

use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::{RelayError, Result};

pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_START_PROBE_WAIT: Duration = Duration::from_millis(500);

const PROBE_INTERVAL: Duration = Duration::from_millis(100);
const START_PROBE_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessStatus {
    /// Pid exists and its start time matches (or was never recorded)
    Running,
    /// Pid exists but belongs to a different process now
    Stale,
    Exited,
    /// Inspection itself failed
    Unknown,
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessStatus::Running => write!(f, "RUNNING"),
            ProcessStatus::Stale => write!(f, "STALE"),
            ProcessStatus::Exited => write!(f, "EXITED"),
            ProcessStatus::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeState {
    pub status: ProcessStatus,
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_start_ticks: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_error: Option<String>,
}

impl RuntimeState {
    fn unknown(error: impl Into<String>) -> Self {
        Self {
            status: ProcessStatus::Unknown,
            running: false,
            observed_start_ticks: None,
            check_error: Some(error.into()),
        }
    }
}

/// Classify a recorded process as RUNNING, STALE, EXITED or UNKNOWN
pub fn inspect(pid: i32, recorded_ticks: Option<u64>) -> RuntimeState {
    if pid <= 0 {
        return RuntimeState::unknown("invalid process pid");
    }
    match process_exists(pid) {
        Err(e) => RuntimeState::unknown(e.to_string()),
        Ok(false) => RuntimeState {
            status: ProcessStatus::Exited,
            running: false,
            observed_start_ticks: None,
            check_error: None,
        },
        Ok(true) => {
            let mut state = RuntimeState {
                status: ProcessStatus::Running,
                running: true,
                observed_start_ticks: None,
                check_error: None,
            };
            match read_start_time_ticks(pid) {
                Ok(Some(observed)) => {
                    state.observed_start_ticks = Some(observed);
                    if recorded_ticks.is_some_and(|recorded| recorded > 0 && recorded != observed) {
                        state.status = ProcessStatus::Stale;
                        state.running = false;
                    }
                }
                Ok(None) => {}
                Err(e) => state.check_error = Some(e.to_string()),
            }
            state
        }
    }
}

/// Signal 0 probe: EPERM still means the pid exists
#[cfg(unix)]
pub fn process_exists(pid: i32) -> Result<bool> {
    if pid <= 0 {
        return Err(RelayError::Process("invalid process pid".to_string()));
    }
    // SAFETY: signal 0 performs only the existence and permission check
    let rc = unsafe { libc::kill(pid, 0) };
    if rc == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::EPERM) => Ok(true),
        Some(libc::ESRCH) => Ok(false),
        _ => Err(RelayError::Process(format!("probe pid {}: {}", pid, err))),
    }
}

#[cfg(not(unix))]
pub fn process_exists(_pid: i32) -> Result<bool> {
    Err(RelayError::Process(
        "process inspection is not supported on this platform".to_string(),
    ))
}

/// Start time in clock ticks since boot; `None` where the platform has no `/proc`
#[cfg(target_os = "linux")]
pub fn read_start_time_ticks(pid: i32) -> Result<Option<u64>> {
    if pid <= 0 {
        return Err(RelayError::Process("invalid process pid".to_string()));
    }
    let raw = std::fs::read_to_string(format!("/proc/{}/stat", pid))?;
    parse_stat_start_ticks(&raw).map(Some)
}

#[cfg(not(target_os = "linux"))]
pub fn read_start_time_ticks(_pid: i32) -> Result<Option<u64>> {
    Ok(None)
}

/// Extract `starttime` from a `/proc/<pid>/stat` line.
///
/// The command name is parenthesised and may itself contain `)` or spaces,
/// so fields are counted from after the last `)`.
pub fn parse_stat_start_ticks(stat: &str) -> Result<u64> {
    let line = stat.trim();
    let (_, rest) = line
        .rsplit_once(')')
        .ok_or_else(|| RelayError::Process("unexpected /proc stat format".to_string()))?;
    let field = rest
        .split_whitespace()
        .nth(19)
        .ok_or_else(|| RelayError::Process("unexpected /proc stat field count".to_string()))?;
    field
        .parse()
        .map_err(|e| RelayError::Process(format!("invalid start time {:?}: {}", field, e)))
}

/// Poll briefly for a freshly spawned child's start ticks
pub fn wait_for_start_time_ticks(pid: i32, timeout: Duration) -> Option<u64> {
    if pid <= 0 {
        return None;
    }
    let deadline = Instant::now() + timeout;
    loop {
        match read_start_time_ticks(pid) {
            Ok(Some(ticks)) if ticks > 0 => return Some(ticks),
            Ok(None) => return None,
            _ => {}
        }
        if Instant::now() >= deadline {
            return None;
        }
        std::thread::sleep(START_PROBE_INTERVAL);
    }
}

/// SIGTERM, then wait for the pid to disappear
#[cfg(unix)]
pub fn terminate(pid: i32, timeout: Duration) -> Result<()> {
    if pid <= 0 {
        return Err(RelayError::Process("invalid process pid".to_string()));
    }
    let timeout = if timeout.is_zero() {
        DEFAULT_STOP_TIMEOUT
    } else {
        timeout
    };

    // SAFETY: plain signal delivery to a positive pid
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        return Err(RelayError::Process(format!("signal pid {}: {}", pid, err)));
    }

    let deadline = Instant::now() + timeout;
    loop {
        if !process_exists(pid)? {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(RelayError::Process(format!(
                "process {} did not exit within {}s",
                pid,
                timeout.as_secs()
            )));
        }
        std::thread::sleep(PROBE_INTERVAL);
    }
}

#[cfg(not(unix))]
pub fn terminate(_pid: i32, _timeout: Duration) -> Result<()> {
    Err(RelayError::Process(
        "stopping processes is not supported on this platform".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_STAT: &str = "4242 (audit listener) S 1 4242 4242 0 -1 4194560 \
        2000 0 0 0 12 3 0 0 20 0 4 0 987654 123456789 2048 18446744073709551615";

    #[test]
    fn test_parse_stat_start_ticks() {
        assert_eq!(parse_stat_start_ticks(SAMPLE_STAT).unwrap(), 987654);
    }

    #[test]
    fn test_parse_stat_handles_paren_in_name() {
        let stat = SAMPLE_STAT.replace("(audit listener)", "(weird) name)");
        assert_eq!(parse_stat_start_ticks(&stat).unwrap(), 987654);
    }

    #[test]
    fn test_parse_stat_rejects_short_lines() {
        assert!(parse_stat_start_ticks("1 (init) S 0").is_err());
        assert!(parse_stat_start_ticks("garbage").is_err());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ProcessStatus::Stale.to_string(), "STALE");
        assert_eq!(
            serde_json::to_string(&ProcessStatus::Unknown).unwrap(),
            "\"UNKNOWN\""
        );
    }

    #[test]
    fn test_invalid_pid_is_unknown() {
        let state = inspect(0, None);
        assert_eq!(state.status, ProcessStatus::Unknown);
        assert!(state.check_error.is_some());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_own_process_running_then_stale_on_tick_mismatch() {
        let pid = std::process::id() as i32;
        let ticks = wait_for_start_time_ticks(pid, DEFAULT_START_PROBE_WAIT).unwrap();

        let live = inspect(pid, Some(ticks));
        assert_eq!(live.status, ProcessStatus::Running);
        assert_eq!(live.observed_start_ticks, Some(ticks));

        let recycled = inspect(pid, Some(ticks + 1));
        assert_eq!(recycled.status, ProcessStatus::Stale);
        assert!(!recycled.running);
    }

    #[cfg(unix)]
    #[test]
    fn test_exited_child_inspects_as_exited() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id() as i32;
        child.wait().unwrap();
        assert_eq!(inspect(pid, None).status, ProcessStatus::Exited);
    }
}
