//! Background re-exec of the listener
//!
//! The parent rewrites its own argv (no detach flag, per-pid log file),
//! spawns the copy with null stdio, then records the child's identity so
//! `ps` can find it later. The child removes that record itself on a clean
//! exit; see [`cleanup_own_record`].

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use chrono::Utc;

use super::registry::{
    self, ProcessRecord, ProcessRegistry, PID_PLACEHOLDER, PROCESS_KIND_LISTEN,
    PROCESS_RECORD_ENV,
};
use super::runtime::{wait_for_start_time_ticks, DEFAULT_START_PROBE_WAIT};
use crate::error::{RelayError, Result};
use crate::paths;
use crate::persist;

const LOG_FILE_FLAG: &str = "--log-file";
const DETACH_LONG: &str = "--detach";
const DETACH_SHORT: &str = "-d";
const CHILD_LOG_FILE_NAME: &str = "kongctl-listener-%PID%.log";

/// Where the detached child ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachedLaunch {
    pub pid: i32,
    pub log_file: PathBuf,
    pub record_file: PathBuf,
}

pub fn is_bool_literal(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "0" | "t" | "f" | "true" | "false"
    )
}

/// Child argv from the parent's (program name excluded).
///
/// Drops the detach flag in every spelling along with a trailing bool literal,
/// drops any log-file flag and its value, then appends the per-pid log template.
pub fn build_detached_child_args(parent_args: &[String], log_template: &Path) -> Vec<String> {
    let mut args = Vec::with_capacity(parent_args.len() + 2);
    let mut iter = parent_args.iter().peekable();
    while let Some(arg) = iter.next() {
        if arg == DETACH_LONG || arg == DETACH_SHORT {
            if iter.peek().is_some_and(|next| is_bool_literal(next)) {
                iter.next();
            }
            continue;
        }
        if arg.starts_with(&format!("{}=", DETACH_LONG))
            || arg.starts_with(&format!("{}=", DETACH_SHORT))
        {
            continue;
        }
        if arg == LOG_FILE_FLAG {
            iter.next();
            continue;
        }
        if arg.starts_with(&format!("{}=", LOG_FILE_FLAG)) {
            continue;
        }
        args.push(arg.clone());
    }
    args.push(LOG_FILE_FLAG.to_string());
    args.push(log_template.display().to_string());
    args
}

/// `<dir of configured log file or <config>/kongctl/logs>/kongctl-listener-%PID%.log`
pub fn resolve_child_log_template(configured_log_file: Option<&Path>) -> Result<PathBuf> {
    let log_dir = match configured_log_file.and_then(Path::parent) {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        Some(_) => PathBuf::from("."),
        None => paths::app_config_dir()?.join("logs"),
    };
    persist::ensure_private_dir(&log_dir)
        .map_err(|e| RelayError::execution("failed to resolve detached listener log file", e))?;
    Ok(log_dir.join(CHILD_LOG_FILE_NAME))
}

fn expand_pid(template: &Path, pid: i32) -> PathBuf {
    PathBuf::from(
        template
            .to_string_lossy()
            .replace(PID_PLACEHOLDER, &pid.to_string()),
    )
}

/// Re-exec the current binary in the background and record it.
///
/// If the record cannot be written the child is killed, so there is never an
/// untracked listener holding a remote destination.
pub fn launch_detached(
    parent_args: &[String],
    configured_log_file: Option<&Path>,
    profile: &str,
    registry: &ProcessRegistry,
) -> Result<DetachedLaunch> {
    let log_template = resolve_child_log_template(configured_log_file)?;
    let record_template = registry
        .path_template()
        .map_err(|e| RelayError::execution("failed to resolve detached process record path", e))?;
    let child_args = build_detached_child_args(parent_args, &log_template);
    let exe = std::env::current_exe().map_err(|e| {
        RelayError::execution("failed to determine executable path for detached listener", e)
    })?;

    tracing::debug!(
        executable = %exe.display(),
        child_log_file_template = %log_template.display(),
        process_record_template = %record_template.display(),
        "launching detached audit-log listener process"
    );

    let mut command = Command::new(&exe);
    command
        .args(&child_args)
        .env(PROCESS_RECORD_ENV, &record_template)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // Own process group, so a terminal Ctrl+C does not reach the child
        command.process_group(0);
    }
    let mut child = command
        .spawn()
        .map_err(|e| RelayError::execution("failed to start detached listener process", e))?;

    let pid = child.id() as i32;
    let log_file = expand_pid(&log_template, pid);
    let record_file = expand_pid(&record_template, pid);
    let start_time_ticks = wait_for_start_time_ticks(pid, DEFAULT_START_PROBE_WAIT);

    let record = ProcessRecord {
        pid,
        kind: PROCESS_KIND_LISTEN.to_string(),
        profile: profile.to_string(),
        created_at: Utc::now(),
        log_file: log_file.display().to_string(),
        args: child_args,
        start_time_ticks,
    };
    if let Err(e) = registry::write_record(&record_file, record) {
        if let Err(kill_err) = child.kill() {
            tracing::debug!(child_pid = pid, error = %kill_err, "failed to kill detached child");
        }
        return Err(RelayError::execution("failed to write detached process record", e));
    }

    tracing::info!(
        child_pid = pid,
        child_log_file = %log_file.display(),
        process_record_file = %record_file.display(),
        "launched detached audit-log listener process"
    );
    Ok(DetachedLaunch {
        pid,
        log_file,
        record_file,
    })
}

/// Run by a detached child on exit: drop its own record when `remove`,
/// keep it for diagnosis otherwise. Does nothing outside a detached child.
pub fn cleanup_own_record(remove: bool) {
    let Some(record_path) = registry::resolve_path_from_env(std::process::id() as i32) else {
        return;
    };
    if !remove {
        tracing::debug!(record_file = %record_path.display(), "keeping detached process record due to command error");
        return;
    }
    match registry::remove_record(&record_path) {
        Ok(()) => tracing::debug!(record_file = %record_path.display(), "removed detached process record"),
        Err(e) => tracing::debug!(
            record_file = %record_path.display(),
            error = %e,
            "failed to remove detached process record"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_child_args_drop_detach_and_log_file() {
        let template = Path::new("/logs/kongctl-listener-%PID%.log");
        let child = build_detached_child_args(
            &args(&[
                "listen",
                "--detach",
                "true",
                "--public-url",
                "https://example.ngrok.app",
                "--log-file",
                "/tmp/old.log",
                "-d=false",
                "--log-file=/tmp/other.log",
            ]),
            template,
        );
        assert_eq!(
            child,
            args(&[
                "listen",
                "--public-url",
                "https://example.ngrok.app",
                "--log-file",
                "/logs/kongctl-listener-%PID%.log",
            ])
        );
    }

    #[test]
    fn test_child_args_keep_non_bool_after_detach() {
        let child = build_detached_child_args(
            &args(&["listen", "-d", "--public-url", "https://x"]),
            Path::new("x.log"),
        );
        assert_eq!(child, args(&["listen", "--public-url", "https://x", "--log-file", "x.log"]));
    }

    #[test]
    fn test_bool_literals() {
        for literal in ["1", "0", "t", "F", "TRUE", " false "] {
            assert!(is_bool_literal(literal), "{}", literal);
        }
        assert!(!is_bool_literal("yes"));
        assert!(!is_bool_literal("--tail"));
    }

    #[test]
    fn test_log_template_next_to_configured_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let configured = dir.path().join("nested").join("cli.log");
        let template = resolve_child_log_template(Some(&configured)).unwrap();
        assert_eq!(template, dir.path().join("nested").join(CHILD_LOG_FILE_NAME));
        assert!(dir.path().join("nested").is_dir());
        assert_eq!(
            expand_pid(&template, 77),
            dir.path().join("nested").join("kongctl-listener-77.log")
        );
    }
}
