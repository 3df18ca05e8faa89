/*!
 * Profile-scoped filesystem locations
 */

use std::env;
use std::path::{Path, PathBuf};

use crate::error::{RelayError, Result};

const APP_DIR: &str = "kongctl";
const AUDIT_LOGS_DIR: &str = "audit-logs";
const EVENTS_FILE: &str = "events.jsonl";
const LISTENER_STATE_FILE: &str = "listener.json";
const DESTINATION_STATE_FILE: &str = "destination.json";

/// Where one profile keeps its events and state snapshots
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditPaths {
    pub base_dir: PathBuf,
    pub events_file: PathBuf,
    pub listener_state_file: PathBuf,
    pub destination_state_file: PathBuf,
}

impl AuditPaths {
    /// Paths for `profile` under an explicit application directory
    pub fn under(app_dir: &Path, profile: &str) -> Self {
        let base_dir = app_dir
            .join(AUDIT_LOGS_DIR)
            .join(sanitize_path_component(profile));
        Self {
            events_file: base_dir.join(EVENTS_FILE),
            listener_state_file: base_dir.join(LISTENER_STATE_FILE),
            destination_state_file: base_dir.join(DESTINATION_STATE_FILE),
            base_dir,
        }
    }
}

/// Resolve paths for `profile` under the user's config directory
pub fn resolve(profile: &str) -> Result<AuditPaths> {
    Ok(AuditPaths::under(&app_config_dir()?, profile))
}

/// `$XDG_CONFIG_HOME/kongctl`, falling back to `~/.config/kongctl`
pub fn app_config_dir() -> Result<PathBuf> {
    if let Some(xdg) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(xdg).join(APP_DIR));
    }
    dirs::home_dir()
        .map(|home| home.join(".config").join(APP_DIR))
        .ok_or_else(|| RelayError::config("unable to resolve home directory for config files"))
}

/// Keep letters, digits and `-_.`; map everything else to `_`.
/// An empty result becomes `default`.
pub fn sanitize_path_component(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return "default".to_string();
    }
    let sanitized: String = trimmed
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    // "." and ".." would escape the audit-logs directory
    if sanitized.chars().all(|c| c == '.') {
        return "default".to_string();
    }
    sanitized
}
