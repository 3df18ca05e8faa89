/*!
 * Error types for the audit-log listener
 *
 * Two broad families surface to the operator:
 * - configuration errors, raised before any local or remote side effect
 * - execution errors, raised once an operation has started and failed
 *
 * The receiver keeps its own HTTP-facing error type (see `receiver::handler`);
 * everything else flows through `RelayError`.
 */

use std::fmt;
use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelayError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_PARTIAL: i32 = 1;
pub const EXIT_FATAL: i32 = 2;

#[derive(Debug, Error)]
pub enum RelayError {
    /// Invalid caller input, detected before side effects
    #[error("configuration error: {0}")]
    Config(String),

    /// An operation failed after its preconditions passed
    #[error("{action}: {source}")]
    Execution {
        action: String,
        #[source]
        source: Box<RelayError>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to parse config file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Transport-level failure talking to the control plane
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The control plane answered with a non-success status
    #[error("{}", format_status(*status, body))]
    RemoteStatus { status: u16, body: String },

    /// A remote precondition does not hold (e.g. webhook already in use)
    #[error("{0}")]
    Precondition(String),

    /// The control plane answered successfully but without what we need
    #[error("unexpected control plane response: {0}")]
    Protocol(String),

    /// Destination exists remotely but the webhook could not be bound to it
    #[error("audit-log destination {destination_id} was created but webhook binding failed: {source}")]
    WebhookBind {
        destination_id: String,
        #[source]
        source: Box<RelayError>,
    },

    /// Listener exit error and teardown error, reported together
    #[error("listener terminated and destination cleanup failed: {listener}; cleanup error: {cleanup}")]
    ListenerAndCleanup {
        listener: Box<RelayError>,
        cleanup: Box<RelayError>,
    },

    /// Several independent failures collected from one best-effort step
    #[error("{}", join_messages(.0))]
    Joined(Vec<RelayError>),

    /// Process supervision failure (spawn, signal, liveness)
    #[error("process error: {0}")]
    Process(String),

    /// A deadline or cancellation cut an operation short
    #[error("{0}")]
    Cancelled(String),
}

impl RelayError {
    /// Wrap an error with a description of the action that failed
    pub fn execution(action: impl Into<String>, source: impl Into<RelayError>) -> Self {
        RelayError::Execution {
            action: action.into(),
            source: Box::new(source.into()),
        }
    }

    /// Shorthand for a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        RelayError::Config(message.into())
    }

    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            RelayError::Config(_) | RelayError::ConfigParse(_) => EXIT_FATAL,
            RelayError::Execution { source, .. } if source.is_config() => EXIT_FATAL,
            _ => EXIT_PARTIAL,
        }
    }

    fn is_config(&self) -> bool {
        match self {
            RelayError::Config(_) | RelayError::ConfigParse(_) => true,
            RelayError::Execution { source, .. } => source.is_config(),
            _ => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> ErrorCategory {
        match self {
            RelayError::Config(_) | RelayError::ConfigParse(_) => ErrorCategory::Configuration,
            RelayError::Execution { source, .. } => source.category(),
            RelayError::Io(_) => ErrorCategory::IoError,
            RelayError::Serialization(_) => ErrorCategory::Codec,
            RelayError::Http(_) => ErrorCategory::Network,
            RelayError::RemoteStatus { .. } | RelayError::Protocol(_) => ErrorCategory::Remote,
            RelayError::Precondition(_) => ErrorCategory::Precondition,
            RelayError::WebhookBind { .. } | RelayError::ListenerAndCleanup { .. } => {
                ErrorCategory::Partial
            }
            RelayError::Joined(_) => ErrorCategory::Partial,
            RelayError::Process(_) => ErrorCategory::Process,
            RelayError::Cancelled(_) => ErrorCategory::Cancelled,
        }
    }
}

/// Error category for classification and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    IoError,
    Codec,
    Network,
    /// Non-success or malformed answer from the control plane
    Remote,
    /// Remote state that must be resolved by the operator first
    Precondition,
    /// Some steps succeeded and some did not
    Partial,
    Process,
    Cancelled,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::IoError => write!(f, "io"),
            ErrorCategory::Codec => write!(f, "codec"),
            ErrorCategory::Network => write!(f, "network"),
            ErrorCategory::Remote => write!(f, "remote"),
            ErrorCategory::Precondition => write!(f, "precondition"),
            ErrorCategory::Partial => write!(f, "partial"),
            ErrorCategory::Process => write!(f, "process"),
            ErrorCategory::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Render `status <code> <reason>[: <body>]`
fn format_status(status: u16, body: &str) -> String {
    let reason = reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
        .unwrap_or("unknown status");
    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("status {} {}", status, reason)
    } else {
        format!("status {} {}: {}", status, reason, trimmed)
    }
}

fn join_messages(errors: &[RelayError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
