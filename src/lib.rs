/*!
 * Konnect audit-log listener
 *
 * Receives Konnect audit-log webhook deliveries on a local HTTP endpoint and
 * manages the lifecycle around it:
 * - Append-only, profile-scoped event store (JSON lines)
 * - Webhook receiver with optional authorization and gzip decoding
 * - Remote destination provisioning, webhook binding and teardown with retry
 * - Detached background listeners tracked by process records
 * - Live tail of received records with optional jq filtering
 */

pub mod commands;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod output;
pub mod paths;
pub mod persist;
pub mod receiver;
pub mod store;
pub mod supervisor;
pub mod tail;

// Re-export commonly used types
pub use config::{ListenOptions, ListenerConfig, LogFormat, LogLevel};
pub use error::{RelayError, Result};
pub use lifecycle::{DestinationManager, DestinationSpec, ProvisionedDestination};
pub use paths::AuditPaths;
pub use receiver::{Receiver, ReceiverConfig};
pub use store::EventStore;
pub use supervisor::{ProcessRecord, ProcessRegistry, ProcessStatus};
pub use tail::{RecordSink, TailEmitter};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
