/*!
 * Command implementations behind the CLI
 *
 * Each submodule owns one command family. They share a `CommandContext`
 * built once from the merged configuration.
 */

pub mod destination;
pub mod listen;
pub mod ps;
pub mod receive;
pub mod webhook;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::ListenerConfig;
use crate::error::{RelayError, Result};
use crate::lifecycle::{DestinationManager, HttpTransport, ProvisionedDestination};
use crate::paths::{self, AuditPaths};
use crate::store;

/// Merged configuration plus the profile's on-disk locations
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub config: ListenerConfig,
    pub paths: AuditPaths,
}

impl CommandContext {
    pub fn new(config: ListenerConfig) -> Result<Self> {
        let paths = paths::resolve(&config.profile)?;
        Ok(Self { config, paths })
    }

    pub fn with_paths(config: ListenerConfig, paths: AuditPaths) -> Self {
        Self { config, paths }
    }

    /// Manager talking to the configured control plane
    pub fn destination_manager(&self) -> Result<DestinationManager> {
        let token = self.config.require_token()?;
        let transport = HttpTransport::new(
            token,
            self.config.global_base_url(),
            self.config.regional_base_url(),
        )?;
        tracing::debug!(
            global_base_url = %self.config.global_base_url(),
            regional_base_url = %self.config.regional_base_url(),
            "control plane transport ready"
        );
        Ok(DestinationManager::new(Arc::new(transport)))
    }
}

/// Multi-threaded runtime for one command
pub(crate) fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| RelayError::execution("failed to start async runtime", e))
}

/// Cancel `token` on Ctrl+C or SIGTERM.
///
/// Once installed, further interrupts no longer kill the process, so remote
/// teardown that follows is not cut short by a second Ctrl+C.
pub(crate) fn cancel_on_signal(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "SIGTERM handler unavailable; waiting for Ctrl+C only");
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        tracing::debug!("termination signal received");
        token.cancel();
    })
}

/// Fill in the local paths and write `destination.json`.
/// Failure is logged, never returned.
pub(crate) fn record_destination_state(
    paths: &AuditPaths,
    profile: &str,
    destination: &mut ProvisionedDestination,
) {
    destination.profile = profile.to_string();
    destination.events_file = paths.events_file.display().to_string();
    destination.destination_state_file = paths.destination_state_file.display().to_string();
    match store::write_state(&paths.destination_state_file, destination) {
        Ok(()) => tracing::debug!(
            destination_state_file = %paths.destination_state_file.display(),
            events_file = %paths.events_file.display(),
            "persisted audit-log destination state"
        ),
        Err(e) => tracing::warn!(
            destination_state_file = %paths.destination_state_file.display(),
            error = %e,
            "failed to persist audit-log destination state"
        ),
    }
}
