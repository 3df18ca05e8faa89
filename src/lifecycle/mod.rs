/*!
 * Remote audit-log destination lifecycle
 *
 * Provisioning, webhook binding and teardown against the control plane.
 * Responses are read tolerantly (see `tolerant`); the only retried failure
 * is a delete that conflicts because the destination is still in use.
 * Every call is bounded by a per-request timeout.
 */

pub mod manager;
pub mod retry;
pub mod tolerant;
pub mod transport;

pub use manager::{
    DeleteReport, DestinationManager, DestinationSpec, ProvisionedDestination, CLEANUP_TIMEOUT,
};
pub use retry::DeleteBackoff;
pub use tolerant::{DestinationRecord, WebhookConfig};
pub use transport::{ApiBase, ApiRequest, ApiResponse, ApiTransport, HttpTransport};
