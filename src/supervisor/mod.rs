/*!
 * Supervision of detached listener processes
 *
 * - `registry`: on-disk process records
 * - `runtime`: liveness by (pid, start ticks), termination
 * - `detach`: background re-exec and record self-cleanup
 * - `redact`: secret scrubbing for persisted argv
 */

pub mod detach;
pub mod redact;
pub mod registry;
pub mod runtime;

pub use detach::{build_detached_child_args, cleanup_own_record, launch_detached, DetachedLaunch};
pub use registry::{ProcessRecord, ProcessRegistry, StoredRecord};
pub use runtime::{inspect, terminate, ProcessStatus, RuntimeState};
