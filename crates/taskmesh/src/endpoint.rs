//! The contract every worker endpoint exposes to the scheduler and manager.

use std::sync::Arc;
use std::time::Duration;

use taskmesh_types::endpoint::EndpointId;
use taskmesh_types::method::MethodSet;
use taskmesh_types::status::StatusRecord;
use taskmesh_types::task::{Priority, TaskId, TaskSpec};
use taskmesh_types::value::WireValue;

use crate::error::{EndpointError, Error};

/// One worker reachable over RPC, local or remote.
///
/// This is the only interface the scheduler and manager depend on; any
/// transport implementing it is interchangeable. Calls that can hang on a
/// dead peer take an explicit deadline instead of relying on process-global
/// socket state.
pub trait WorkerEndpoint: Send + Sync {
    /// Retrieve the method catalog published by this worker.
    fn list_methods(&self, timeout: Duration) -> Result<MethodSet, EndpointError>;

    /// Estimated wait until a task of the given priority would start.
    /// Lower means less loaded.
    fn est_wait_time(&self, priority: Priority, timeout: Duration) -> Result<f64, EndpointError>;

    /// Legacy load metric published by older workers.
    fn cpu_load(&self, timeout: Duration) -> Result<f64, EndpointError>;

    /// Submit a task, with extra arguments forwarded to the worker verbatim.
    fn submit(&self, task: &TaskSpec, extra: &WireValue) -> Result<TaskId, EndpointError>;

    /// Last known status of the given task.
    fn status_info(&self, task: &TaskId) -> Result<StatusRecord, EndpointError>;

    /// Fetch a fresh status for the given task.
    fn updated_status(
        &self,
        task: &TaskId,
        timeout: Duration,
    ) -> Result<StatusRecord, EndpointError>;

    fn kill(&self, task: &TaskId) -> Result<(), EndpointError>;

    /// Drop the worker-side record of a finished task.
    fn cleanup(&self, task: &TaskId) -> Result<(), EndpointError>;

    /// Human-readable dump of the worker's queue.
    fn show_queue(&self, timeout: Duration) -> Result<String, EndpointError>;

    /// Forget finished tasks older than the worker's retention window.
    fn clean_old_tasks(&self) -> Result<(), EndpointError>;

    /// Ask the worker to shut down. Fire-and-forget.
    fn terminate(&self) -> Result<(), EndpointError>;
}

pub type SharedEndpoint = Arc<dyn WorkerEndpoint>;

/// Manufactures endpoint clients for `(host, port)` keys.
///
/// Connecting never implies the server is up: like any RPC proxy, the
/// returned client may fail with transport errors on first use.
pub trait EndpointConnector: Send + Sync {
    fn connect(&self, id: &EndpointId) -> Result<SharedEndpoint, Error>;
}

/// Connector for single-box deployments with no remote fleet: every
/// address is unknown, so only the in-process local server is reachable.
pub struct NoRemoteEndpoints;

impl EndpointConnector for NoRemoteEndpoints {
    fn connect(&self, id: &EndpointId) -> Result<SharedEndpoint, Error> {
        Err(Error::unknown_endpoint(id.clone()))
    }
}
