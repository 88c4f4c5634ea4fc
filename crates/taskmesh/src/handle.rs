//! Client-side references to submitted tasks.

use core::fmt::{Debug, Display, Error as FmtError, Formatter};
use std::time::Duration;

use taskmesh_types::endpoint::EndpointId;
use taskmesh_types::status::StatusRecord;
use taskmesh_types::task::{TaskId, TaskName};

use crate::endpoint::SharedEndpoint;
use crate::error::EndpointError;

/// Reference to one submitted task.
///
/// A `Live` handle is bound to one endpoint and one server-side task id. An
/// `Invalid` handle is a synthetic terminal handle manufactured when an
/// unrecoverable fault occurs while polling: its status is pre-filled with
/// a finished record whose result names the error, and its mutating
/// operations are no-ops. At the result-callback boundary the two are
/// indistinguishable except for that result value.
#[derive(Clone)]
pub enum Handle {
    Live(LiveHandle),
    Invalid(InvalidHandle),
}

#[derive(Clone)]
pub struct LiveHandle {
    endpoint: EndpointId,
    client: SharedEndpoint,
    task: TaskId,
    name: TaskName,
    status: StatusRecord,
}

#[derive(Clone, Debug)]
pub struct InvalidHandle {
    name: TaskName,
    status: StatusRecord,
}

impl Handle {
    /// A live handle for a freshly submitted task.
    pub fn live(endpoint: EndpointId, client: SharedEndpoint, task: TaskId, name: TaskName) -> Self {
        Handle::Live(LiveHandle {
            endpoint,
            client,
            task,
            name,
            status: StatusRecord::pending(),
        })
    }

    /// A synthetic terminal handle carrying a pre-filled status.
    pub fn invalid(name: TaskName, status: StatusRecord) -> Self {
        Handle::Invalid(InvalidHandle { name, status })
    }

    pub fn name(&self) -> &TaskName {
        match self {
            Handle::Live(h) => &h.name,
            Handle::Invalid(h) => &h.name,
        }
    }

    pub fn endpoint(&self) -> Option<&EndpointId> {
        match self {
            Handle::Live(h) => Some(&h.endpoint),
            Handle::Invalid(_) => None,
        }
    }

    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            Handle::Live(h) => Some(&h.task),
            Handle::Invalid(_) => None,
        }
    }

    pub fn status(&self) -> &StatusRecord {
        match self {
            Handle::Live(h) => &h.status,
            Handle::Invalid(h) => &h.status,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status().is_finished()
    }

    /// Fetch a fresh status and return a new handle carrying it.
    ///
    /// The fresh status is folded into the old one, so a finished mode
    /// never regresses and the observed start time never changes. Invalid
    /// handles are already terminal and refresh to themselves.
    pub fn refresh(&self, timeout: Duration) -> Result<Handle, EndpointError> {
        match self {
            Handle::Live(h) => {
                let fresh = h.client.updated_status(&h.task, timeout)?;

                Ok(Handle::Live(LiveHandle {
                    status: h.status.absorb(fresh),
                    ..h.clone()
                }))
            }
            Handle::Invalid(_) => Ok(self.clone()),
        }
    }

    pub fn kill(&self) -> Result<(), EndpointError> {
        match self {
            Handle::Live(h) => h.client.kill(&h.task),
            Handle::Invalid(_) => Ok(()),
        }
    }

    /// Release the worker-side record of this task. Called exactly once,
    /// after the result has been delivered.
    pub fn cleanup(&self) -> Result<(), EndpointError> {
        match self {
            Handle::Live(h) => h.client.cleanup(&h.task),
            Handle::Invalid(_) => Ok(()),
        }
    }
}

impl Display for Handle {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        match self {
            Handle::Live(h) => write!(f, "task `{}` ({}) on {}", h.name, h.task, h.endpoint),
            Handle::Invalid(h) => write!(f, "invalid task `{}`", h.name),
        }
    }
}

impl Debug for Handle {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        match self {
            Handle::Live(h) => f
                .debug_struct("Live")
                .field("endpoint", &h.endpoint)
                .field("task", &h.task)
                .field("name", &h.name)
                .field("status", &h.status)
                .finish(),
            Handle::Invalid(h) => f.debug_struct("Invalid").field("handle", h).finish(),
        }
    }
}
