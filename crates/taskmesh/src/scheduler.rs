//! Fleet registry, liveness probing and load-aware task placement.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::Duration;

use itertools::Itertools;
use retry::delay::Fixed;
use tracing::{debug, info, warn};

use taskmesh_types::endpoint::EndpointId;
use taskmesh_types::method::names;
use taskmesh_types::task::{Priority, TaskSpec};
use taskmesh_types::value::WireValue;

use crate::config::Config;
use crate::endpoint::{EndpointConnector, SharedEndpoint, WorkerEndpoint};
use crate::error::{EndpointError, Error};
use crate::handle::Handle;
use crate::local::{LocalServer, SharedRunner};

/// Balances tasks over a fleet of worker endpoints.
///
/// The registry of remote endpoints is fixed at construction; the local
/// server has its own slot and is only reached (and, if need be, started)
/// on demand.
pub struct Scheduler<C> {
    config: Config,
    connector: C,
    runner: SharedRunner,
    endpoints: BTreeMap<EndpointId, SharedEndpoint>,
    local_id: EndpointId,
    local: Mutex<Option<LocalServer>>,
}

impl<C> std::fmt::Debug for Scheduler<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("endpoints", &self.endpoints.keys().collect::<Vec<_>>())
            .field("local_id", &self.local_id)
            .finish_non_exhaustive()
    }
}

impl<C: EndpointConnector> Scheduler<C> {
    /// Connect to every configured endpoint. Duplicate `(host, port)` keys
    /// are a configuration error.
    pub fn new(config: Config, connector: C, runner: SharedRunner) -> Result<Self, Error> {
        let mut endpoints = BTreeMap::new();

        for id in &config.endpoints {
            if endpoints.contains_key(id) {
                return Err(Error::duplicate_endpoint(id.clone()));
            }

            debug!(endpoint = %id, "making connection");
            let client = connector.connect(id)?;
            endpoints.insert(id.clone(), client);
        }

        Ok(Self {
            config,
            connector,
            runner,
            endpoints,
            local_id: EndpointId::local(),
            local: Mutex::new(None),
        })
    }

    /// A connection to the server at the given endpoint. No guarantee the
    /// server is up or the connection is usable.
    pub fn connection(&self, id: &EndpointId) -> Result<SharedEndpoint, Error> {
        if let Some(client) = self.endpoints.get(id) {
            return Ok(client.clone());
        }

        if *id == self.local_id {
            if let Some(server) = self.local.lock().unwrap().as_ref() {
                return Ok(server.client());
            }
        }

        self.connector.connect(id)
    }

    fn try_connection(&self, id: &EndpointId) -> Option<SharedEndpoint> {
        self.connection(id).ok()
    }

    /// Ping the endpoint by listing its methods. A transport fault means
    /// the server is down; any successful reply means it is up. Other
    /// failures indicate bugs rather than liveness and propagate.
    pub fn is_server_up(&self, id: &EndpointId) -> Result<bool, Error> {
        let Some(conn) = self.try_connection(id) else {
            return Ok(false);
        };

        probe(conn.as_ref(), self.config.load_query_timeout)
            .map_err(|e| Error::endpoint(id.clone(), e))
    }

    /// A connection to the local server, starting it in the background if
    /// it is not up yet.
    pub fn connect_to_local_server(&self) -> Result<SharedEndpoint, Error> {
        let timeout = self.config.load_query_timeout;

        if let Some(conn) = self.try_connection(&self.local_id) {
            match probe(conn.as_ref(), timeout) {
                Ok(true) => return Ok(conn),
                Ok(false) => {}
                Err(e) => return Err(Error::endpoint(self.local_id.clone(), e)),
            }
        }

        let server = LocalServer::spawn(self.runner.clone(), self.config.local_grace_period)?;
        info!(endpoint = %self.local_id, "started the local server");

        let client = server.client();
        *self.local.lock().unwrap() = Some(server);

        match probe(client.as_ref(), timeout) {
            Ok(true) => Ok(client),
            _ => Err(Error::local_server_unreachable()),
        }
    }

    /// The sorted, deduplicated set of all known endpoints, including the
    /// local server when it is currently up.
    pub fn all_hosts(&self) -> Result<Vec<EndpointId>, Error> {
        let mut hosts: BTreeSet<EndpointId> = self.endpoints.keys().cloned().collect();

        if self.is_server_up(&self.local_id)? {
            hosts.insert(self.local_id.clone());
        }

        Ok(hosts.into_iter().collect())
    }

    /// Submit a task to the best available server and return a handle to it.
    ///
    /// Every registered endpoint is asked for its current load with a
    /// bounded deadline; endpoints that cannot be contacted are skipped
    /// with a warning. The task goes to the endpoint reporting the lowest
    /// load, ties resolved in registry order. A failure of the final
    /// submission is not retried elsewhere; it surfaces to the caller.
    pub fn submit_to_best_server(
        &self,
        task: &TaskSpec,
        extra: &WireValue,
    ) -> Result<Handle, Error> {
        let timeout = self.config.load_query_timeout;

        debug!("requesting wait-time estimates from known servers");
        let mut loads: Vec<(&EndpointId, &SharedEndpoint, f64)> = Vec::new();

        for (id, client) in &self.endpoints {
            debug!(endpoint = %id, "contacting");

            match query_load(client.as_ref(), task.priority, timeout) {
                Ok(load) => {
                    debug!(endpoint = %id, load, "got load estimate");
                    loads.push((id, client, load));
                }
                Err(e) => {
                    warn!(endpoint = %id, "unable to contact endpoint, skipping it: {}", e);
                }
            }
        }

        if loads.is_empty() {
            return Err(Error::no_reachable_endpoint(timeout.as_secs()));
        }

        // stable: ties keep registry iteration order
        loads.sort_by(|a, b| a.2.total_cmp(&b.2));

        debug!(
            "loads are [{}]",
            loads.iter().map(|(id, _, load)| format!("{id}={load}")).join(", ")
        );

        let (id, client, _) = &loads[0];
        let task_id = client
            .submit(task, extra)
            .map_err(|e| Error::endpoint((*id).clone(), e))?;

        Ok(Handle::live(
            (*id).clone(),
            (*client).clone(),
            task_id,
            task.name.clone(),
        ))
    }

    /// Queue dump of the server at the given endpoint. Failures are
    /// non-fatal: logged, and reported as an empty dump.
    pub fn show_queue(&self, id: &EndpointId) -> String {
        debug!(endpoint = %id, "contacting");

        match self.try_connection(id) {
            Some(conn) => match conn.show_queue(self.config.show_queue_timeout) {
                Ok(dump) => dump,
                Err(e) => {
                    info!(endpoint = %id, "unable to fetch the queue: {}", e);
                    String::new()
                }
            },
            None => {
                info!(endpoint = %id, "no connection to endpoint");
                String::new()
            }
        }
    }

    /// Ask the server at the given endpoint to forget old finished tasks.
    pub fn clean_old_tasks(&self, id: &EndpointId) -> Result<(), Error> {
        self.connection(id)?
            .clean_old_tasks()
            .map_err(|e| Error::endpoint(id.clone(), e))
    }
}

// Teardown needs no connector: only already-known connections are probed.
impl<C> Scheduler<C> {
    /// Terminate the local server if it is up, then wait a bounded grace
    /// period so the local worker finalizes before the process exits.
    pub fn shutdown(&mut self) {
        debug!("destroying scheduler");

        let conn = self
            .endpoints
            .get(&self.local_id)
            .cloned()
            .or_else(|| self.local.lock().unwrap().as_ref().map(|s| s.client()));

        if let Some(conn) = conn {
            match probe(conn.as_ref(), self.config.load_query_timeout) {
                Ok(true) => {
                    info!(endpoint = %self.local_id, "shutting down the local server");

                    if let Err(e) = conn.terminate() {
                        warn!(endpoint = %self.local_id, "terminate request failed: {}", e);
                    }

                    self.await_local_shutdown(conn.as_ref());
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(endpoint = %self.local_id, "liveness probe failed during shutdown: {}", e);
                }
            }
        }

        if let Some(server) = self.local.lock().unwrap().take() {
            server.join();
        }
    }

    fn await_local_shutdown(&self, conn: &dyn WorkerEndpoint) {
        let grace = self.config.local_grace_period;
        let delay = Duration::from_millis(100);
        let attempts = (grace.as_millis() / delay.as_millis()).max(1) as usize;

        let stopped = retry::retry(Fixed::from_millis(100).take(attempts), || {
            match probe(conn, delay) {
                Ok(false) => Ok(()),
                _ => Err("still up"),
            }
        });

        match stopped {
            Ok(()) => info!("local server shutdown"),
            Err(_) => warn!("local server did not stop within {:?}", grace),
        }
    }
}

impl<C> Drop for Scheduler<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Liveness probe: `list_methods` treated as a ping.
fn probe(conn: &dyn WorkerEndpoint, timeout: Duration) -> Result<bool, EndpointError> {
    match conn.list_methods(timeout) {
        Ok(_) => Ok(true),
        Err(e) if e.is_transport() => Ok(false),
        Err(e) => Err(e),
    }
}

// Backward compatibility: prefer `EstWaitTime`, fall back to `CpuLoad` on
// older workers. The catalog is re-fetched on every submission on purpose:
// it tolerates endpoints restarted with an upgraded method set.
fn query_load(
    client: &dyn WorkerEndpoint,
    priority: Priority,
    timeout: Duration,
) -> Result<f64, EndpointError> {
    let methods = client.list_methods(timeout)?;

    if methods.contains(names::EST_WAIT_TIME) {
        client.est_wait_time(priority, timeout)
    } else if methods.contains(names::CPU_LOAD) {
        client.cpu_load(timeout)
    } else {
        Err(EndpointError::method_missing(format!(
            "{} or {}",
            names::EST_WAIT_TIME,
            names::CPU_LOAD
        )))
    }
}
