#![allow(dead_code)]

//! Scripted worker endpoints for exercising the scheduler and manager
//! without a live transport.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use taskmesh::config::Config;
use taskmesh::endpoint::{EndpointConnector, SharedEndpoint, WorkerEndpoint};
use taskmesh::error::{EndpointError, Error};
use taskmesh::local::SharedRunner;
use taskmesh_types::endpoint::EndpointId;
use taskmesh_types::method::{names, MethodSet};
use taskmesh_types::status::{StatusRecord, TaskResult};
use taskmesh_types::task::{Priority, TaskId, TaskSpec};
use taskmesh_types::value::WireValue;

/// What a mock endpoint has been asked to do so far.
#[derive(Default)]
pub struct CallLog {
    /// Priorities probed through `EstWaitTime`.
    pub est_wait_time: Vec<f64>,
    pub cpu_load: usize,
    /// Names of the tasks submitted here.
    pub submits: Vec<String>,
    pub refreshes: usize,
    pub kills: usize,
    pub cleanups: usize,
}

pub struct MockEndpoint {
    methods: MethodSet,
    load: f64,
    dead: bool,
    /// Killing a task makes its next refresh observe a terminal status.
    kill_finishes: bool,
    status_script: Mutex<VecDeque<Result<StatusRecord, EndpointError>>>,
    last_status: Mutex<StatusRecord>,
    pub log: Mutex<CallLog>,
}

impl MockEndpoint {
    fn new(methods: MethodSet, load: f64, dead: bool) -> Arc<Self> {
        Arc::new(Self {
            methods,
            load,
            dead,
            kill_finishes: true,
            status_script: Mutex::new(VecDeque::new()),
            last_status: Mutex::new(StatusRecord::pending()),
            log: Mutex::new(CallLog::default()),
        })
    }

    /// A current-generation worker publishing `EstWaitTime`.
    pub fn with_load(load: f64) -> Arc<Self> {
        Self::new(MethodSet::full(), load, false)
    }

    /// An older worker publishing only `CpuLoad`.
    pub fn legacy(load: f64) -> Arc<Self> {
        let methods = [
            names::LIST_METHODS,
            names::SUBMIT,
            names::STATUS_INFO,
            names::UPDATED_HANDLE,
            names::CPU_LOAD,
            names::KILL,
            names::CLEANUP,
        ]
        .into_iter()
        .map(String::from)
        .collect();

        Self::new(methods, load, false)
    }

    /// An endpoint that fails every call with a transport error.
    pub fn dead() -> Arc<Self> {
        Self::new(MethodSet::full(), 0.0, true)
    }

    /// Queue the outcome of the next refresh. Once the script drains, the
    /// last scripted status repeats.
    pub fn push_status(&self, status: Result<StatusRecord, EndpointError>) {
        self.status_script.lock().unwrap().push_back(status);
    }

    fn next_status(&self) -> Result<StatusRecord, EndpointError> {
        let mut script = self.status_script.lock().unwrap();

        match script.pop_front() {
            Some(Ok(status)) => {
                *self.last_status.lock().unwrap() = status.clone();
                Ok(status)
            }
            Some(Err(e)) => Err(e),
            None => Ok(self.last_status.lock().unwrap().clone()),
        }
    }

    fn check_alive(&self) -> Result<(), EndpointError> {
        if self.dead {
            Err(EndpointError::transport("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

impl WorkerEndpoint for MockEndpoint {
    fn list_methods(&self, _timeout: Duration) -> Result<MethodSet, EndpointError> {
        self.check_alive()?;
        Ok(self.methods.clone())
    }

    fn est_wait_time(&self, priority: Priority, _timeout: Duration) -> Result<f64, EndpointError> {
        self.check_alive()?;
        self.log.lock().unwrap().est_wait_time.push(priority.value());
        Ok(self.load)
    }

    fn cpu_load(&self, _timeout: Duration) -> Result<f64, EndpointError> {
        self.check_alive()?;
        self.log.lock().unwrap().cpu_load += 1;
        Ok(self.load)
    }

    fn submit(&self, task: &TaskSpec, _extra: &WireValue) -> Result<TaskId, EndpointError> {
        self.check_alive()?;
        self.log
            .lock()
            .unwrap()
            .submits
            .push(task.name.as_str().to_string());
        Ok(TaskId::fresh())
    }

    fn status_info(&self, _task: &TaskId) -> Result<StatusRecord, EndpointError> {
        self.check_alive()?;
        Ok(self.last_status.lock().unwrap().clone())
    }

    fn updated_status(
        &self,
        _task: &TaskId,
        _timeout: Duration,
    ) -> Result<StatusRecord, EndpointError> {
        self.check_alive()?;
        self.log.lock().unwrap().refreshes += 1;
        self.next_status()
    }

    fn kill(&self, _task: &TaskId) -> Result<(), EndpointError> {
        self.check_alive()?;
        self.log.lock().unwrap().kills += 1;

        if self.kill_finishes {
            let starttime = self.last_status.lock().unwrap().starttime;
            self.push_status(Ok(StatusRecord::finished(
                starttime,
                TaskResult::Plain(WireValue::String("killed".to_string())),
            )));
        }

        Ok(())
    }

    fn cleanup(&self, _task: &TaskId) -> Result<(), EndpointError> {
        self.check_alive()?;
        self.log.lock().unwrap().cleanups += 1;
        Ok(())
    }

    fn show_queue(&self, _timeout: Duration) -> Result<String, EndpointError> {
        self.check_alive()?;
        Ok("queue dump".to_string())
    }

    fn clean_old_tasks(&self) -> Result<(), EndpointError> {
        self.check_alive()?;
        Ok(())
    }

    fn terminate(&self) -> Result<(), EndpointError> {
        self.check_alive()?;
        Ok(())
    }
}

/// Connector serving endpoints from a fixed table.
pub struct MockConnector {
    endpoints: BTreeMap<EndpointId, SharedEndpoint>,
}

impl MockConnector {
    pub fn new(pairs: Vec<(&str, SharedEndpoint)>) -> Self {
        let endpoints = pairs
            .into_iter()
            .map(|(addr, client)| (addr.parse().unwrap(), client))
            .collect();

        Self { endpoints }
    }
}

impl EndpointConnector for MockConnector {
    fn connect(&self, id: &EndpointId) -> Result<SharedEndpoint, Error> {
        self.endpoints
            .get(id)
            .cloned()
            .ok_or_else(|| Error::unknown_endpoint(id.clone()))
    }
}

/// Config listing the given endpoints, with fast polling for tests.
pub fn test_config(endpoints: &[&str]) -> Config {
    Config {
        endpoints: endpoints.iter().map(|addr| addr.parse().unwrap()).collect(),
        poll_interval: Duration::from_millis(1),
        local_grace_period: Duration::from_secs(1),
        ..Config::default()
    }
}

/// A runner that executes nothing and returns nil.
pub fn noop_runner() -> SharedRunner {
    Arc::new(
        |_task: &TaskSpec, _extra: &WireValue| -> Result<WireValue, String> { Ok(WireValue::Nil) },
    )
}
