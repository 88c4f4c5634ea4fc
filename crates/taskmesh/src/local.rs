//! The in-process worker endpoint.
//!
//! Single-box usage needs no external setup: the scheduler starts a
//! [`LocalServer`] on demand, a background thread servicing the same
//! request surface remote workers expose. The channel-backed client half
//! implements [`WorkerEndpoint`], so the scheduler and manager cannot tell
//! it apart from a remote worker.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

use taskmesh_types::method::MethodSet;
use taskmesh_types::status::{StatusRecord, TaskResult};
use taskmesh_types::task::{Priority, TaskId, TaskSpec};
use taskmesh_types::value::{BlobEnvelope, WireValue};

use crate::endpoint::{SharedEndpoint, WorkerEndpoint};
use crate::error::{EndpointError, Error};

/// Executes tasks on behalf of the local server.
///
/// The task runtime itself is not part of this crate: single-box users
/// plug in whatever execution logic their tasks need. An `Err` is recorded
/// as the task's result text.
pub trait TaskRunner: Send + Sync {
    fn run(&self, task: &TaskSpec, extra: &WireValue) -> Result<WireValue, String>;
}

impl<F> TaskRunner for F
where
    F: Fn(&TaskSpec, &WireValue) -> Result<WireValue, String> + Send + Sync,
{
    fn run(&self, task: &TaskSpec, extra: &WireValue) -> Result<WireValue, String> {
        self(task, extra)
    }
}

pub type SharedRunner = Arc<dyn TaskRunner>;

/// Finished tasks older than this are dropped by `CleanOldTasks`.
const OLD_TASK_RETENTION: Duration = Duration::from_secs(10 * 60);

type ReplySender<T> = Sender<T>;

fn reply_channel<T>() -> (ReplySender<T>, Receiver<T>) {
    bounded(1)
}

enum Request {
    ListMethods {
        reply_to: ReplySender<MethodSet>,
    },
    EstWaitTime {
        priority: Priority,
        reply_to: ReplySender<f64>,
    },
    CpuLoad {
        reply_to: ReplySender<f64>,
    },
    Submit {
        task: TaskSpec,
        extra: WireValue,
        reply_to: ReplySender<TaskId>,
    },
    StatusInfo {
        task: TaskId,
        reply_to: ReplySender<Result<StatusRecord, EndpointError>>,
    },
    Kill {
        task: TaskId,
        reply_to: ReplySender<Result<(), EndpointError>>,
    },
    Cleanup {
        task: TaskId,
        reply_to: ReplySender<Result<(), EndpointError>>,
    },
    ShowQueue {
        reply_to: ReplySender<String>,
    },
    CleanOldTasks {
        reply_to: ReplySender<()>,
    },
    Terminate,
}

struct TaskEntry {
    spec: TaskSpec,
    submitted: SystemTime,
    status: StatusRecord,
    finished_at: Option<SystemTime>,
}

#[derive(Default)]
struct ServerState {
    tasks: BTreeMap<TaskId, TaskEntry>,
}

impl ServerState {
    fn outstanding(&self) -> usize {
        self.tasks
            .values()
            .filter(|entry| !entry.status.is_finished())
            .count()
    }

    // Tasks at or above the probed priority run first, so they are the
    // ones a new submission would wait behind.
    fn est_wait_time(&self, priority: Priority) -> f64 {
        self.tasks
            .values()
            .filter(|entry| !entry.status.is_finished())
            .filter(|entry| entry.spec.priority.value() >= priority.value())
            .count() as f64
    }

    fn show_queue(&self) -> String {
        let now = SystemTime::now();
        let mut dump = String::new();

        for (id, entry) in &self.tasks {
            let age = now
                .duration_since(entry.submitted)
                .unwrap_or(Duration::ZERO);

            let _ = writeln!(
                dump,
                "{}  {}  {}  {}s",
                id,
                entry.spec.name,
                entry.status.mode,
                age.as_secs()
            );
        }

        dump
    }

    fn clean_old_tasks(&mut self) {
        let now = SystemTime::now();

        self.tasks.retain(|_, entry| match entry.finished_at {
            Some(at) => now.duration_since(at).unwrap_or(Duration::ZERO) < OLD_TASK_RETENTION,
            None => true,
        });
    }
}

/// A worker endpoint running inside this process.
pub struct LocalServer {
    client: LocalEndpoint,
    thread: JoinHandle<()>,
}

impl LocalServer {
    /// Start the server thread and wait for it to accept requests, bounded
    /// by the given grace period.
    pub fn spawn(runner: SharedRunner, ready_within: Duration) -> Result<LocalServer, Error> {
        let (requests_tx, requests_rx) = unbounded();
        let (ready_tx, ready_rx) = bounded(1);

        let thread = thread::Builder::new()
            .name("taskmesh-local-server".to_string())
            .spawn(move || {
                let state = Arc::new(Mutex::new(ServerState::default()));

                // readiness: the request loop is about to accept
                let _ = ready_tx.send(());

                serve(state, runner, requests_rx);
            })
            .map_err(|e| Error::spawn_local_server(e.to_string()))?;

        match ready_rx.recv_timeout(ready_within) {
            Ok(()) => Ok(LocalServer {
                client: LocalEndpoint {
                    requests: requests_tx,
                },
                thread,
            }),
            Err(_) => Err(Error::spawn_local_server(
                "server did not become ready in time".to_string(),
            )),
        }
    }

    /// A client half for this server. Clones share the request queue.
    pub fn client(&self) -> SharedEndpoint {
        Arc::new(self.client.clone())
    }

    /// Wait for the server thread to wind down.
    pub fn join(self) {
        drop(self.client);
        let _ = self.thread.join();
    }
}

fn serve(state: Arc<Mutex<ServerState>>, runner: SharedRunner, requests: Receiver<Request>) {
    info!("local server accepting requests");

    for request in requests.iter() {
        match request {
            Request::ListMethods { reply_to } => {
                let _ = reply_to.send(MethodSet::full());
            }

            Request::EstWaitTime { priority, reply_to } => {
                let estimate = state.lock().unwrap().est_wait_time(priority);
                let _ = reply_to.send(estimate);
            }

            Request::CpuLoad { reply_to } => {
                let load = state.lock().unwrap().outstanding() as f64;
                let _ = reply_to.send(load);
            }

            Request::Submit {
                task,
                extra,
                reply_to,
            } => {
                let id = submit(&state, &runner, task, extra);
                let _ = reply_to.send(id);
            }

            Request::StatusInfo { task, reply_to } => {
                let status = state
                    .lock()
                    .unwrap()
                    .tasks
                    .get(&task)
                    .map(|entry| entry.status.clone())
                    .ok_or_else(|| no_such_task(&task));
                let _ = reply_to.send(status);
            }

            Request::Kill { task, reply_to } => {
                let _ = reply_to.send(kill(&state, &task));
            }

            Request::Cleanup { task, reply_to } => {
                let mut state = state.lock().unwrap();
                let result = match state.tasks.remove(&task) {
                    Some(_) => Ok(()),
                    None => Err(no_such_task(&task)),
                };
                let _ = reply_to.send(result);
            }

            Request::ShowQueue { reply_to } => {
                let dump = state.lock().unwrap().show_queue();
                let _ = reply_to.send(dump);
            }

            Request::CleanOldTasks { reply_to } => {
                state.lock().unwrap().clean_old_tasks();
                let _ = reply_to.send(());
            }

            Request::Terminate => {
                info!("local server terminating");
                break;
            }
        }
    }
}

fn no_such_task(task: &TaskId) -> EndpointError {
    EndpointError::refused(format!("no such task: {task}"))
}

/// Record the task and hand it to the runner on its own worker thread.
fn submit(
    state: &Arc<Mutex<ServerState>>,
    runner: &SharedRunner,
    task: TaskSpec,
    extra: WireValue,
) -> TaskId {
    let id = TaskId::fresh();
    debug!(task = %task.name, id = %id, "task submitted to the local server");

    state.lock().unwrap().tasks.insert(
        id.clone(),
        TaskEntry {
            spec: task.clone(),
            submitted: SystemTime::now(),
            status: StatusRecord::pending(),
            finished_at: None,
        },
    );

    let state = state.clone();
    let runner = runner.clone();
    let task_id = id.clone();

    thread::spawn(move || {
        {
            let mut state = state.lock().unwrap();
            match state.tasks.get_mut(&task_id) {
                // killed (or cleaned up) before it ever started
                Some(entry) if entry.status.is_finished() => return,
                None => return,
                Some(entry) => {
                    entry.status = StatusRecord::running(SystemTime::now());
                }
            }
        }

        let outcome = runner.run(&task, &extra);

        let result = match outcome {
            // round-trip through the envelope, like a remote worker would
            Ok(value) => match BlobEnvelope::wrap(&value) {
                Ok(envelope) => TaskResult::Enveloped(envelope),
                Err(e) => {
                    warn!(task = %task.name, "could not envelope the result: {}", e);
                    TaskResult::Plain(WireValue::String(format!(
                        "could not envelope the result: {e}"
                    )))
                }
            },
            Err(text) => TaskResult::Plain(WireValue::String(text)),
        };

        let mut state = state.lock().unwrap();
        if let Some(entry) = state.tasks.get_mut(&task_id) {
            if !entry.status.is_finished() {
                entry.status = StatusRecord::finished(entry.status.starttime, result);
                entry.finished_at = Some(SystemTime::now());
            }
        }
    });

    id
}

fn kill(state: &Arc<Mutex<ServerState>>, task: &TaskId) -> Result<(), EndpointError> {
    let mut state = state.lock().unwrap();

    let Some(entry) = state.tasks.get_mut(task) else {
        return Err(no_such_task(task));
    };

    if !entry.status.is_finished() {
        warn!(id = %task, "killing task");
        entry.status = StatusRecord::finished(
            entry.status.starttime,
            TaskResult::Plain(WireValue::String("killed".to_string())),
        );
        entry.finished_at = Some(SystemTime::now());
    }

    Ok(())
}

/// Channel-backed client half of the local server.
///
/// Once the server terminates, the request channel disconnects and every
/// call fails with a transport error, so liveness probes report it down
/// just like a dead remote worker.
#[derive(Clone)]
pub struct LocalEndpoint {
    requests: Sender<Request>,
}

impl LocalEndpoint {
    fn call<T>(
        &self,
        build: impl FnOnce(ReplySender<T>) -> Request,
        timeout: Duration,
    ) -> Result<T, EndpointError> {
        let (reply_to, reply) = reply_channel();

        self.requests
            .send(build(reply_to))
            .map_err(|_| server_gone())?;

        reply.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => {
                EndpointError::transport("timed out waiting for the local server".to_string())
            }
            RecvTimeoutError::Disconnected => server_gone(),
        })
    }

    fn call_blocking<T>(
        &self,
        build: impl FnOnce(ReplySender<T>) -> Request,
    ) -> Result<T, EndpointError> {
        let (reply_to, reply) = reply_channel();

        self.requests
            .send(build(reply_to))
            .map_err(|_| server_gone())?;

        reply.recv().map_err(|_| server_gone())
    }
}

fn server_gone() -> EndpointError {
    EndpointError::transport("local server is gone".to_string())
}

impl WorkerEndpoint for LocalEndpoint {
    fn list_methods(&self, timeout: Duration) -> Result<MethodSet, EndpointError> {
        self.call(|reply_to| Request::ListMethods { reply_to }, timeout)
    }

    fn est_wait_time(&self, priority: Priority, timeout: Duration) -> Result<f64, EndpointError> {
        self.call(
            |reply_to| Request::EstWaitTime { priority, reply_to },
            timeout,
        )
    }

    fn cpu_load(&self, timeout: Duration) -> Result<f64, EndpointError> {
        self.call(|reply_to| Request::CpuLoad { reply_to }, timeout)
    }

    fn submit(&self, task: &TaskSpec, extra: &WireValue) -> Result<TaskId, EndpointError> {
        self.call_blocking(|reply_to| Request::Submit {
            task: task.clone(),
            extra: extra.clone(),
            reply_to,
        })
    }

    fn status_info(&self, task: &TaskId) -> Result<StatusRecord, EndpointError> {
        self.call_blocking(|reply_to| Request::StatusInfo {
            task: task.clone(),
            reply_to,
        })?
    }

    fn updated_status(
        &self,
        task: &TaskId,
        timeout: Duration,
    ) -> Result<StatusRecord, EndpointError> {
        self.call(
            |reply_to| Request::StatusInfo {
                task: task.clone(),
                reply_to,
            },
            timeout,
        )?
    }

    fn kill(&self, task: &TaskId) -> Result<(), EndpointError> {
        self.call_blocking(|reply_to| Request::Kill {
            task: task.clone(),
            reply_to,
        })?
    }

    fn cleanup(&self, task: &TaskId) -> Result<(), EndpointError> {
        self.call_blocking(|reply_to| Request::Cleanup {
            task: task.clone(),
            reply_to,
        })?
    }

    fn show_queue(&self, timeout: Duration) -> Result<String, EndpointError> {
        self.call(|reply_to| Request::ShowQueue { reply_to }, timeout)
    }

    fn clean_old_tasks(&self) -> Result<(), EndpointError> {
        self.call_blocking(|reply_to| Request::CleanOldTasks { reply_to })
    }

    fn terminate(&self) -> Result<(), EndpointError> {
        self.requests
            .send(Request::Terminate)
            .map_err(|_| server_gone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_runner() -> SharedRunner {
        Arc::new(
            |task: &TaskSpec, _extra: &WireValue| -> Result<WireValue, String> {
                Ok(task.payload.clone())
            },
        )
    }

    fn spawn_server() -> LocalServer {
        LocalServer::spawn(echo_runner(), Duration::from_secs(3)).unwrap()
    }

    fn wait_finished(client: &SharedEndpoint, id: &TaskId) -> StatusRecord {
        for _ in 0..200 {
            let status = client.status_info(id).unwrap();
            if status.is_finished() {
                return status;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("task {id} did not finish in time");
    }

    #[test]
    fn submit_runs_and_finishes() {
        let server = spawn_server();
        let client = server.client();

        let mut task = TaskSpec::named("echo").unwrap();
        task.payload = WireValue::String("payload".to_string());

        let id = client.submit(&task, &WireValue::Nil).unwrap();

        let status = wait_finished(&client, &id);
        assert!(status.started());

        let result = status.result.unwrap();
        assert!(result.is_enveloped());
        assert_eq!(
            result.into_value().unwrap(),
            WireValue::String("payload".to_string())
        );
    }

    #[test]
    fn runner_errors_become_result_text() {
        let runner: SharedRunner = Arc::new(
            |_task: &TaskSpec, _extra: &WireValue| -> Result<WireValue, String> {
                Err("task blew up".to_string())
            },
        );
        let server = LocalServer::spawn(runner, Duration::from_secs(3)).unwrap();
        let client = server.client();

        let id = client
            .submit(&TaskSpec::named("doomed").unwrap(), &WireValue::Nil)
            .unwrap();

        let status = wait_finished(&client, &id);
        let value = status.result.unwrap().into_value().unwrap();
        assert_eq!(value.as_str(), Some("task blew up"));
    }

    #[test]
    fn cleanup_forgets_the_task() {
        let server = spawn_server();
        let client = server.client();

        let id = client
            .submit(&TaskSpec::named("gone").unwrap(), &WireValue::Nil)
            .unwrap();
        wait_finished(&client, &id);

        client.cleanup(&id).unwrap();
        assert!(client.status_info(&id).is_err());
        assert!(client.cleanup(&id).is_err());
    }

    #[test]
    fn terminate_disconnects_clients() {
        let server = spawn_server();
        let client = server.client();

        client.terminate().unwrap();
        server.join();

        let err = client.list_methods(Duration::from_secs(1)).unwrap_err();
        assert!(err.is_transport());
    }

    #[test]
    fn queue_dump_names_tasks() {
        let blocker: SharedRunner = Arc::new(
            |_task: &TaskSpec, _extra: &WireValue| -> Result<WireValue, String> {
                thread::sleep(Duration::from_millis(200));
                Ok(WireValue::Nil)
            },
        );
        let server = LocalServer::spawn(blocker, Duration::from_secs(3)).unwrap();
        let client = server.client();

        client
            .submit(&TaskSpec::named("visible").unwrap(), &WireValue::Nil)
            .unwrap();

        let dump = client.show_queue(Duration::from_secs(1)).unwrap();
        assert!(dump.contains("visible"));
    }
}
