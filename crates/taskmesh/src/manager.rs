//! The dispatch/wait/collect pipeline that drives batches of work through
//! a scheduler.

use std::thread;
use std::time::{Duration, SystemTime};

use tracing::{debug, error, warn};

use taskmesh_types::status::StatusRecord;
use taskmesh_types::value::WireValue;

use crate::config::{default, Config};
use crate::error::{EndpointError, Error};
use crate::handle::Handle;

/// How many tasks must finish before a wait phase returns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitThreshold {
    /// Return once at least this many tasks have finished.
    AtLeast(usize),
    /// Drain every outstanding task.
    All,
}

impl WaitThreshold {
    fn reached(&self, finished: usize) -> bool {
        match self {
            WaitThreshold::AtLeast(n) => finished >= *n,
            // only an empty outstanding set ends the phase
            WaitThreshold::All => false,
        }
    }
}

/// Drives batches of work items through dispatch, polling and delivery.
///
/// The manager never aborts mid-batch on a single-task failure: transient
/// transport faults are retried on the next sweep, and unrecoverable
/// per-task faults are converted into delivered error results, so every
/// dispatched element reaches the result callback exactly once.
#[derive(Clone, Debug)]
pub struct Manager {
    refresh_timeout: Duration,
    poll_interval: Duration,
    max_outstanding: usize,
}

impl Default for Manager {
    fn default() -> Self {
        Self {
            refresh_timeout: default::refresh_timeout(),
            poll_interval: default::poll_interval(),
            max_outstanding: default::max_outstanding(),
        }
    }
}

impl Manager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            refresh_timeout: config.refresh_timeout,
            poll_interval: config.poll_interval,
            max_outstanding: config.max_outstanding.max(1),
        }
    }

    /// Widen the in-flight window. The delivery contract is unchanged: a
    /// wider window only allows more elements to be outstanding at once.
    pub fn with_max_outstanding(mut self, width: usize) -> Self {
        self.max_outstanding = width.max(1);
        self
    }

    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Drive a batch of elements to completion.
    ///
    /// `dispatch` turns an element into a [`Handle`], typically by
    /// submitting to a scheduler; its errors abort the batch. `deliver`
    /// receives each element together with its decoded result, in
    /// completion order. `max_time` is the per-task wall-clock budget;
    /// zero means unlimited.
    pub fn process_elements<E>(
        &self,
        elements: Vec<E>,
        mut dispatch: impl FnMut(&E) -> Result<Handle, Error>,
        mut deliver: impl FnMut(&E, WireValue),
        max_time: Duration,
    ) -> Result<(), Error> {
        let mut on_exception = default_exception_hook::<E>();
        let mut outstanding: Vec<(Handle, E)> = Vec::new();

        for element in elements {
            let handle = dispatch(&element)?;
            outstanding.push((handle, element));

            if outstanding.len() < self.max_outstanding {
                continue;
            }

            let (finished, unfinished) = self.wait_for_tasks(
                outstanding,
                WaitThreshold::AtLeast(1),
                max_time,
                &mut on_exception,
            );

            outstanding = unfinished;
            self.cleanup_finished_handles(finished, &mut deliver);
        }

        let (finished, unfinished) =
            self.wait_for_tasks(outstanding, WaitThreshold::All, max_time, &mut on_exception);

        debug_assert!(unfinished.is_empty());
        self.cleanup_finished_handles(finished, &mut deliver);

        Ok(())
    }

    /// Poll outstanding `(handle, element)` pairs until the threshold is
    /// reached or nothing is left, returning `(finished, unfinished)`.
    ///
    /// Per sweep, each pair is refreshed with a bounded deadline. Transport
    /// faults leave the pair in place with its previous handle, assuming
    /// the status is unchanged. Any other fault invokes `on_exception` and
    /// completes the element with an invalid handle, so it still reaches
    /// delivery. Tasks running past `max_time` are killed and kept for one
    /// more sweep so their terminal status is observed.
    pub fn wait_for_tasks<E>(
        &self,
        mut outstanding: Vec<(Handle, E)>,
        threshold: WaitThreshold,
        max_time: Duration,
        on_exception: &mut impl FnMut(&Handle, &E, &EndpointError),
    ) -> (Vec<(Handle, E)>, Vec<(Handle, E)>) {
        let mut finished: Vec<(Handle, E)> = Vec::new();

        while !outstanding.is_empty() && !threshold.reached(finished.len()) {
            let mut still_waiting: Vec<(Handle, E)> = Vec::new();

            for (handle, element) in outstanding {
                match handle.refresh(self.refresh_timeout) {
                    Ok(refreshed) if refreshed.is_finished() => {
                        finished.push((refreshed, element));
                    }

                    Ok(refreshed) if past_budget(refreshed.status(), max_time) => {
                        warn!(handle = %refreshed, "task ran past its budget, killing it");

                        match refreshed.kill() {
                            // keep the pair so the terminal status is
                            // observed on the next sweep
                            Ok(()) => still_waiting.push((refreshed, element)),
                            Err(e) if e.is_transport() => {
                                warn!(handle = %refreshed, "kill failed, will retry: {}", e);
                                still_waiting.push((refreshed, element));
                            }
                            Err(e) => {
                                finished.push(Self::complete_invalid(
                                    refreshed,
                                    element,
                                    e,
                                    on_exception,
                                ));
                            }
                        }
                    }

                    Ok(refreshed) => still_waiting.push((refreshed, element)),

                    Err(e) if e.is_transport() => {
                        warn!(
                            handle = %handle,
                            "transport fault while polling, assuming status unchanged: {}", e
                        );
                        still_waiting.push((handle, element));
                    }

                    Err(e) => {
                        finished.push(Self::complete_invalid(handle, element, e, on_exception));
                    }
                }
            }

            outstanding = still_waiting;

            if !outstanding.is_empty()
                && !threshold.reached(finished.len())
                && !self.poll_interval.is_zero()
            {
                thread::sleep(self.poll_interval);
            }
        }

        (finished, outstanding)
    }

    /// Deliver results for finished pairs, in order, and release their
    /// worker-side records. Cleanup faults never mask result delivery.
    pub fn cleanup_finished_handles<E>(
        &self,
        finished: Vec<(Handle, E)>,
        deliver: &mut impl FnMut(&E, WireValue),
    ) {
        for (handle, element) in finished {
            let value = match handle.status().result.clone() {
                Some(result) => match result.into_value() {
                    Ok(value) => value,
                    Err(e) => {
                        error!(handle = %handle, "could not decode task result: {}", e);
                        WireValue::String(format!("could not decode task result: {e}"))
                    }
                },
                None => WireValue::Nil,
            };

            deliver(&element, value);

            if let Err(e) = handle.cleanup() {
                warn!(handle = %handle, "unable to clean up handle: {}", e);
            }
        }
    }

    /// Complete an element whose polling failed unrecoverably: invoke the
    /// hook, then stand in an invalid handle whose result names the error.
    fn complete_invalid<E>(
        handle: Handle,
        element: E,
        e: EndpointError,
        on_exception: &mut impl FnMut(&Handle, &E, &EndpointError),
    ) -> (Handle, E) {
        error!(handle = %handle, "unrecoverable fault while waiting for task: {}", e);
        on_exception(&handle, &element, &e);

        let status = handle
            .status()
            .clone()
            .finished_with_error(format!("got exception while waiting for task: {e}"));

        (Handle::invalid(handle.name().clone(), status), element)
    }
}

/// The default exception hook: log and swallow.
pub fn default_exception_hook<E>() -> impl FnMut(&Handle, &E, &EndpointError) {
    |handle: &Handle, _element: &E, e: &EndpointError| {
        debug!(handle = %handle, "ignoring exception: {}", e);
    }
}

// A task is past its budget once its observed start predates now - max_time.
fn past_budget(status: &StatusRecord, max_time: Duration) -> bool {
    if max_time.is_zero() {
        return false;
    }

    match status.starttime {
        Some(start) => match SystemTime::now().duration_since(start) {
            Ok(age) => age > max_time,
            // start in the future means clock skew, leave the task alone
            Err(_) => false,
        },
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_budget_means_unlimited() {
        let started_long_ago = StatusRecord::running(SystemTime::UNIX_EPOCH);

        assert!(!past_budget(&started_long_ago, Duration::ZERO));
    }

    #[test]
    fn budget_is_measured_from_starttime() {
        let budget = Duration::from_secs(1);

        let old = StatusRecord::running(SystemTime::now() - Duration::from_secs(10));
        assert!(past_budget(&old, budget));

        let fresh = StatusRecord::running(SystemTime::now());
        assert!(!past_budget(&fresh, budget));

        let not_started = StatusRecord::pending();
        assert!(!past_budget(&not_started, budget));
    }

    #[test]
    fn thresholds() {
        assert!(WaitThreshold::AtLeast(1).reached(1));
        assert!(WaitThreshold::AtLeast(1).reached(2));
        assert!(!WaitThreshold::AtLeast(2).reached(1));
        assert!(!WaitThreshold::All.reached(100));
    }
}
