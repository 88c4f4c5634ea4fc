//! Client-side distributed task dispatch.
//!
//! A [`Scheduler`] keeps a registry of worker endpoints, asks each for its
//! current load and places every task on the least-loaded worker,
//! returning a [`Handle`] to it. A [`Manager`] drives batches of work
//! through the scheduler: it dispatches elements, polls the outstanding
//! handles, enforces per-task wall-clock budgets and delivers each result
//! exactly once, salvaging transient transport faults along the way.
//!
//! Workers are reached through the [`endpoint::WorkerEndpoint`] trait; any
//! transport implementing it is interchangeable. The [`local::LocalServer`]
//! is an in-process implementation so single-box usage needs no external
//! setup.

pub mod config;
pub mod endpoint;
pub mod error;
pub mod handle;
pub mod local;
pub mod manager;
pub mod scheduler;

pub use config::Config;
pub use handle::Handle;
pub use manager::{Manager, WaitThreshold};
pub use scheduler::Scheduler;
