//! Job scheduling for queuectl.
//!
//! Owns the job state machine and dispatches work to command executors.
//! All queue mutations are serialized through a single in-process lock.

pub mod pool;
pub mod queue;
pub mod worker;

pub use pool::{PoolOptions, WorkerPool};
pub use queue::JobQueue;
pub use worker::{Worker, WorkerOptions};
