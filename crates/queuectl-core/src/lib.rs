//! Core domain types and traits for the queuectl job queue.
//!
//! This crate contains:
//! - Job and job state definitions
//! - Queue settings (the persisted key/value configuration)
//! - The retry backoff policy
//! - Storage and command execution traits
//! - Worker identifiers and the clock abstraction

pub mod backoff;
pub mod clock;
pub mod error;
pub mod executor;
pub mod id;
pub mod job;
pub mod settings;
pub mod store;

pub use clock::{Clock, SystemClock};
pub use executor::{CommandRunner, ExecOutcome};
pub use error::{Error, Result};
pub use id::WorkerId;
pub use job::{Job, JobState};
pub use settings::{ConfigMap, ConfigValue, QueueSettings};
pub use store::{JobStore, StoreError, StoreResult};
