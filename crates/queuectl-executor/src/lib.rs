//! Command execution backends for queuectl.
//!
//! Provides executor implementations for running job commands:
//! - Host shell (`sh -c` / `cmd /C`)

pub mod shell;

pub use queuectl_core::executor::{
    CommandRunner, ERROR_TAIL_CHARS, EXIT_EXEC_FAILURE, EXIT_TIMEOUT, ExecOutcome,
};
pub use shell::ShellExecutor;
