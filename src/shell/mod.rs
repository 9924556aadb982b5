//! Command execution engine.
//!
//! This module turns an `ExecutionRequest` into a `CommandRecord`: it spawns
//! the command under the host shell, streams both output pipes, enforces the
//! timeout and retries failed attempts with exponential backoff.

pub(crate) mod record;
mod runner;

pub use record::{Attempt, CommandRecord, ExecutionRequest, ExitStatus, SPAWN_FAILURE_EXIT};
pub use runner::{CommandRunner, RetryPolicy, RunnerConfig, ShellSpec, quote_arg};
