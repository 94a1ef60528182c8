//! Verifier Execution Subsystem
//!
//! This module provides secure subprocess execution for the external
//! verifier binary.
//!
//! # Security Features
//!
//! - **Fixed command by default**: callers cannot pick what the verifier runs
//! - **Token allow-list**: caller-selected tokens may only use `A-Z a-z 0-9 . : _ -`
//! - **List Invocation**: commands are executed as lists, never through a shell
//! - **Timeout Enforcement**: every execution has a wall-clock budget, and the
//!   whole process group is killed when it expires
//! - **Explicit environment**: the child sees only the request-scoped variables
//!
//! # Architecture
//!
//! - `validator.rs`: probe policy and token validation
//! - `executor.rs`: subprocess execution with timeout handling
//! - `timeout.rs`: timeout values and resolution of caller overrides

mod executor;
mod timeout;
mod validator;

pub use executor::{
    is_executable, CommandSpec, ExecutionError, ExecutorConfig, ProcessLauncher, RawProbeResult,
    ToolExecutor,
};
pub use timeout::{ExecutionTimeout, TimeoutError, DEFAULT_TIMEOUT_SECS};
pub use validator::{is_safe_token, CommandValidationError, CommandValidator, ProbePolicy, SafeCommand};
