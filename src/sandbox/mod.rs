//! Host-side sandbox: runs untrusted code in a fresh, locked-down
//! container instance per call.
//!
//! The security model is layered:
//!
//! 1. Input validation: size, ranges, package identifiers (`validate`)
//! 2. Allow-list: packages must be pre-approved by the operator
//! 3. Isolation policy: no network, read-only root, dropped capabilities,
//!    memory/CPU/PID ceilings, non-root user (`policy`)
//! 4. Host supervision: wall-clock timeout, bounded capture, forced
//!    removal of every instance (`executor`)
//! 5. Entrypoint: in-instance timeout and hard output caps (`crate::entrypoint`)

pub mod executor;
pub mod normalize;
pub mod policy;
pub mod runtime;
pub mod types;
pub mod validate;

pub use executor::SandboxExecutor;
pub use types::{ErrorKind, ExecutionRequest, ExecutionResult, RunningExecution};
pub use validate::Rejection;
