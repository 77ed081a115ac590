//! Sandboxed JavaScript execution for agent tool calls.
//!
//! The host side (`sandbox`, `skills`) validates a call, runs it in a
//! fresh container instance and normalizes the outcome. The `entrypoint`
//! module is what runs inside each instance.

pub mod config;
pub mod entrypoint;
pub mod sandbox;
pub mod signal;
pub mod skills;
