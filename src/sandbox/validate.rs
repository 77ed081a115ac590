//! Request and package validation.
//!
//! Pure predicates over the request and static lists; nothing here
//! spawns processes or touches the filesystem. The format and denylist
//! checks apply to every caller. The allow-list is a second, independent
//! gate supplied by the tool wrapper.

use std::collections::HashSet;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use super::types::{ErrorKind, ExecutionRequest, ToolInput};
use crate::config::LimitsConfig;

/// Module names that expose OS-level capabilities to the script.
/// Rejected even when an allow-list would admit them.
pub const DENIED_PACKAGES: &[&str] = &[
    "child_process",
    "fs",
    "net",
    "http",
    "https",
    "os",
    "process",
    "cluster",
    "worker_threads",
    "dgram",
    "dns",
    "tls",
    "crypto",
];

/// Why a request never reached an isolated instance.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    #[error("Input validation failed: {0}")]
    Malformed(String),

    #[error("Input validation failed: Code cannot be empty")]
    EmptyCode,

    #[error("Input validation failed: Code too large ({len} characters, limit is {max})")]
    CodeTooLarge { len: usize, max: usize },

    #[error("Input validation failed: timeoutMs must be between {min} and {max} (got {value})")]
    TimeoutOutOfRange { value: f64, min: u64, max: u64 },

    #[error("Input validation failed: memMb must be between {min} and {max} (got {value})")]
    MemoryOutOfRange { value: f64, min: u64, max: u64 },

    #[error("Invalid package name: {0}")]
    InvalidPackageName(String),

    #[error("Package not allowed: {0}")]
    DeniedPackage(String),

    #[error("Invalid package name format: {0}")]
    UnsafePackageName(String),

    #[error("Disallowed packages: {}", .0.join(", "))]
    NotAllowListed(Vec<String>),
}

impl Rejection {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Rejection::Malformed(_)
            | Rejection::EmptyCode
            | Rejection::CodeTooLarge { .. }
            | Rejection::TimeoutOutOfRange { .. }
            | Rejection::MemoryOutOfRange { .. } => ErrorKind::InvalidInput,
            Rejection::InvalidPackageName(_)
            | Rejection::DeniedPackage(_)
            | Rejection::UnsafePackageName(_)
            | Rejection::NotAllowListed(_) => ErrorKind::PackageRejected,
        }
    }
}

/// Deserializes raw tool parameters. Missing `code` or wrong field types
/// are `Malformed`.
pub fn parse_input(params: Value) -> Result<ToolInput, Rejection> {
    serde_json::from_value(params).map_err(|e| Rejection::Malformed(e.to_string()))
}

/// Range-checks a parsed input and fills in defaults.
///
/// Values outside the configured bounds are rejected, never clamped.
/// Package identifiers are not inspected here; see [`validate_packages`].
pub fn validate_input(
    input: ToolInput,
    limits: &LimitsConfig,
) -> Result<ExecutionRequest, Rejection> {
    if input.code.is_empty() {
        return Err(Rejection::EmptyCode);
    }

    let len = input.code.chars().count();
    if len > limits.max_code_chars {
        return Err(Rejection::CodeTooLarge {
            len,
            max: limits.max_code_chars,
        });
    }

    let timeout_ms = input
        .timeout_ms
        .unwrap_or(limits.default_timeout_ms as f64);
    if !in_range(timeout_ms, limits.min_timeout_ms, limits.max_timeout_ms) {
        return Err(Rejection::TimeoutOutOfRange {
            value: timeout_ms,
            min: limits.min_timeout_ms,
            max: limits.max_timeout_ms,
        });
    }

    let memory_mb = input.mem_mb.unwrap_or(limits.default_memory_mb as f64);
    if !in_range(memory_mb, limits.min_memory_mb, limits.max_memory_mb) {
        return Err(Rejection::MemoryOutOfRange {
            value: memory_mb,
            min: limits.min_memory_mb,
            max: limits.max_memory_mb,
        });
    }

    Ok(ExecutionRequest {
        code: input.code,
        packages: input.packages,
        timeout: Duration::from_millis(timeout_ms.round() as u64),
        memory_mb: memory_mb.round() as u64,
        allow_network: input.network.unwrap_or(false),
    })
}

/// Inclusive bounds check. NaN and infinities never pass.
fn in_range(value: f64, min: u64, max: u64) -> bool {
    value >= min as f64 && value <= max as f64
}

/// Returns true if every character is in `[A-Za-z0-9\-_.@/]` and the
/// name is non-empty.
pub fn is_valid_package_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@' | '/'))
}

/// Returns true if the identifier names a denylisted module, directly or
/// through a subpath (`fs/promises`).
pub fn is_denied_package(name: &str) -> bool {
    let root = name.split('/').next().unwrap_or(name);
    DENIED_PACKAGES.contains(&name) || DENIED_PACKAGES.contains(&root)
}

/// Checks a single package identifier against the format rules and the
/// denylist.
pub fn validate_package(name: &str) -> Result<(), Rejection> {
    if !is_valid_package_name(name) {
        return Err(Rejection::InvalidPackageName(name.to_string()));
    }
    if is_denied_package(name) {
        return Err(Rejection::DeniedPackage(name.to_string()));
    }
    // A leading dash would be read as an installer flag.
    if name.contains("..") || name.contains(';') || name.contains('|') || name.starts_with('-') {
        return Err(Rejection::UnsafePackageName(name.to_string()));
    }
    Ok(())
}

/// Stops at the first offending identifier.
pub fn validate_packages(packages: &[String]) -> Result<(), Rejection> {
    packages.iter().try_for_each(|pkg| validate_package(pkg))
}

/// Rejects every identifier absent from `allowed`, reporting all of them.
pub fn check_allow_list(packages: &[String], allowed: &HashSet<String>) -> Result<(), Rejection> {
    let disallowed: Vec<String> = packages
        .iter()
        .filter(|pkg| !allowed.contains(pkg.as_str()))
        .cloned()
        .collect();

    if disallowed.is_empty() {
        Ok(())
    } else {
        Err(Rejection::NotAllowListed(disallowed))
    }
}
