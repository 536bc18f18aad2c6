//! Error types for ztictl
//!
//! This module defines the error handling strategy for ztictl. There are two
//! error types: `SsmError` (main error enum) and `ConfigError` (configuration-specific).
//!
//! ## Error Handling Philosophy
//!
//! Library code uses `crate::error::Result<T>` which returns `SsmError`.
//! CLI code uses `anyhow::Result<T>` for top-level error handling. The conversion
//! happens at the CLI boundary using `anyhow::Error::from` to preserve error chains.
//!
//! This split exists because:
//! - Library code benefits from structured error types for programmatic handling
//! - CLI code benefits from `anyhow`'s context chains and user-friendly display
//! - Conversion preserves full error information (not just strings)
//!
//! ## Retry Awareness
//!
//! Errors implement `IsRetryable` to indicate whether an operation should be retried.
//! The `RetryPolicy` in `src/retry.rs` uses this to determine retry behavior.
//! Only `CloudProvider` and `Io` variants are retryable by default; credential
//! and validation failures never are.

use thiserror::Error;

/// Main error type for ztictl
#[derive(Error, Debug)]
pub enum SsmError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Transient AWS SDK failure (throttling, 5xx, DNS). Retryable.
    #[error("Cloud provider error: {service} - {message}")]
    CloudProvider {
        service: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Retry budget exhausted (attempt {attempt}/{max_attempts}): {reason}")]
    Retryable {
        attempt: u32,
        max_attempts: u32,
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Invalid argument: {field} - {reason}")]
    InvalidArgument { field: String, reason: String },

    #[error("Invalid region: {0}")]
    InvalidRegion(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Missing dependency: {0}")]
    DependencyMissing(String),

    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    #[error("Ambiguous instance identifier '{identifier}' matched {count} instances")]
    AmbiguousInstance { identifier: String, count: usize },

    #[error("Could not determine platform for instance {0}")]
    PlatformUnknown(String),

    #[error("Command failed on {instance_id} (exit code {exit_code:?}): {stderr}")]
    Command {
        instance_id: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Object store error: {0}")]
    ObjectStore(String),

    #[error("Failed to attach IAM policy: {0}")]
    PolicyAttach(String),

    #[error("Verification mismatch: expected {expected} bytes, got {actual} bytes")]
    VerificationMismatch { expected: u64, actual: u64 },

    #[error("Cleanup warning: {0}")]
    CleanupWarning(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Failed to parse config: {0}")]
    ParseError(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, SsmError>;

/// Trait for determining if an error is retryable
///
/// Used by `RetryPolicy` implementations to determine whether an error
/// should trigger a retry attempt.
///
/// This trait is actively used by `src/retry.rs` - do not mark as dead_code.
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for SsmError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            SsmError::Retryable { .. } | SsmError::CloudProvider { .. } | SsmError::Io(_)
        )
    }
}
