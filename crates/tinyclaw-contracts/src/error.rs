//! Runtime error types for the TinyClaw decision core.
//!
//! Authorization denials are NOT errors: they come back as a successful
//! `AuthDecision`. Errors are reserved for configuration faults, audit
//! persistence faults, and tool execution faults.

use thiserror::Error;

/// The unified error type for the TinyClaw crates.
#[derive(Debug, Error)]
pub enum TinyclawError {
    /// A routing or authorization table is malformed.
    ///
    /// Raised at load time only. A process that cannot load its tables must
    /// not start.
    #[error("configuration error: {reason}")]
    ConfigError { reason: String },

    /// The audit chain could not record an event.
    ///
    /// Fatal to the caller: a decision that cannot be audited cannot proceed.
    #[error("audit write failed: {reason}")]
    AuditWriteFailed { reason: String },

    /// A persisted audit chain failed verification when it was loaded.
    #[error("audit chain broken at index {index}: {reason}")]
    AuditChainBroken { index: usize, reason: String },

    /// An authorized tool ran and reported a failure.
    #[error("tool '{tool}' failed: {reason}")]
    ToolExecutionFailed { tool: String, reason: String },
}

/// Convenience alias used throughout the TinyClaw crates.
pub type TinyclawResult<T> = Result<T, TinyclawError>;
