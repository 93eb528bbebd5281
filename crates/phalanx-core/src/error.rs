//! Error types for the Phalanx interceptor framework.
//!
//! The error taxonomy follows the chain's propagation policy:
//!
//! - **Configuration warnings** (unknown phase, duplicate interceptor id)
//!   are not errors at all — insertion is skipped and a diagnostic is
//!   logged, so they never appear here.
//! - **Suspension** is not an error either; it surfaces as an
//!   `Outcome::Suspend` tag and a paused chain.
//! - Everything that genuinely fails a run is a [`ChainError`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using [`ChainError`].
pub type ChainResult<T> = Result<T, ChainError>;

/// Standard error type for chain execution.
///
/// # Example
///
/// ```
/// use phalanx_core::{ChainError, ChainResult};
///
/// fn dispatch() -> ChainResult<()> {
///     Err(ChainError::fault(
///         Some("LedgerService#postEntry".to_string()),
///         anyhow::anyhow!("marshal failed"),
///     ))
/// }
///
/// let err = dispatch().unwrap_err();
/// assert!(err.to_string().contains("LedgerService#postEntry"));
/// ```
#[derive(Error, Debug)]
pub enum ChainError {
    /// An interceptor's `handle` raised an application fault.
    ///
    /// Raised from `do_intercept` after the chain has unwound and the fault
    /// observer (if any) has been notified. The description names the
    /// failing service/operation when the exchange can resolve them.
    #[error("Fault occurred while processing {}: {source}", .description.as_deref().unwrap_or("(unknown operation)"))]
    Fault {
        /// Human-readable description of the failing target, e.g.
        /// `"LedgerService#postEntry"`.
        description: Option<String>,
        /// The causing error.
        #[source]
        source: anyhow::Error,
    },

    /// An interceptor's `handle_fault` failed during unwind.
    ///
    /// Cleanup is best-effort: the unwind stops at the failing interceptor
    /// and no further cleanup is attempted.
    #[error("Unwind aborted at interceptor '{interceptor}': {source}")]
    UnwindFailed {
        /// The id (or phase, for anonymous interceptors) of the interceptor
        /// whose cleanup failed.
        interceptor: String,
        /// The cleanup error.
        #[source]
        source: anyhow::Error,
    },

    /// An operation the chain's state machine does not permit.
    ///
    /// Notably raised when something other than the designated
    /// service-invoker interceptor tries to redirect the chain's current
    /// message.
    #[error("Illegal chain state: {message}")]
    IllegalState {
        /// What was attempted and why it was rejected.
        message: String,
    },
}

impl ChainError {
    /// Creates a fault error.
    #[must_use]
    pub fn fault(description: Option<String>, source: anyhow::Error) -> Self {
        Self::Fault {
            description,
            source,
        }
    }

    /// Creates an unwind-failure error.
    #[must_use]
    pub fn unwind_failed(interceptor: impl Into<String>, source: anyhow::Error) -> Self {
        Self::UnwindFailed {
            interceptor: interceptor.into(),
            source,
        }
    }

    /// Creates an illegal-state error.
    #[must_use]
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState {
            message: message.into(),
        }
    }

    /// Returns `true` if this error is an application fault (as opposed to
    /// an unwind failure or state-machine misuse).
    #[must_use]
    pub const fn is_fault(&self) -> bool {
        matches!(self, Self::Fault { .. })
    }

    /// Converts this error to a serializable envelope for outward
    /// diagnostics.
    #[must_use]
    pub fn to_envelope(&self) -> FaultEnvelope {
        FaultEnvelope {
            code: match self {
                Self::Fault { .. } => "FAULT",
                Self::UnwindFailed { .. } => "UNWIND_FAILED",
                Self::IllegalState { .. } => "ILLEGAL_STATE",
            }
            .to_string(),
            message: self.to_string(),
            description: match self {
                Self::Fault { description, .. } => description.clone(),
                _ => None,
            },
        }
    }
}

/// Serializable fault envelope for outward diagnostic dispatch.
///
/// Fault observers that forward faults over a wire boundary can serialize
/// this instead of inventing their own shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultEnvelope {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// The failing service/operation, when resolvable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}
