//! Engine Error Taxonomy
//!
//! Five classes with distinct propagation rules:
//! - `Validation` / conflicts surface synchronously to the caller, no state mutated
//! - `TransientExternal` is retried with bounded backoff
//! - `PermanentExternal` is logged and dropped
//! - `Configuration` fails fast at construction, never per-candidate

use uuid::Uuid;

use crate::request::RequestState;

/// Errors that can occur in the lifecycle engine
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// Caller supplied an illegal transition input (e.g. rejecting without a reason)
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Request state changed since it was read; caller must re-read and retry or abandon
    #[error("State conflict on request {request_id}: expected {expected}, found {actual}")]
    RequestConflict {
        request_id: Uuid,
        expected: RequestState,
        actual: RequestState,
    },

    /// Illegal recommendation cycle transition
    #[error("Recommendation cycle conflict for case {case_id}: {reason}")]
    CycleConflict { case_id: Uuid, reason: String },

    #[error("Not found: {0}")]
    NotFound(String),

    /// Dependency unreachable or timed out; safe to retry
    #[error("Transient external failure: {0}")]
    TransientExternal(String),

    /// Dependency rejected the call outright; log and drop
    #[error("Permanent external failure: {0}")]
    PermanentExternal(String),

    /// Missing or invalid policy; detected at startup/job-init
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl LifecycleError {
    /// Whether the caller may retry the failed call as-is
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientExternal(_))
    }
}
