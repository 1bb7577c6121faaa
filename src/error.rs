// Failure taxonomy for the request pipeline.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// The external fetch tool (or its working area) failed.
    #[error("fetch failed: {0}")]
    FetchFailure(String),

    /// The produced artifact does not carry this request's name.
    #[error("integrity violation: {path} does not match {expected}")]
    IntegrityViolation { path: String, expected: String },

    /// Retryable transport problem. Only seen inside the delivery loop.
    #[error("transient delivery failure: {0}")]
    DeliveryTransientFailure(String),

    #[error("delivery failed after {attempts} attempt(s): {reason}")]
    DeliveryTerminalFailure { attempts: u32, reason: String },

    #[error("gave up waiting {0:?} for in-flight fetch")]
    JoinTimeout(Duration),

    #[error("refund for charge {charge_reference} failed: {reason}")]
    CompensationFailure {
        charge_reference: String,
        reason: String,
    },

    /// Every fetch slot is taken.
    #[error("all {capacity} fetch slots are busy")]
    Busy { capacity: usize },

    #[error("engine is shutting down")]
    ShuttingDown,

    #[error("cache store error: {0}")]
    Store(String),
}

impl PipelineError {
    /// Short reason recorded against a refund.
    pub fn refund_reason(&self) -> &'static str {
        match self {
            PipelineError::FetchFailure(_) => "fetch failure",
            PipelineError::IntegrityViolation { .. } => "integrity violation",
            PipelineError::DeliveryTransientFailure(_)
            | PipelineError::DeliveryTerminalFailure { .. } => "delivery failure",
            PipelineError::JoinTimeout(_) => "join timeout",
            PipelineError::Busy { .. } => "busy",
            PipelineError::ShuttingDown => "shutting down",
            PipelineError::CompensationFailure { .. } | PipelineError::Store(_) => {
                "internal error"
            }
        }
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
