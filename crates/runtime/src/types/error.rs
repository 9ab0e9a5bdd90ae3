//! Caller-facing error types for the moderation runtime

use thiserror::Error;

use super::RequestId;
use crate::audit::AuditError;
use crate::config::ConfigError;
use crate::reasoning::InferenceError;
use crate::retrieval::RetrievalError;
use crate::rules::{RuleSourceError, RuleTierError};

/// Errors returned to a caller of the decision pipeline.
#[derive(Error, Debug)]
pub enum ModerationError {
    /// Rejected before any tier ran. Never audited.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The rule tier could not be consulted. Never audited.
    #[error("Rule tier unavailable: {0}")]
    RuleTier(#[from] RuleTierError),

    /// The reasoning tier failed for this item. Only surfaced per item in a
    /// batch; single submissions degrade to a review verdict instead.
    #[error("Reasoning tier failed for request {request_id}: {cause}")]
    ReasoningTier { request_id: RequestId, cause: String },
}

/// Errors raised while assembling the runtime from configuration.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Rule source error: {0}")]
    RuleSource(#[from] RuleSourceError),

    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),

    #[error("Case retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("Model provider error: {0}")]
    Inference(#[from] InferenceError),

    #[error("Invalid detector pattern: {0}")]
    Pattern(#[from] regex::Error),
}
