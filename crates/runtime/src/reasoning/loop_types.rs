//! Core types for the reasoning loop
//!
//! Configuration, the REASON/ACT/DONE phase machine, the outcome of a
//! finished loop and the infrastructure errors that abort one.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::conversation::Transcript;
use super::inference::{InferenceError, InferenceOptions, ToolCallRequest, Usage};
use super::tools::ToolError;
use crate::types::Verdict;

/// Configuration for a reasoning loop instance.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Maximum REASON steps before forced termination.
    pub max_rounds: u32,
    /// Deadline for each model call.
    pub model_timeout: Duration,
    /// Deadline for each tool dispatch.
    pub tool_timeout: Duration,
    /// Options passed on every model call. Tool definitions are filled in by
    /// the loop.
    pub inference: InferenceOptions,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_rounds: 6,
            model_timeout: Duration::from_secs(30),
            tool_timeout: Duration::from_secs(10),
            inference: InferenceOptions::default(),
        }
    }
}

/// Where the state machine is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopPhase {
    /// Call the model with the current transcript.
    Reason,
    /// Dispatch the requested tool calls, then go back to `Reason`.
    Act(Vec<ToolCallRequest>),
    /// The model produced final text.
    Done(String),
}

impl LoopPhase {
    pub fn name(&self) -> &'static str {
        match self {
            LoopPhase::Reason => "reason",
            LoopPhase::Act(_) => "act",
            LoopPhase::Done(_) => "done",
        }
    }
}

/// How a loop that produced a verdict got there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Final text parsed into a decision.
    Completed,
    /// Final text could not be parsed; verdict is review.
    ParseFailure,
    /// The round cap was hit; verdict is review.
    RoundCap,
}

/// The result of a loop that ran to a verdict.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub verdict: Verdict,
    /// REASON steps performed.
    pub rounds: u32,
    /// Individual tool calls answered.
    pub tool_dispatches: u32,
    pub termination: Termination,
    pub usage: Usage,
    pub transcript: Transcript,
}

/// Infrastructure failure inside the loop. The caller decides the fallback.
#[derive(Debug, thiserror::Error)]
pub enum ReasoningError {
    #[error("model call failed: {0}")]
    Inference(#[from] InferenceError),

    #[error("model call timed out after {0:?}")]
    ModelTimeout(Duration),

    #[error("tool {tool} failed: {source}")]
    Tool {
        tool: &'static str,
        #[source]
        source: ToolError,
    },

    #[error("tool {tool} timed out after {timeout:?}")]
    ToolTimeout { tool: &'static str, timeout: Duration },

    #[error("reasoning timed out after {0:?}")]
    Deadline(Duration),
}
