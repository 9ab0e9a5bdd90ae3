//! Reasoning tier
//!
//! A bounded agent loop that lets a generative model consult similar past
//! cases and an entity watchlist before deciding on content the rule tier
//! let through.

pub mod conversation;
pub mod inference;
pub mod loop_types;
pub mod providers;
pub mod reasoning_loop;
pub mod tools;
pub mod verdict_parser;

pub use conversation::{AgentMessage, MessageRole, Transcript};
pub use inference::{
    InferenceError, InferenceOptions, InferenceProvider, InferenceResponse, ToolCallRequest,
    ToolDefinition, Usage,
};
pub use loop_types::{LoopConfig, LoopOutcome, LoopPhase, ReasoningError, Termination};
pub use providers::OpenAiCompatibleProvider;
pub use reasoning_loop::{ReasoningLoop, ReasoningTier, MODERATION_INSTRUCTION};
pub use tools::{EntityWatchlist, ModerationTool, ToolDispatcher, ToolError, ToolOutput};
