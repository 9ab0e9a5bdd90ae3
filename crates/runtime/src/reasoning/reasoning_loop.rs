//! Reasoning loop driver
//!
//! A bounded REASON/ACT/DONE state machine. Each REASON step is one model
//! call; each ACT step answers every tool call the model just made. The loop
//! ends when the model answers with text, or is forced to a review verdict
//! once `max_rounds` REASON steps have been spent.

use std::sync::Arc;

use async_trait::async_trait;

use super::conversation::{AgentMessage, Transcript};
use super::inference::{InferenceOptions, InferenceProvider, ToolCallRequest, Usage};
use super::loop_types::*;
use super::tools::{ModerationTool, ToolDispatcher};
use super::verdict_parser::verdict_from_text;
use crate::types::{ContentRequest, Verdict, VerdictSource};

/// System instruction seeding every transcript.
pub const MODERATION_INSTRUCTION: &str = "You are a content safety reviewer. \
Decide whether the user's content should be allowed, blocked, or sent to human review. \
You may call search_similar_cases to look up how similar content was judged before, \
and check_sensitive_entities to look for sensitive named entities. \
When you are done, answer with only a JSON object of the form \
{\"action\": \"allow\" | \"block\" | \"review\", \"reason\": \"<short explanation>\"}.";

/// The expensive second tier.
#[async_trait]
pub trait ReasoningTier: Send + Sync {
    /// Produce a verdict, or fail with an infrastructure error.
    async fn assess(&self, request: &ContentRequest) -> Result<Verdict, ReasoningError>;
}

pub struct ReasoningLoop {
    provider: Arc<dyn InferenceProvider>,
    tools: ToolDispatcher,
    config: LoopConfig,
    options: InferenceOptions,
}

impl ReasoningLoop {
    pub fn new(provider: Arc<dyn InferenceProvider>, tools: ToolDispatcher, config: LoopConfig) -> Self {
        let mut options = config.inference.clone();
        options.tool_definitions = ModerationTool::definitions();
        Self {
            provider,
            tools,
            config,
            options,
        }
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Run the loop for one request.
    #[tracing::instrument(
        name = "reasoning_loop",
        skip_all,
        fields(request_id = %request.request_id, provider = self.provider.provider_name())
    )]
    pub async fn run(&self, request: &ContentRequest) -> Result<LoopOutcome, ReasoningError> {
        let mut transcript = Transcript::seeded(MODERATION_INSTRUCTION, request.content.as_str());
        let mut usage = Usage::default();
        let mut rounds = 0u32;
        let mut tool_dispatches = 0u32;
        let mut phase = LoopPhase::Reason;

        loop {
            tracing::trace!(phase = phase.name(), rounds, "Loop step");
            phase = match phase {
                LoopPhase::Reason => {
                    if rounds >= self.config.max_rounds {
                        tracing::warn!(
                            request_id = %request.request_id,
                            max_rounds = self.config.max_rounds,
                            "Reasoning round cap reached; forcing review"
                        );
                        let verdict = Verdict::review(
                            request.request_id,
                            format!(
                                "reasoning stopped after reaching the cap of {} rounds without a decision",
                                self.config.max_rounds
                            ),
                            VerdictSource::ReasoningTier,
                        );
                        return Ok(LoopOutcome {
                            verdict,
                            rounds,
                            tool_dispatches,
                            termination: Termination::RoundCap,
                            usage,
                            transcript,
                        });
                    }
                    rounds += 1;

                    let response = tokio::time::timeout(
                        self.config.model_timeout,
                        self.provider.complete(&transcript, &self.options),
                    )
                    .await
                    .map_err(|_| ReasoningError::ModelTimeout(self.config.model_timeout))??;
                    usage.accumulate(&response.usage);

                    if response.has_tool_calls() {
                        transcript.push(AgentMessage::assistant_tool_calls(
                            response.content,
                            response.tool_calls.clone(),
                        ));
                        LoopPhase::Act(response.tool_calls)
                    } else {
                        transcript.push(AgentMessage::assistant(response.content.as_str()));
                        LoopPhase::Done(response.content)
                    }
                }
                LoopPhase::Act(calls) => {
                    for call in &calls {
                        let result = self.execute(call).await?;
                        transcript.push(AgentMessage::tool_result(call.id.as_str(), result));
                        tool_dispatches += 1;
                    }
                    LoopPhase::Reason
                }
                LoopPhase::Done(text) => {
                    let (verdict, parsed) = verdict_from_text(request.request_id, &text);
                    return Ok(LoopOutcome {
                        verdict,
                        rounds,
                        tool_dispatches,
                        termination: if parsed {
                            Termination::Completed
                        } else {
                            Termination::ParseFailure
                        },
                        usage,
                        transcript,
                    });
                }
            };
        }
    }

    /// Answer one tool call. Model mistakes become the tool result; service
    /// failures abort the loop.
    async fn execute(&self, call: &ToolCallRequest) -> Result<String, ReasoningError> {
        let tool = match ModerationTool::parse(call) {
            Ok(tool) => tool,
            Err(e) => {
                tracing::debug!(call_id = %call.id, error = %e, "Rejected tool call");
                return Ok(format!("error: {}", e));
            }
        };

        let name = tool.name();
        let output = tokio::time::timeout(self.config.tool_timeout, self.tools.dispatch(&tool))
            .await
            .map_err(|_| ReasoningError::ToolTimeout {
                tool: name,
                timeout: self.config.tool_timeout,
            })?
            .map_err(|source| ReasoningError::Tool { tool: name, source })?;

        Ok(output.render())
    }
}

#[async_trait]
impl ReasoningTier for ReasoningLoop {
    async fn assess(&self, request: &ContentRequest) -> Result<Verdict, ReasoningError> {
        let outcome = self.run(request).await?;
        tracing::info!(
            request_id = %request.request_id,
            rounds = outcome.rounds,
            tool_dispatches = outcome.tool_dispatches,
            termination = ?outcome.termination,
            total_tokens = outcome.usage.total_tokens,
            action = %outcome.verdict.action,
            "Reasoning tier finished"
        );
        Ok(outcome.verdict)
    }
}
