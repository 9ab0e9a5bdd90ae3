//! Decision orchestrator
//!
//! Runs the rule tier, then the reasoning tier for anything the rules did
//! not block, and emits exactly one audit event per request that reaches a
//! verdict. A reasoning-tier failure degrades to a review verdict from the
//! gateway instead of failing the request.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};

use crate::audit::{AuditEvent, AuditPublisher};
use crate::reasoning::{ReasoningError, ReasoningTier};
use crate::rules::RuleTier;
use crate::types::{ContentRequest, ModerationError, RequestId, Verdict, VerdictSource};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Deadline for the whole reasoning tier of one request.
    pub request_timeout: Duration,
    /// Deadline for handing one event to the audit channel.
    pub publish_timeout: Duration,
    /// Batch items processed at once.
    pub batch_concurrency: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(120),
            publish_timeout: Duration::from_secs(5),
            batch_concurrency: 8,
        }
    }
}

/// Batch submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub batch_id: String,
    pub contents: Vec<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// One entry per submitted content, in submission order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResponse {
    pub batch_id: String,
    pub results: Vec<BatchItemResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItemResult {
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct Decision {
    verdict: Verdict,
    /// Set when the verdict is a degraded substitute.
    reasoning_failure: Option<String>,
}

pub struct DecisionOrchestrator {
    rule_tier: Arc<dyn RuleTier>,
    reasoning_tier: Arc<dyn ReasoningTier>,
    publisher: Arc<dyn AuditPublisher>,
    config: OrchestratorConfig,
}

impl DecisionOrchestrator {
    pub fn new(
        rule_tier: Arc<dyn RuleTier>,
        reasoning_tier: Arc<dyn ReasoningTier>,
        publisher: Arc<dyn AuditPublisher>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            rule_tier,
            reasoning_tier,
            publisher,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Moderate one piece of content.
    ///
    /// Fails only on validation or when the rule tier is unreachable; a
    /// reasoning failure comes back as a review verdict.
    pub async fn submit(
        &self,
        content: impl Into<String>,
        user_id: Option<String>,
    ) -> Result<Verdict, ModerationError> {
        let request = ContentRequest::new(content, user_id)?;
        Ok(self.decide(&request).await?.verdict)
    }

    /// Moderate many contents. One result per input, in input order.
    ///
    /// An item whose reasoning tier failed is reported as
    /// [`ModerationError::ReasoningTier`]; its degraded verdict is still
    /// audited.
    pub async fn submit_batch(
        &self,
        contents: Vec<String>,
        user_id: Option<String>,
    ) -> Vec<Result<Verdict, ModerationError>> {
        let concurrency = self.config.batch_concurrency.max(1);
        stream::iter(contents.into_iter().map(|content| {
            let user_id = user_id.clone();
            async move { self.submit_item(content, user_id).await }
        }))
        .buffered(concurrency)
        .collect()
        .await
    }

    pub async fn handle_batch(&self, batch: BatchRequest) -> BatchResponse {
        tracing::info!(batch_id = %batch.batch_id, items = batch.contents.len(), "Batch received");
        let results = self
            .submit_batch(batch.contents, batch.user_id)
            .await
            .into_iter()
            .enumerate()
            .map(|(index, result)| match result {
                Ok(verdict) => BatchItemResult {
                    index,
                    verdict: Some(verdict),
                    error: None,
                },
                Err(e) => BatchItemResult {
                    index,
                    verdict: None,
                    error: Some(e.to_string()),
                },
            })
            .collect();
        BatchResponse {
            batch_id: batch.batch_id,
            results,
        }
    }

    async fn submit_item(
        &self,
        content: String,
        user_id: Option<String>,
    ) -> Result<Verdict, ModerationError> {
        let request = ContentRequest::new(content, user_id)?;
        let decision = self.decide(&request).await?;
        match decision.reasoning_failure {
            Some(cause) => Err(ModerationError::ReasoningTier {
                request_id: request.request_id,
                cause,
            }),
            None => Ok(decision.verdict),
        }
    }

    #[tracing::instrument(
        name = "submit",
        skip_all,
        fields(request_id = %request.request_id, content_len = request.content.len())
    )]
    async fn decide(&self, request: &ContentRequest) -> Result<Decision, ModerationError> {
        let rule_verdict = self.rule_tier.scan(request).await.map_err(|e| {
            tracing::error!(request_id = %request.request_id, error = %e, "Rule tier unreachable");
            ModerationError::RuleTier(e)
        })?;

        if rule_verdict.is_block() {
            tracing::info!(
                request_id = %request.request_id,
                reason = %rule_verdict.reason,
                "Blocked by rule tier"
            );
            self.emit(request, &rule_verdict).await;
            return Ok(Decision {
                verdict: rule_verdict,
                reasoning_failure: None,
            });
        }

        let assessed = tokio::time::timeout(
            self.config.request_timeout,
            self.reasoning_tier.assess(request),
        )
        .await
        .unwrap_or(Err(ReasoningError::Deadline(self.config.request_timeout)));

        let decision = match assessed {
            Ok(verdict) => Decision {
                verdict,
                reasoning_failure: None,
            },
            Err(e) => {
                let cause = e.to_string();
                tracing::warn!(
                    request_id = %request.request_id,
                    error = %cause,
                    "Reasoning tier failed; degrading to review"
                );
                Decision {
                    verdict: degraded_verdict(request.request_id, &cause),
                    reasoning_failure: Some(cause),
                }
            }
        };

        self.emit(request, &decision.verdict).await;
        Ok(decision)
    }

    /// Publish the audit event. Failure is logged and never fails the request.
    async fn emit(&self, request: &ContentRequest, verdict: &Verdict) {
        let event = AuditEvent::from_verdict(verdict, request.user_id.clone());
        let published = tokio::time::timeout(
            self.config.publish_timeout,
            self.publisher.publish(&event),
        )
        .await;

        match published {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(request_id = %request.request_id, error = %e, "Audit publish failed");
            }
            Err(_) => {
                tracing::warn!(
                    request_id = %request.request_id,
                    timeout = ?self.config.publish_timeout,
                    "Audit publish timed out"
                );
            }
        }
    }
}

fn degraded_verdict(request_id: RequestId, cause: &str) -> Verdict {
    Verdict::review(
        request_id,
        format!("reasoning tier unavailable: {}", cause),
        VerdictSource::Gateway,
    )
}
