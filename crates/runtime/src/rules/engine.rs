use std::sync::Arc;

use async_trait::async_trait;

use super::{RuleMatcher, RuleStore, RuleTierError};
use crate::types::{ContentRequest, Verdict};

/// The cheap, deterministic first tier.
#[async_trait]
pub trait RuleTier: Send + Sync {
    async fn scan(&self, request: &ContentRequest) -> Result<Verdict, RuleTierError>;
}

/// [`RuleTier`] backed by a live [`RuleStore`].
pub struct RuleEngine {
    store: Arc<RuleStore>,
    matcher: RuleMatcher,
}

impl RuleEngine {
    pub fn new(store: Arc<RuleStore>, matcher: RuleMatcher) -> Self {
        Self { store, matcher }
    }

    pub fn store(&self) -> &Arc<RuleStore> {
        &self.store
    }
}

#[async_trait]
impl RuleTier for RuleEngine {
    async fn scan(&self, request: &ContentRequest) -> Result<Verdict, RuleTierError> {
        let snapshot = self.store.snapshot().ok_or(RuleTierError::NoSnapshot)?;
        let verdict = self
            .matcher
            .match_content(request.request_id, &request.content, &snapshot);
        tracing::debug!(
            request_id = %request.request_id,
            generation = snapshot.generation(),
            action = %verdict.action,
            "Rule tier scanned content"
        );
        Ok(verdict)
    }
}
