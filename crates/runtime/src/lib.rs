//! SafeFlow moderation runtime
//!
//! A two-tier content moderation pipeline: a cheap rule tier over a hot-swapped
//! rule snapshot, then a bounded tool-using reasoning loop for anything the
//! rules did not block. Every verdict is published to an audit channel and
//! persisted idempotently by request id.

pub mod audit;
pub mod config;
pub mod orchestrator;
pub mod reasoning;
pub mod retrieval;
pub mod rules;
pub mod types;

pub use audit::{AuditEvent, AuditPage, AuditQuery, AuditSink, AuditStore, SqliteAuditStore};
pub use config::{Config, ConfigError};
pub use orchestrator::{BatchRequest, BatchResponse, DecisionOrchestrator, OrchestratorConfig};
pub use reasoning::{InferenceProvider, ReasoningLoop, ReasoningTier};
pub use retrieval::{CaseRetriever, InMemoryCaseIndex};
pub use rules::{RuleEngine, RuleSource, RuleStore, RuleTier, SqliteRuleSource};
pub use types::*;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use audit::{audit_channel, AuditSubscription, SinkStats};
use reasoning::{EntityWatchlist, OpenAiCompatibleProvider, ToolDispatcher};
use rules::RuleMatcher;

/// Backing services the runtime is wired from.
pub struct RuntimeComponents {
    pub rule_source: Arc<dyn RuleSource>,
    pub provider: Arc<dyn InferenceProvider>,
    pub retriever: Arc<dyn CaseRetriever>,
    pub audit_store: Arc<dyn AuditStore>,
}

impl RuntimeComponents {
    /// Open the SQLite databases, the case corpus and the model endpoint
    /// named in `config`. Seeds the default rules into an empty rule
    /// database when `rules.seed_defaults` is set.
    pub async fn from_config(config: &Config) -> Result<Self, RuntimeError> {
        let rules_path = config
            .rules
            .db_path
            .clone()
            .unwrap_or_else(SqliteRuleSource::default_path);
        let rule_source = SqliteRuleSource::open(&rules_path)?;
        if config.rules.seed_defaults {
            let seeded = rule_source.seed_defaults().await?;
            if seeded > 0 {
                tracing::info!(seeded, path = %rules_path.display(), "Installed default rules");
            }
        }

        let audit_path = config
            .audit
            .db_path
            .clone()
            .unwrap_or_else(SqliteAuditStore::default_path);
        let audit_store = SqliteAuditStore::open(&audit_path)?;

        let retriever = match &config.retrieval.cases_path {
            Some(path) => InMemoryCaseIndex::from_json_file(path)?,
            None => {
                tracing::warn!("No case corpus configured; similar-case search returns nothing");
                InMemoryCaseIndex::default()
            }
        };

        let provider = OpenAiCompatibleProvider::from_config(
            &config.reasoning.model,
            config.reasoning.model_timeout,
        )?;

        Ok(Self {
            rule_source: Arc::new(rule_source),
            provider: Arc::new(provider),
            retriever: Arc::new(retriever),
            audit_store: Arc::new(audit_store),
        })
    }
}

/// The assembled pipeline and its background tasks.
pub struct ModerationRuntime {
    pub rule_store: Arc<RuleStore>,
    pub orchestrator: Arc<DecisionOrchestrator>,
    pub audit_store: Arc<dyn AuditStore>,
    audit_sink: Arc<AuditSink>,
    subscription: Mutex<Option<AuditSubscription>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    config: Config,
}

impl ModerationRuntime {
    /// Build a runtime from configuration alone.
    pub async fn new(config: Config) -> Result<Self, RuntimeError> {
        config.validate()?;
        let components = RuntimeComponents::from_config(&config).await?;
        Self::with_components(config, components)
    }

    /// Wire the pipeline over caller-supplied services.
    pub fn with_components(
        config: Config,
        components: RuntimeComponents,
    ) -> Result<Self, RuntimeError> {
        let rule_store = Arc::new(RuleStore::new(
            components.rule_source,
            config.rule_store_config(),
        ));
        let matcher = RuleMatcher::new(&config.pii)?;
        let rule_tier = Arc::new(RuleEngine::new(rule_store.clone(), matcher));

        let tools = ToolDispatcher::new(
            components.retriever,
            EntityWatchlist::new(config.reasoning.entity_watchlist.iter()),
            config.reasoning.search_top_k,
        );
        let reasoning_tier = Arc::new(ReasoningLoop::new(
            components.provider,
            tools,
            config.loop_config(),
        ));

        let (publisher, subscription) = audit_channel(config.audit.channel_capacity);
        let orchestrator = Arc::new(DecisionOrchestrator::new(
            rule_tier,
            reasoning_tier,
            Arc::new(publisher),
            config.orchestrator_config(),
        ));

        Ok(Self {
            rule_store,
            orchestrator,
            audit_sink: Arc::new(AuditSink::new(components.audit_store.clone())),
            audit_store: components.audit_store,
            subscription: Mutex::new(Some(subscription)),
            tasks: Mutex::new(Vec::new()),
            config,
        })
    }

    /// Load the first rule snapshot, then start the refresh loop and the
    /// audit sink. Fails if the first snapshot cannot be loaded.
    pub async fn start(&self) -> Result<(), RuntimeError> {
        let snapshot = self.rule_store.refresh().await?;
        tracing::info!(
            rules = snapshot.len(),
            generation = snapshot.generation(),
            "Moderation runtime starting"
        );

        let mut tasks = self.tasks.lock();
        tasks.push(self.rule_store.start_refresh_loop());
        if let Some(subscription) = self.subscription.lock().take() {
            tasks.push(self.audit_sink.spawn(subscription));
        }
        Ok(())
    }

    /// Stop background tasks. Audit messages already queued are persisted
    /// before this returns.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down moderation runtime");
        self.rule_store.shutdown();
        self.audit_sink.shutdown();

        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Background task ended abnormally");
            }
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn audit_stats(&self) -> SinkStats {
        self.audit_sink.stats()
    }
}
