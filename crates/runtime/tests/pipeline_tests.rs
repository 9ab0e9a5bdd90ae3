//! End-to-end tests for the moderation pipeline.
//!
//! The runtime is wired over in-memory SQLite stores and a scripted model so
//! that every tier runs for real except the network call.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use safeflow_runtime::audit::{AuditQuery, AuditStore};
use safeflow_runtime::reasoning::{
    InferenceError, InferenceOptions, InferenceProvider, InferenceResponse, MessageRole,
    ToolCallRequest, Transcript,
};
use safeflow_runtime::retrieval::{CaseRecord, InMemoryCaseIndex};
use safeflow_runtime::rules::{NewRule, RuleSource, RuleSourceError, Rule, SqliteRuleSource};
use safeflow_runtime::{
    Action, Config, ModerationError, ModerationRuntime, RuntimeComponents, RuntimeError,
    SqliteAuditStore, VerdictSource,
};

// ---------------------------------------------------------------------------
// Scripted model
// ---------------------------------------------------------------------------

type Script = dyn Fn(&str, &Transcript) -> Result<InferenceResponse, InferenceError> + Send + Sync;

/// Answers from a closure over (submitted content, transcript so far).
struct ScriptedProvider {
    calls: AtomicUsize,
    script: Box<Script>,
    /// Content containing the marker is answered only after the delay.
    slow_on: Option<(String, Duration)>,
    /// Submitted contents, in the order their answers were produced.
    answered: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    fn new<F>(script: F) -> Arc<Self>
    where
        F: Fn(&str, &Transcript) -> Result<InferenceResponse, InferenceError>
            + Send
            + Sync
            + 'static,
    {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            script: Box::new(script),
            slow_on: None,
            answered: Mutex::new(Vec::new()),
        })
    }

    fn slow_on<F>(marker: &str, delay: Duration, script: F) -> Arc<Self>
    where
        F: Fn(&str, &Transcript) -> Result<InferenceResponse, InferenceError>
            + Send
            + Sync
            + 'static,
    {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            script: Box::new(script),
            slow_on: Some((marker.to_string(), delay)),
            answered: Mutex::new(Vec::new()),
        })
    }

    fn answered(&self) -> Vec<String> {
        self.answered.lock().clone()
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceProvider for ScriptedProvider {
    async fn complete(
        &self,
        transcript: &Transcript,
        _options: &InferenceOptions,
    ) -> Result<InferenceResponse, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let content = transcript
            .messages()
            .iter()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        if let Some((marker, delay)) = &self.slow_on {
            if content.contains(marker.as_str()) {
                tokio::time::sleep(*delay).await;
            }
        }
        self.answered.lock().push(content.clone());
        (self.script)(&content, transcript)
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        "scripted-model"
    }
}

/// Rule source that is always down.
struct DownRuleSource;

#[async_trait]
impl RuleSource for DownRuleSource {
    async fn fetch_enabled_rules(&self) -> Result<Vec<Rule>, RuleSourceError> {
        Err(RuleSourceError::Unavailable("connection refused".into()))
    }
}

fn benign_model() -> Arc<ScriptedProvider> {
    ScriptedProvider::new(|_, _| {
        Ok(InferenceResponse::text(
            r#"{"action":"allow","reason":"benign"}"#,
        ))
    })
}

struct Harness {
    runtime: ModerationRuntime,
    rules: Arc<SqliteRuleSource>,
    audit: Arc<SqliteAuditStore>,
}

async fn harness(provider: Arc<ScriptedProvider>, cases: Vec<CaseRecord>) -> Harness {
    let rules = Arc::new(SqliteRuleSource::open_in_memory().unwrap());
    rules.seed_defaults().await.unwrap();
    let audit = Arc::new(SqliteAuditStore::open_in_memory().unwrap());

    let runtime = ModerationRuntime::with_components(
        Config::default(),
        RuntimeComponents {
            rule_source: rules.clone(),
            provider,
            retriever: Arc::new(InMemoryCaseIndex::new(cases)),
            audit_store: audit.clone(),
        },
    )
    .unwrap();
    runtime.start().await.unwrap();

    Harness {
        runtime,
        rules,
        audit,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rule_block_short_circuits_the_model() {
    let model = benign_model();
    let h = harness(model.clone(), vec![]).await;

    let verdict = h
        .runtime
        .orchestrator
        .submit("兼职刷单，加微信 123456", Some("u1".into()))
        .await
        .unwrap();

    assert_eq!(verdict.action, Action::Block);
    assert_eq!(verdict.source, VerdictSource::RuleTier);
    assert!(verdict.reason.contains("兼职"), "reason: {}", verdict.reason);
    assert_eq!(model.calls(), 0);

    h.runtime.shutdown().await;
}

#[tokio::test]
async fn clean_content_is_decided_by_the_model_and_audited() {
    let model = benign_model();
    let h = harness(model.clone(), vec![]).await;

    let verdict = h
        .runtime
        .orchestrator
        .submit("today is sunny", Some("u2".into()))
        .await
        .unwrap();
    assert_eq!(verdict.action, Action::Allow);
    assert_eq!(verdict.source, VerdictSource::ReasoningTier);
    assert_eq!(verdict.reason, "benign");
    assert_eq!(model.calls(), 1);

    h.runtime.shutdown().await;

    let stored = h.audit.get(verdict.request_id).await.unwrap().unwrap();
    assert_eq!(stored.action, Action::Allow);
    assert_eq!(stored.user_id.as_deref(), Some("u2"));
    assert_eq!(h.runtime.audit_stats().persisted, 1);
}

#[tokio::test]
async fn model_can_consult_similar_cases_before_deciding() {
    let model = ScriptedProvider::new(|_, transcript| {
        if transcript.tool_result_count() == 0 {
            return Ok(InferenceResponse::tool_calls(vec![ToolCallRequest {
                id: "call_1".into(),
                name: "search_similar_cases".into(),
                arguments: r#"{"keyword":"cheap pills online"}"#.into(),
            }]));
        }
        let result = transcript
            .messages()
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::Tool)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        if result.contains("block") {
            Ok(InferenceResponse::text(
                "```json\n{\"action\":\"block\",\"reason\":\"matches known spam\"}\n```",
            ))
        } else {
            Ok(InferenceResponse::text(r#"{"action":"allow","reason":"no precedent"}"#))
        }
    });
    let cases = vec![CaseRecord {
        text: "buy cheap pills online now".into(),
        label: "block".into(),
        category: "spam".into(),
    }];
    let h = harness(model.clone(), cases).await;

    let verdict = h
        .runtime
        .orchestrator
        .submit("cheap pills online, message me", None)
        .await
        .unwrap();

    assert_eq!(verdict.action, Action::Block);
    assert_eq!(verdict.source, VerdictSource::ReasoningTier);
    assert_eq!(verdict.reason, "matches known spam");
    assert_eq!(model.calls(), 2);

    h.runtime.shutdown().await;
}

#[tokio::test]
async fn model_failure_degrades_to_audited_review() {
    let model = ScriptedProvider::new(|_, _| {
        Err(InferenceError::Provider("upstream 502".into()))
    });
    let h = harness(model, vec![]).await;

    let verdict = h
        .runtime
        .orchestrator
        .submit("is this fine?", Some("u3".into()))
        .await
        .unwrap();
    assert_eq!(verdict.action, Action::Review);
    assert_eq!(verdict.source, VerdictSource::Gateway);

    h.runtime.shutdown().await;

    let page = h
        .audit
        .query(&AuditQuery {
            source: Some(VerdictSource::Gateway),
            ..AuditQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.records[0].request_id, verdict.request_id);
}

#[tokio::test]
async fn new_rules_apply_after_refresh() {
    let model = benign_model();
    let h = harness(model.clone(), vec![]).await;
    let orchestrator = h.runtime.orchestrator.clone();

    let before = orchestrator.submit("lottery tickets here", None).await.unwrap();
    assert_eq!(before.action, Action::Allow);
    let first_generation = h.runtime.rule_store.snapshot().unwrap().generation();

    h.rules
        .insert_rule(NewRule::keyword("lottery").priority(5).describe("lottery spam"))
        .await
        .unwrap();
    let snapshot = h.runtime.rule_store.refresh().await.unwrap();
    assert!(snapshot.generation() > first_generation);

    let after = orchestrator.submit("lottery tickets here", None).await.unwrap();
    assert_eq!(after.action, Action::Block);
    assert_eq!(after.source, VerdictSource::RuleTier);
    assert_eq!(model.calls(), 1);

    h.runtime.shutdown().await;
}

#[tokio::test]
async fn batch_results_follow_input_order() {
    let model = ScriptedProvider::slow_on("slow", Duration::from_millis(300), |content, _| {
        if content.contains("broken") {
            Err(InferenceError::ModelUnavailable("scripted".into()))
        } else {
            Ok(InferenceResponse::text(format!(
                r#"{{"action":"allow","reason":"fine: {}"}}"#,
                content
            )))
        }
    });
    let h = harness(model.clone(), vec![]).await;

    let results = h
        .runtime
        .orchestrator
        .submit_batch(
            vec![
                "slow hello".into(),
                "gambling den".into(),
                "   ".into(),
                "broken input".into(),
                "quick hello".into(),
            ],
            Some("batcher".into()),
        )
        .await;

    // The first item finished last, yet its result stays at index 0.
    let answered = model.answered();
    assert_eq!(answered.last().map(String::as_str), Some("slow hello"));
    assert_eq!(answered.len(), 3);

    assert_eq!(results.len(), 5);
    let first = results[0].as_ref().unwrap();
    assert_eq!(first.action, Action::Allow);
    assert_eq!(first.reason, "fine: slow hello");
    assert_eq!(results[1].as_ref().unwrap().action, Action::Block);
    assert!(matches!(results[2], Err(ModerationError::Validation(_))));
    assert!(matches!(results[3], Err(ModerationError::ReasoningTier { .. })));
    assert_eq!(results[4].as_ref().unwrap().reason, "fine: quick hello");

    h.runtime.shutdown().await;

    // The validation failure is never audited; the degraded item is.
    let page = h
        .audit
        .query(&AuditQuery {
            user_id: Some("batcher".into()),
            ..AuditQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(page.total, 4);
}

#[tokio::test]
async fn unreachable_rule_source_blocks_startup_and_requests() {
    let runtime = ModerationRuntime::with_components(
        Config::default(),
        RuntimeComponents {
            rule_source: Arc::new(DownRuleSource),
            provider: benign_model(),
            retriever: Arc::new(InMemoryCaseIndex::default()),
            audit_store: Arc::new(SqliteAuditStore::open_in_memory().unwrap()),
        },
    )
    .unwrap();

    let err = runtime.start().await.unwrap_err();
    assert!(matches!(err, RuntimeError::RuleSource(_)));

    let err = runtime
        .orchestrator
        .submit("anything", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ModerationError::RuleTier(_)));

    tokio::time::timeout(Duration::from_secs(2), runtime.shutdown())
        .await
        .expect("shutdown hung");
}
