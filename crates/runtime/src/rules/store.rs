//! Hot-reloadable rule snapshot.
//!
//! A [`RuleStore`] owns one [`ArcSwapOption<RuleSnapshot>`]. Refresh fetches
//! and compiles the new rule list entirely off to the side, then publishes it
//! with a single pointer swap. Readers load the current `Arc` and keep using
//! it for the whole scan, so a scan never sees a half-applied update.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use super::{Rule, RuleKind, RuleSource, RuleSourceError};

/// Rule store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleStoreConfig {
    /// How often the background task re-reads the rule source.
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Duration,
    /// Deadline for a single fetch.
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,
}

impl Default for RuleStoreConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(60),
            fetch_timeout: Duration::from_secs(10),
        }
    }
}

/// The rule tier could not produce a verdict.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RuleTierError {
    #[error("no rule snapshot has been loaded yet")]
    NoSnapshot,
}

/// A rule with its pattern prepared for matching.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    rule: Rule,
    matcher: PatternMatcher,
}

#[derive(Debug, Clone)]
enum PatternMatcher {
    /// Lowercased keyword.
    Keyword(String),
    Regex(Regex),
}

impl CompiledRule {
    pub fn compile(rule: Rule) -> Result<Self, regex::Error> {
        let matcher = match rule.kind {
            RuleKind::Keyword => PatternMatcher::Keyword(rule.pattern.to_lowercase()),
            RuleKind::Regex => PatternMatcher::Regex(Regex::new(&rule.pattern)?),
        };
        Ok(Self { rule, matcher })
    }

    /// `lowered` must be `content.to_lowercase()`.
    pub fn matches(&self, content: &str, lowered: &str) -> bool {
        match &self.matcher {
            // An empty keyword would match everything.
            PatternMatcher::Keyword(keyword) => !keyword.is_empty() && lowered.contains(keyword),
            PatternMatcher::Regex(re) => re.is_match(content),
        }
    }

    pub fn rule(&self) -> &Rule {
        &self.rule
    }
}

/// Immutable, fully compiled view of the enabled rule set.
#[derive(Debug)]
pub struct RuleSnapshot {
    generation: u64,
    loaded_at: DateTime<Utc>,
    rules: Vec<CompiledRule>,
}

impl RuleSnapshot {
    /// Compile a rule list into a snapshot.
    ///
    /// Disabled rules are dropped. Rules are stably sorted by priority
    /// descending so the source's insertion order breaks ties. A regex that
    /// fails to compile is skipped with a warning.
    pub fn compile(generation: u64, mut rules: Vec<Rule>) -> Self {
        rules.retain(|r| r.enabled);
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));

        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            let id = rule.id;
            match CompiledRule::compile(rule) {
                Ok(c) => compiled.push(c),
                Err(e) => {
                    tracing::warn!(rule_id = id, error = %e, "Skipping rule with invalid pattern");
                }
            }
        }

        Self {
            generation,
            loaded_at: Utc::now(),
            rules: compiled,
        }
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Holds the current rule snapshot and keeps it fresh.
pub struct RuleStore {
    source: Arc<dyn RuleSource>,
    snapshot: ArcSwapOption<RuleSnapshot>,
    generation: AtomicU64,
    config: RuleStoreConfig,
    is_running: AtomicBool,
    shutdown_notify: Notify,
}

impl RuleStore {
    /// Create a store with no snapshot. Call [`RuleStore::refresh`] before
    /// serving traffic.
    pub fn new(source: Arc<dyn RuleSource>, config: RuleStoreConfig) -> Self {
        Self {
            source,
            snapshot: ArcSwapOption::empty(),
            generation: AtomicU64::new(0),
            config,
            is_running: AtomicBool::new(false),
            shutdown_notify: Notify::new(),
        }
    }

    /// Fetch enabled rules and publish them as a new snapshot.
    ///
    /// On failure the previous snapshot stays in place and the error is
    /// returned for the caller to log.
    pub async fn refresh(&self) -> Result<Arc<RuleSnapshot>, RuleSourceError> {
        let rules = tokio::time::timeout(self.config.fetch_timeout, self.source.fetch_enabled_rules())
            .await
            .map_err(|_| RuleSourceError::Timeout(self.config.fetch_timeout))??;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let fetched = rules.len();
        let snapshot = Arc::new(RuleSnapshot::compile(generation, rules));

        self.snapshot.store(Some(snapshot.clone()));
        tracing::debug!(
            generation,
            fetched,
            active = snapshot.len(),
            source = self.source.source_name(),
            "Rule snapshot published"
        );
        Ok(snapshot)
    }

    /// The current snapshot, if one has been loaded.
    pub fn snapshot(&self) -> Option<Arc<RuleSnapshot>> {
        self.snapshot.load_full()
    }

    pub fn config(&self) -> &RuleStoreConfig {
        &self.config
    }

    /// Spawn the periodic refresh task.
    ///
    /// The first tick fires one interval from now; do the initial load with
    /// an explicit [`RuleStore::refresh`].
    pub fn start_refresh_loop(self: &Arc<Self>) -> JoinHandle<()> {
        self.is_running.store(true, Ordering::SeqCst);
        let store = Arc::clone(self);
        let period = self.config.refresh_interval;

        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if !store.is_running.load(Ordering::SeqCst) {
                            break;
                        }
                        if let Err(e) = store.refresh().await {
                            tracing::warn!(
                                error = %e,
                                generation = store.generation.load(Ordering::SeqCst),
                                "Rule refresh failed; keeping last-good snapshot"
                            );
                        }
                    }
                    _ = store.shutdown_notify.notified() => {
                        break;
                    }
                }
            }
            tracing::info!("Rule refresh loop stopped");
        })
    }

    /// Stop the refresh task. Safe to call more than once.
    pub fn shutdown(&self) {
        if self.is_running.swap(false, Ordering::SeqCst) {
            self.shutdown_notify.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{NewRule, RuleAction, StaticRuleSource};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct FlakySource {
        calls: AtomicUsize,
        fail_from: usize,
    }

    #[async_trait]
    impl RuleSource for FlakySource {
        async fn fetch_enabled_rules(&self) -> Result<Vec<Rule>, RuleSourceError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n >= self.fail_from {
                Err(RuleSourceError::Unavailable("database down".into()))
            } else {
                Ok(vec![NewRule::keyword("casino").into_rule(1)])
            }
        }
    }

    struct SlowSource;

    #[async_trait]
    impl RuleSource for SlowSource {
        async fn fetch_enabled_rules(&self) -> Result<Vec<Rule>, RuleSourceError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(vec![])
        }
    }

    fn quick_config() -> RuleStoreConfig {
        RuleStoreConfig {
            refresh_interval: Duration::from_millis(20),
            fetch_timeout: Duration::from_millis(50),
        }
    }

    #[test]
    fn compile_orders_and_skips_bad_regex() {
        let rules = vec![
            NewRule::keyword("first").into_rule(1),
            NewRule::regex("(unclosed").priority(100).into_rule(2),
            NewRule::keyword("second").into_rule(3),
            NewRule::keyword("top").priority(5).into_rule(4),
            NewRule::keyword("off").priority(50).enabled(false).into_rule(5),
        ];
        let snapshot = RuleSnapshot::compile(7, rules);
        let ids: Vec<_> = snapshot.rules().iter().map(|r| r.rule().id).collect();
        assert_eq!(ids, vec![4, 1, 3]);
        assert_eq!(snapshot.generation(), 7);
    }

    #[test]
    fn keyword_match_is_case_insensitive() {
        let rule = CompiledRule::compile(NewRule::keyword("Casino").into_rule(1)).unwrap();
        let content = "Visit our CASINO today";
        assert!(rule.matches(content, &content.to_lowercase()));

        let empty = CompiledRule::compile(NewRule::keyword("").into_rule(2)).unwrap();
        assert!(!empty.matches(content, &content.to_lowercase()));
    }

    #[tokio::test]
    async fn store_starts_empty_and_fills_on_refresh() {
        let source = Arc::new(StaticRuleSource::new(vec![NewRule::keyword("x").into_rule(1)]));
        let store = RuleStore::new(source, quick_config());
        assert!(store.snapshot().is_none());

        let snap = store.refresh().await.unwrap();
        assert_eq!(snap.generation(), 1);
        assert_eq!(store.snapshot().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_last_good_snapshot() {
        let source = Arc::new(FlakySource {
            calls: AtomicUsize::new(0),
            fail_from: 1,
        });
        let store = RuleStore::new(source, quick_config());
        store.refresh().await.unwrap();
        assert!(store.refresh().await.is_err());

        let snap = store.snapshot().unwrap();
        assert_eq!(snap.generation(), 1);
        assert_eq!(snap.rules()[0].rule().pattern, "casino");
    }

    #[tokio::test]
    async fn fetch_is_bounded_by_deadline() {
        let store = RuleStore::new(Arc::new(SlowSource), quick_config());
        let err = store.refresh().await.unwrap_err();
        assert!(matches!(err, RuleSourceError::Timeout(_)));
        assert!(store.snapshot().is_none());
    }

    #[tokio::test]
    async fn readers_keep_their_snapshot_across_a_swap() {
        let source = Arc::new(StaticRuleSource::new(vec![NewRule::keyword("casino").into_rule(1)]));
        let store = RuleStore::new(source.clone(), quick_config());
        store.refresh().await.unwrap();

        let held = store.snapshot().unwrap();
        source.replace(vec![NewRule::keyword("casino")
            .action(RuleAction::Allow)
            .into_rule(1)]);
        store.refresh().await.unwrap();

        assert_eq!(held.rules()[0].rule().action, RuleAction::Block);
        assert_eq!(
            store.snapshot().unwrap().rules()[0].rule().action,
            RuleAction::Allow
        );
    }

    #[tokio::test]
    async fn refresh_loop_picks_up_changes_and_stops() {
        let source = Arc::new(StaticRuleSource::new(vec![]));
        let store = Arc::new(RuleStore::new(source.clone(), quick_config()));
        store.refresh().await.unwrap();

        let handle = store.start_refresh_loop();
        source.replace(vec![NewRule::keyword("late").into_rule(1)]);

        let mut seen = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if store.snapshot().map(|s| s.len()) == Some(1) {
                seen = true;
                break;
            }
        }
        assert!(seen, "refresh loop never published the new rule");

        store.shutdown();
        store.shutdown();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("refresh loop did not stop")
            .unwrap();
    }
}
