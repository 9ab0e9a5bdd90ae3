//! Rule tier
//!
//! Rules are fetched from a [`RuleSource`], compiled into an immutable
//! [`RuleSnapshot`] and published through a [`RuleStore`] that swaps the
//! whole snapshot atomically on every refresh. The [`RuleMatcher`] is a pure
//! function over one snapshot.

pub mod engine;
pub mod matcher;
pub mod source;
pub mod store;
pub mod version;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use engine::{RuleEngine, RuleTier};
pub use matcher::{phone_pattern, PiiPolicy, RuleMatcher};
pub use source::{RuleSource, RuleSourceError, SqliteRuleSource, StaticRuleSource};
pub use store::{CompiledRule, RuleSnapshot, RuleStore, RuleStoreConfig, RuleTierError};
pub use version::PolicyVersion;

/// How a rule pattern is matched against content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    /// Case-insensitive substring containment.
    Keyword,
    /// Regular expression search over the raw content.
    Regex,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::Keyword => "keyword",
            RuleKind::Regex => "regex",
        }
    }
}

impl std::str::FromStr for RuleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keyword" => Ok(RuleKind::Keyword),
            "regex" => Ok(RuleKind::Regex),
            other => Err(format!("unknown rule kind '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Allow,
    Block,
}

impl RuleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleAction::Allow => "allow",
            RuleAction::Block => "block",
        }
    }
}

impl std::str::FromStr for RuleAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allow" => Ok(RuleAction::Allow),
            "block" => Ok(RuleAction::Block),
            other => Err(format!("unknown rule action '{}'", other)),
        }
    }
}

/// A persisted moderation rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: i64,
    pub pattern: String,
    #[serde(rename = "type")]
    pub kind: RuleKind,
    pub action: RuleAction,
    pub group: String,
    /// Higher priorities are evaluated first.
    pub priority: i32,
    pub enabled: bool,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A rule that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRule {
    pub pattern: String,
    pub kind: RuleKind,
    pub action: RuleAction,
    pub group: String,
    pub priority: i32,
    pub enabled: bool,
    pub description: String,
}

impl NewRule {
    /// A blocking keyword rule with priority 0.
    pub fn keyword(pattern: impl Into<String>) -> Self {
        Self::with_kind(pattern, RuleKind::Keyword)
    }

    /// A blocking regex rule with priority 0.
    pub fn regex(pattern: impl Into<String>) -> Self {
        Self::with_kind(pattern, RuleKind::Regex)
    }

    fn with_kind(pattern: impl Into<String>, kind: RuleKind) -> Self {
        Self {
            pattern: pattern.into(),
            kind,
            action: RuleAction::Block,
            group: "default".to_string(),
            priority: 0,
            enabled: true,
            description: String::new(),
        }
    }

    pub fn action(mut self, action: RuleAction) -> Self {
        self.action = action;
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Materialise the rule with an id and timestamps, without persisting it.
    pub fn into_rule(self, id: i64) -> Rule {
        let now = Utc::now();
        Rule {
            id,
            pattern: self.pattern,
            kind: self.kind,
            action: self.action,
            group: self.group,
            priority: self.priority,
            enabled: self.enabled,
            description: self.description,
            created_at: now,
            updated_at: now,
        }
    }
}

/// The rule set installed into an empty rule database.
pub fn default_rules() -> Vec<NewRule> {
    vec![
        NewRule::keyword("gambling")
            .group("gambling")
            .describe("Gambling keyword"),
        NewRule::keyword("兼职").group("spam").describe("兼职刷单"),
        NewRule::keyword("加微信").group("spam").describe("引流"),
        NewRule::regex(phone_pattern(11))
            .group("privacy")
            .describe("手机号"),
    ]
}
