//! Rule persistence boundary.
//!
//! The rule tier only ever asks one question of persistent storage: "give me
//! every enabled rule, highest priority first". Creating and editing rules is
//! the job of an external administrative process; the helpers on
//! [`SqliteRuleSource`] exist for seeding and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rusqlite::params;

use super::{default_rules, NewRule, Rule, RuleAction, RuleKind};

/// Abstract source of enabled rules.
#[async_trait]
pub trait RuleSource: Send + Sync {
    /// Fetch all enabled rules ordered by priority descending, oldest first
    /// within the same priority.
    async fn fetch_enabled_rules(&self) -> Result<Vec<Rule>, RuleSourceError>;

    /// Name used in log lines.
    fn source_name(&self) -> &str {
        "rule-source"
    }
}

/// Errors produced by a rule source.
#[derive(Debug, thiserror::Error)]
pub enum RuleSourceError {
    #[error("SQLite error: {0}")]
    Sqlite(String),
    #[error("Rule source unavailable: {0}")]
    Unavailable(String),
    #[error("Rule fetch timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("Corrupt rule row {id}: {reason}")]
    Corrupt { id: i64, reason: String },
}

impl From<rusqlite::Error> for RuleSourceError {
    fn from(e: rusqlite::Error) -> Self {
        RuleSourceError::Sqlite(e.to_string())
    }
}

/// In-memory rule source whose contents can be replaced at any time.
#[derive(Default)]
pub struct StaticRuleSource {
    rules: RwLock<Vec<Rule>>,
}

impl StaticRuleSource {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self {
            rules: RwLock::new(rules),
        }
    }

    /// Replace the stored rules; the next refresh picks them up.
    pub fn replace(&self, rules: Vec<Rule>) {
        *self.rules.write() = rules;
    }
}

#[async_trait]
impl RuleSource for StaticRuleSource {
    async fn fetch_enabled_rules(&self) -> Result<Vec<Rule>, RuleSourceError> {
        let mut rules: Vec<Rule> = self
            .rules
            .read()
            .iter()
            .filter(|r| r.enabled)
            .cloned()
            .collect();
        // Stable sort keeps insertion order for equal priorities.
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(rules)
    }

    fn source_name(&self) -> &str {
        "static"
    }
}

/// SQLite-backed rule source.
pub struct SqliteRuleSource {
    conn: tokio::sync::Mutex<rusqlite::Connection>,
}

impl SqliteRuleSource {
    /// Open (or create) the rule database at the given path.
    pub fn open(path: &std::path::Path) -> Result<Self, RuleSourceError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RuleSourceError::Sqlite(format!("create dir: {e}")))?;
        }
        let conn = rusqlite::Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: tokio::sync::Mutex::new(conn),
        })
    }

    /// Open an in-memory database (useful for tests).
    pub fn open_in_memory() -> Result<Self, RuleSourceError> {
        let conn = rusqlite::Connection::open_in_memory()?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: tokio::sync::Mutex::new(conn),
        })
    }

    /// Default database path: `$XDG_DATA_HOME/safeflow/rules.db`
    pub fn default_path() -> std::path::PathBuf {
        let base = dirs::data_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
        base.join("safeflow").join("rules.db")
    }

    fn init_schema(conn: &rusqlite::Connection) -> Result<(), RuleSourceError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS rules (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                pattern     TEXT NOT NULL,
                kind        TEXT NOT NULL,
                action      TEXT NOT NULL DEFAULT 'block',
                rule_group  TEXT NOT NULL DEFAULT 'default',
                priority    INTEGER NOT NULL DEFAULT 0,
                enabled     INTEGER NOT NULL DEFAULT 1,
                description TEXT NOT NULL DEFAULT '',
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_rules_enabled_priority
                ON rules(enabled, priority DESC);",
        )?;
        Ok(())
    }

    /// Insert a rule and return it with its assigned id.
    pub async fn insert_rule(&self, rule: NewRule) -> Result<Rule, RuleSourceError> {
        let conn = self.conn.lock().await;
        let now = Utc::now();
        conn.execute(
            "INSERT INTO rules
                (pattern, kind, action, rule_group, priority, enabled, description, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                rule.pattern,
                rule.kind.as_str(),
                rule.action.as_str(),
                rule.group,
                rule.priority,
                rule.enabled,
                rule.description,
                now.to_rfc3339(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        let mut stored = rule.into_rule(id);
        stored.created_at = now;
        stored.updated_at = now;
        Ok(stored)
    }

    /// Enable or disable a rule. Returns false if no such rule exists.
    pub async fn set_enabled(&self, id: i64, enabled: bool) -> Result<bool, RuleSourceError> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE rules SET enabled = ?1, updated_at = ?2 WHERE id = ?3",
            params![enabled, Utc::now().to_rfc3339(), id],
        )?;
        Ok(changed > 0)
    }

    /// Install the default rule set if the table is empty.
    ///
    /// Returns the number of rules inserted.
    pub async fn seed_defaults(&self) -> Result<usize, RuleSourceError> {
        if self.count().await? > 0 {
            return Ok(0);
        }
        let defaults = default_rules();
        let inserted = defaults.len();
        for rule in defaults {
            self.insert_rule(rule).await?;
        }
        tracing::info!("Seeded {} default rules", inserted);
        Ok(inserted)
    }

    /// Number of stored rules, enabled or not.
    pub async fn count(&self) -> Result<usize, RuleSourceError> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM rules", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// All stored rules, enabled or not, in evaluation order.
    pub async fn list_rules(&self) -> Result<Vec<Rule>, RuleSourceError> {
        self.query_rules(false).await
    }

    async fn query_rules(&self, enabled_only: bool) -> Result<Vec<Rule>, RuleSourceError> {
        let conn = self.conn.lock().await;
        let sql = if enabled_only {
            "SELECT id, pattern, kind, action, rule_group, priority, enabled, description, created_at, updated_at
             FROM rules WHERE enabled = 1 ORDER BY priority DESC, id ASC"
        } else {
            "SELECT id, pattern, kind, action, rule_group, priority, enabled, description, created_at, updated_at
             FROM rules ORDER BY priority DESC, id ASC"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| {
            Ok(RawRule {
                id: row.get(0)?,
                pattern: row.get(1)?,
                kind: row.get(2)?,
                action: row.get(3)?,
                group: row.get(4)?,
                priority: row.get(5)?,
                enabled: row.get(6)?,
                description: row.get(7)?,
                created_at: row.get(8)?,
                updated_at: row.get(9)?,
            })
        })?;

        let mut rules = Vec::new();
        for raw in rows {
            rules.push(raw?.into_rule()?);
        }
        Ok(rules)
    }
}

#[async_trait]
impl RuleSource for SqliteRuleSource {
    async fn fetch_enabled_rules(&self) -> Result<Vec<Rule>, RuleSourceError> {
        self.query_rules(true).await
    }

    fn source_name(&self) -> &str {
        "sqlite"
    }
}

struct RawRule {
    id: i64,
    pattern: String,
    kind: String,
    action: String,
    group: String,
    priority: i32,
    enabled: bool,
    description: String,
    created_at: String,
    updated_at: String,
}

impl RawRule {
    fn into_rule(self) -> Result<Rule, RuleSourceError> {
        let id = self.id;
        let corrupt = |reason: String| RuleSourceError::Corrupt { id, reason };
        Ok(Rule {
            id,
            kind: self.kind.parse::<RuleKind>().map_err(corrupt)?,
            action: self.action.parse::<RuleAction>().map_err(corrupt)?,
            created_at: parse_timestamp(&self.created_at).map_err(corrupt)?,
            updated_at: parse_timestamp(&self.updated_at).map_err(corrupt)?,
            pattern: self.pattern,
            group: self.group,
            priority: self.priority,
            enabled: self.enabled,
            description: self.description,
        })
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp '{}': {}", raw, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fetch_orders_by_priority_then_insertion() {
        let source = SqliteRuleSource::open_in_memory().unwrap();
        source.insert_rule(NewRule::keyword("low")).await.unwrap();
        source
            .insert_rule(NewRule::keyword("high-a").priority(10))
            .await
            .unwrap();
        source
            .insert_rule(NewRule::keyword("high-b").priority(10))
            .await
            .unwrap();

        let rules = source.fetch_enabled_rules().await.unwrap();
        let patterns: Vec<_> = rules.iter().map(|r| r.pattern.as_str()).collect();
        assert_eq!(patterns, vec!["high-a", "high-b", "low"]);
    }

    #[tokio::test]
    async fn disabled_rules_are_not_fetched() {
        let source = SqliteRuleSource::open_in_memory().unwrap();
        let rule = source.insert_rule(NewRule::keyword("casino")).await.unwrap();
        source.insert_rule(NewRule::keyword("bomb")).await.unwrap();

        assert!(source.set_enabled(rule.id, false).await.unwrap());
        assert!(!source.set_enabled(9999, false).await.unwrap());

        let rules = source.fetch_enabled_rules().await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].pattern, "bomb");
        assert_eq!(source.list_rules().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn seed_defaults_only_fills_empty_table() {
        let source = SqliteRuleSource::open_in_memory().unwrap();
        assert_eq!(source.seed_defaults().await.unwrap(), 4);
        assert_eq!(source.seed_defaults().await.unwrap(), 0);
        assert_eq!(source.count().await.unwrap(), 4);

        let rules = source.fetch_enabled_rules().await.unwrap();
        assert!(rules
            .iter()
            .any(|r| r.pattern == "兼职" && r.kind == RuleKind::Keyword));
        assert!(rules.iter().any(|r| r.kind == RuleKind::Regex));
    }

    #[tokio::test]
    async fn rules_survive_reopen_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("rules.db");
        {
            let source = SqliteRuleSource::open(&path).unwrap();
            source
                .insert_rule(NewRule::regex(r"\d{4}").describe("digits"))
                .await
                .unwrap();
        }
        let source = SqliteRuleSource::open(&path).unwrap();
        let rules = source.fetch_enabled_rules().await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].description, "digits");
        assert_eq!(rules[0].action, RuleAction::Block);
    }

    #[tokio::test]
    async fn static_source_filters_and_sorts() {
        let source = StaticRuleSource::new(vec![
            NewRule::keyword("a").into_rule(1),
            NewRule::keyword("b").priority(5).into_rule(2),
            NewRule::keyword("c").enabled(false).into_rule(3),
        ]);
        let rules = source.fetch_enabled_rules().await.unwrap();
        let ids: Vec<_> = rules.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 1]);

        source.replace(vec![]);
        assert!(source.fetch_enabled_rules().await.unwrap().is_empty());
    }
}
