//! Durable audit storage.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::{AuditError, AuditEvent};
use crate::types::{Action, RequestId, VerdictSource};

const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;

/// Filters and paging for an audit query. Pages start at 1.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditQuery {
    pub user_id: Option<String>,
    pub action: Option<Action>,
    pub source: Option<VerdictSource>,
    pub page: u32,
    pub page_size: u32,
}

impl AuditQuery {
    fn page(&self) -> u32 {
        self.page.max(1)
    }

    fn page_size(&self) -> u32 {
        match self.page_size {
            0 => DEFAULT_PAGE_SIZE,
            n => n.min(MAX_PAGE_SIZE),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditPage {
    /// Matching records across all pages.
    pub total: u64,
    pub page: u32,
    /// Newest first.
    pub records: Vec<AuditEvent>,
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Persist `event` unless one with the same request id exists.
    /// Returns whether a row was written.
    async fn insert_if_absent(&self, event: &AuditEvent) -> Result<bool, AuditError>;

    async fn get(&self, request_id: RequestId) -> Result<Option<AuditEvent>, AuditError>;

    async fn query(&self, query: &AuditQuery) -> Result<AuditPage, AuditError>;
}

/// SQLite-backed audit log.
pub struct SqliteAuditStore {
    conn: tokio::sync::Mutex<rusqlite::Connection>,
}

impl SqliteAuditStore {
    pub fn open(path: &std::path::Path) -> Result<Self, AuditError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AuditError::Sqlite(format!("create dir: {e}")))?;
        }
        let conn = rusqlite::Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: tokio::sync::Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, AuditError> {
        let conn = rusqlite::Connection::open_in_memory()?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: tokio::sync::Mutex::new(conn),
        })
    }

    /// Default database path: `$XDG_DATA_HOME/safeflow/audit.db`
    pub fn default_path() -> std::path::PathBuf {
        let base = dirs::data_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
        base.join("safeflow").join("audit.db")
    }

    fn init_schema(conn: &rusqlite::Connection) -> Result<(), AuditError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS audit_logs (
                request_id  TEXT PRIMARY KEY,
                user_id     TEXT,
                action      TEXT NOT NULL,
                reason      TEXT NOT NULL,
                source      TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_audit_user ON audit_logs(user_id);
            CREATE INDEX IF NOT EXISTS idx_audit_created ON audit_logs(created_at DESC);",
        )?;
        Ok(())
    }
}

#[async_trait]
impl AuditStore for SqliteAuditStore {
    async fn insert_if_absent(&self, event: &AuditEvent) -> Result<bool, AuditError> {
        // Fixed-width timestamps keep ORDER BY created_at chronological.
        let conn = self.conn.lock().await;
        let written = conn.execute(
            "INSERT OR IGNORE INTO audit_logs
                (request_id, user_id, action, reason, source, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                event.request_id.to_string(),
                event.user_id,
                event.action.as_str(),
                event.reason,
                event.source.as_str(),
                event.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
            ],
        )?;
        Ok(written > 0)
    }

    async fn get(&self, request_id: RequestId) -> Result<Option<AuditEvent>, AuditError> {
        let conn = self.conn.lock().await;
        let raw = conn
            .query_row(
                "SELECT request_id, user_id, action, reason, source, created_at
                 FROM audit_logs WHERE request_id = ?1",
                params![request_id.to_string()],
                row_to_raw,
            )
            .optional()?;
        raw.map(RawAuditRow::into_event).transpose()
    }

    async fn query(&self, query: &AuditQuery) -> Result<AuditPage, AuditError> {
        let mut clauses = Vec::new();
        let mut args: Vec<String> = Vec::new();
        if let Some(user) = &query.user_id {
            args.push(user.clone());
            clauses.push(format!("user_id = ?{}", args.len()));
        }
        if let Some(action) = query.action {
            args.push(action.as_str().to_string());
            clauses.push(format!("action = ?{}", args.len()));
        }
        if let Some(source) = query.source {
            args.push(source.as_str().to_string());
            clauses.push(format!("source = ?{}", args.len()));
        }
        let filter = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let page = query.page();
        let page_size = query.page_size();
        let offset = (page as u64 - 1) * page_size as u64;

        let conn = self.conn.lock().await;
        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM audit_logs{}", filter),
            params_from_iter(args.iter()),
            |row| row.get(0),
        )?;

        let sql = format!(
            "SELECT request_id, user_id, action, reason, source, created_at
             FROM audit_logs{}
             ORDER BY created_at DESC, rowid DESC
             LIMIT {} OFFSET {}",
            filter, page_size, offset
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), row_to_raw)?;

        let mut records = Vec::new();
        for raw in rows {
            records.push(raw?.into_event()?);
        }

        Ok(AuditPage {
            total: total as u64,
            page,
            records,
        })
    }
}

struct RawAuditRow {
    request_id: String,
    user_id: Option<String>,
    action: String,
    reason: String,
    source: String,
    created_at: String,
}

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawAuditRow> {
    Ok(RawAuditRow {
        request_id: row.get(0)?,
        user_id: row.get(1)?,
        action: row.get(2)?,
        reason: row.get(3)?,
        source: row.get(4)?,
        created_at: row.get(5)?,
    })
}

impl RawAuditRow {
    fn into_event(self) -> Result<AuditEvent, AuditError> {
        let corrupt = |field: &str, e: String| {
            AuditError::Sqlite(format!("corrupt audit row {}: {}: {}", self.request_id, field, e))
        };
        Ok(AuditEvent {
            request_id: self
                .request_id
                .parse()
                .map_err(|e: uuid::Error| corrupt("request_id", e.to_string()))?,
            user_id: self.user_id.clone(),
            action: self.action.parse().map_err(|e| corrupt("action", e))?,
            reason: self.reason.clone(),
            source: self.source.parse().map_err(|e| corrupt("source", e))?,
            timestamp: DateTime::parse_from_rfc3339(&self.created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| corrupt("created_at", e.to_string()))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Verdict;

    fn event(action: Action, source: VerdictSource, user: Option<&str>) -> AuditEvent {
        let verdict = Verdict::new(RequestId::new(), action, "r", source);
        AuditEvent::from_verdict(&verdict, user.map(String::from))
    }

    #[tokio::test]
    async fn duplicate_request_id_is_ignored() {
        let store = SqliteAuditStore::open_in_memory().unwrap();
        let first = event(Action::Block, VerdictSource::RuleTier, Some("u1"));
        assert!(store.insert_if_absent(&first).await.unwrap());

        let mut replay = first.clone();
        replay.reason = "changed".into();
        assert!(!store.insert_if_absent(&replay).await.unwrap());

        let stored = store.get(first.request_id).await.unwrap().unwrap();
        assert_eq!(stored.reason, "r");
        assert_eq!(stored.user_id.as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn get_missing_is_none() {
        let store = SqliteAuditStore::open_in_memory().unwrap();
        assert!(store.get(RequestId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn query_filters_and_pages() {
        let store = SqliteAuditStore::open_in_memory().unwrap();
        for _ in 0..3 {
            store
                .insert_if_absent(&event(Action::Block, VerdictSource::RuleTier, Some("alice")))
                .await
                .unwrap();
        }
        store
            .insert_if_absent(&event(Action::Review, VerdictSource::Gateway, Some("alice")))
            .await
            .unwrap();
        store
            .insert_if_absent(&event(Action::Allow, VerdictSource::ReasoningTier, None))
            .await
            .unwrap();

        let all = store.query(&AuditQuery::default()).await.unwrap();
        assert_eq!(all.total, 5);
        assert_eq!(all.page, 1);
        assert_eq!(all.records.len(), 5);

        let alice_blocks = store
            .query(&AuditQuery {
                user_id: Some("alice".into()),
                action: Some(Action::Block),
                page: 2,
                page_size: 2,
                ..AuditQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(alice_blocks.total, 3);
        assert_eq!(alice_blocks.records.len(), 1);

        let gateway = store
            .query(&AuditQuery {
                source: Some(VerdictSource::Gateway),
                ..AuditQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(gateway.total, 1);
        assert_eq!(gateway.records[0].action, Action::Review);
    }

    #[tokio::test]
    async fn records_persist_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.db");
        let e = event(Action::Allow, VerdictSource::ReasoningTier, None);
        {
            let store = SqliteAuditStore::open(&path).unwrap();
            store.insert_if_absent(&e).await.unwrap();
        }
        let store = SqliteAuditStore::open(&path).unwrap();
        assert_eq!(store.get(e.request_id).await.unwrap(), Some(e));
    }
}
