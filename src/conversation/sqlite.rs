//! SQLite durable tier.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};

use super::store::ConversationStore;
use super::{now, validate_ids};
use crate::error::GatewayError;
use crate::types::{ChatMessage, Role, Session, StoredMessage};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    last_activity_at TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    next_seq INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_sessions_owner ON sessions(owner_id, last_activity_at);

CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL REFERENCES sessions(id),
    role TEXT NOT NULL CHECK(role IN ('user', 'assistant', 'system')),
    content TEXT NOT NULL,
    sequence_no INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(session_id, sequence_no)
);
"#;

/// Durable tier backed by a SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteConversationStore {
    pool: SqlitePool,
}

impl SqliteConversationStore {
    /// Open (creating if missing) the database at `url` and initialize the
    /// schema.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, GatewayError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    /// A private in-memory database. Limited to one connection, since every
    /// SQLite connection to `:memory:` sees its own database.
    pub async fn in_memory() -> Result<Self, GatewayError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self, GatewayError> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), GatewayError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, GatewayError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| GatewayError::StoreUnavailable(format!("corrupt timestamp '{raw}': {e}")))
}

fn sequence_from(raw: i64) -> Result<u64, GatewayError> {
    u64::try_from(raw)
        .map_err(|_| GatewayError::StoreUnavailable(format!("corrupt sequence number {raw}")))
}

fn session_from_row(row: &SqliteRow) -> Result<Session, GatewayError> {
    Ok(Session {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
        last_activity_at: parse_ts(&row.try_get::<String, _>("last_activity_at")?)?,
        active: row.try_get::<i64, _>("active")? != 0,
    })
}

fn message_from_row(row: &SqliteRow) -> Result<StoredMessage, GatewayError> {
    let role: String = row.try_get("role")?;
    Ok(StoredMessage {
        session_id: row.try_get("session_id")?,
        role: role
            .parse::<Role>()
            .map_err(|e| GatewayError::StoreUnavailable(e.to_string()))?,
        content: row.try_get("content")?,
        sequence_no: sequence_from(row.try_get("sequence_no")?)?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
    })
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn append(
        &self,
        session_id: &str,
        owner_id: &str,
        message: &ChatMessage,
    ) -> Result<StoredMessage, GatewayError> {
        validate_ids(session_id, owner_id)?;
        let timestamp = now();
        let ts = format_ts(timestamp);

        // Write first, so the transaction holds the write lock from the start.
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO sessions (id, owner_id, created_at, last_activity_at, active, next_seq) \
             VALUES (?, ?, ?, ?, 1, 0) ON CONFLICT(id) DO NOTHING",
        )
        .bind(session_id)
        .bind(owner_id)
        .bind(&ts)
        .bind(&ts)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query("SELECT owner_id, active FROM sessions WHERE id = ?")
            .bind(session_id)
            .fetch_one(&mut *tx)
            .await?;
        let existing_owner: String = row.try_get("owner_id")?;
        if existing_owner != owner_id {
            return Err(GatewayError::InvalidInput(format!(
                "session '{session_id}' belongs to another owner"
            )));
        }
        if row.try_get::<i64, _>("active")? == 0 {
            return Err(GatewayError::SessionInactive(session_id.to_string()));
        }

        let sequence_no = sqlx::query_scalar::<_, i64>(
            "UPDATE sessions SET next_seq = next_seq + 1, last_activity_at = ? \
             WHERE id = ? RETURNING next_seq",
        )
        .bind(&ts)
        .bind(session_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO messages (session_id, role, content, sequence_no, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(sequence_no)
        .bind(&ts)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(StoredMessage {
            session_id: session_id.to_string(),
            role: message.role,
            content: message.content.clone(),
            sequence_no: sequence_from(sequence_no)?,
            created_at: timestamp,
        })
    }

    async fn recent(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, GatewayError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            "SELECT session_id, role, content, sequence_no, created_at FROM messages \
             WHERE session_id = ? ORDER BY sequence_no DESC LIMIT ?",
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut messages = rows
            .iter()
            .map(message_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }

    async fn session(&self, session_id: &str) -> Result<Option<Session>, GatewayError> {
        sqlx::query(
            "SELECT id, owner_id, created_at, last_activity_at, active FROM sessions WHERE id = ?",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(session_from_row)
        .transpose()
    }

    async fn sessions_for_owner(
        &self,
        owner_id: &str,
        include_inactive: bool,
    ) -> Result<Vec<Session>, GatewayError> {
        let rows = sqlx::query(
            "SELECT id, owner_id, created_at, last_activity_at, active FROM sessions \
             WHERE owner_id = ? AND (active = 1 OR ?) ORDER BY last_activity_at DESC",
        )
        .bind(owner_id)
        .bind(include_inactive)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(session_from_row).collect()
    }

    async fn deactivate(&self, session_id: &str) -> Result<bool, GatewayError> {
        let result = sqlx::query("UPDATE sessions SET active = 0 WHERE id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
