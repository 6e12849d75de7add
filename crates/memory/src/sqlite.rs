//! SQLite conversation store.
//!
//! One append-only table:
//! - `turns` with an integer `seq` that records insertion order and a
//!   fixed-width RFC 3339 `timestamp` that sorts lexicographically.
//!
//! Writes go through a single writer lock and a transaction each, so
//! concurrent appends never interleave and a user/assistant pair lands
//! atomically. WAL mode lets readers proceed while a write is in flight.

use async_trait::async_trait;
use astrochat_core::error::StoreError;
use astrochat_core::message::{ConversationTurn, Role, TurnId};
use astrochat_core::store::{ConversationStore, TurnFilter};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// A durable SQLite-backed conversation store.
pub struct SqliteTurnStore {
    pool: SqlitePool,
    writer: Mutex<()>,
}

impl SqliteTurnStore {
    /// Open a store from a SQLite URL.
    ///
    /// The database and schema are created automatically.
    /// Pass `"sqlite::memory:"` for an ephemeral database (useful for tests).
    pub async fn new(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::Unavailable(format!("Invalid SQLite path: {e}")))?;
        // Every connection to ":memory:" is its own database
        let in_memory = url.contains(":memory:");
        Self::connect(options, in_memory, url).await
    }

    /// Open (or create) a database file, creating parent directories.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                StoreError::Unavailable(format!("Cannot create {}: {e}", parent.display()))
            })?;
        }
        let options = SqliteConnectOptions::new().filename(path);
        Self::connect(options, false, &path.display().to_string()).await
    }

    async fn connect(
        options: SqliteConnectOptions,
        in_memory: bool,
        label: &str,
    ) -> Result<Self, StoreError> {
        let mut options = options
            .create_if_missing(true)
            .synchronous(SqliteSynchronous::Normal);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let mut pool_options = SqlitePoolOptions::new().max_connections(4);
        if in_memory {
            // Dropping the only connection would drop the database
            pool_options = pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to open SQLite: {e}")))?;

        let store = Self::from_pool(pool).await?;
        info!("SQLite conversation store initialized at {label}");
        Ok(store)
    }

    /// Create from an existing pool.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self {
            pool,
            writer: Mutex::new(()),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS turns (
                seq        INTEGER PRIMARY KEY AUTOINCREMENT,
                id         TEXT UNIQUE NOT NULL,
                role       TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
                content    TEXT NOT NULL CHECK (length(trim(content)) > 0),
                timestamp  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("turns table: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_turns_timestamp ON turns(timestamp, seq)")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::MigrationFailed(format!("timestamp index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    /// Fixed-width UTC timestamp, so text order equals time order.
    fn encode_timestamp(ts: DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
    }

    /// Escape `%`, `_` and the escape character itself for `LIKE ... ESCAPE '\'`.
    fn escape_like(text: &str) -> String {
        let mut escaped = String::with_capacity(text.len());
        for c in text.chars() {
            if matches!(c, '%' | '_' | '\\') {
                escaped.push('\\');
            }
            escaped.push(c);
        }
        escaped
    }

    fn row_to_turn(row: &sqlx::sqlite::SqliteRow) -> Result<ConversationTurn, StoreError> {
        let id: String = row
            .try_get("id")
            .map_err(|e| StoreError::QueryFailed(format!("id column: {e}")))?;
        let role: String = row
            .try_get("role")
            .map_err(|e| StoreError::QueryFailed(format!("role column: {e}")))?;
        let content: String = row
            .try_get("content")
            .map_err(|e| StoreError::QueryFailed(format!("content column: {e}")))?;
        let timestamp: String = row
            .try_get("timestamp")
            .map_err(|e| StoreError::QueryFailed(format!("timestamp column: {e}")))?;

        let corrupt = |reason: String| StoreError::Corrupt {
            id: id.clone(),
            reason,
        };

        let role = Role::parse(&role).ok_or_else(|| corrupt(format!("unknown role '{role}'")))?;
        let timestamp = DateTime::parse_from_rfc3339(&timestamp)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| corrupt(format!("bad timestamp: {e}")))?;

        ConversationTurn::restore(TurnId(id.clone()), role, content, timestamp)
            .map_err(|e| corrupt(e.to_string()))
    }

    async fn insert_all(&self, turns: &[ConversationTurn]) -> Result<(), StoreError> {
        if let Some(bad) = turns.iter().find(|t| t.content().trim().is_empty()) {
            debug!(id = %bad.id(), "Rejected empty turn");
            return Err(StoreError::EmptyContent);
        }

        let _guard = self.writer.lock().await;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Unavailable(format!("BEGIN failed: {e}")))?;

        for turn in turns {
            sqlx::query("INSERT INTO turns (id, role, content, timestamp) VALUES (?1, ?2, ?3, ?4)")
                .bind(turn.id().as_str())
                .bind(turn.role().as_str())
                .bind(turn.content())
                .bind(Self::encode_timestamp(turn.timestamp()))
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::WriteFailed(format!("INSERT failed: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::WriteFailed(format!("COMMIT failed: {e}")))?;

        debug!(count = turns.len(), "Appended turns");
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for SqliteTurnStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn append(&self, turn: ConversationTurn) -> Result<(), StoreError> {
        self.insert_all(std::slice::from_ref(&turn)).await
    }

    async fn append_all(&self, turns: Vec<ConversationTurn>) -> Result<(), StoreError> {
        if turns.is_empty() {
            return Ok(());
        }
        self.insert_all(&turns).await
    }

    async fn fetch_tail(&self, n: usize) -> Result<Vec<ConversationTurn>, StoreError> {
        if n == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT id, role, content, timestamp FROM (
                SELECT seq, id, role, content, timestamp FROM turns
                ORDER BY timestamp DESC, seq DESC
                LIMIT ?1
            )
            ORDER BY timestamp ASC, seq ASC
            "#,
        )
        .bind(i64::try_from(n).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("fetch_tail: {e}")))?;

        rows.iter().map(Self::row_to_turn).collect()
    }

    async fn fetch_all(&self, filter: &TurnFilter) -> Result<Vec<ConversationTurn>, StoreError> {
        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT id, role, content, timestamp FROM turns WHERE 1 = 1");

        if let Some(since) = filter.since {
            query
                .push(" AND timestamp >= ")
                .push_bind(Self::encode_timestamp(since));
        }
        if let Some(until) = filter.until {
            query
                .push(" AND timestamp <= ")
                .push_bind(Self::encode_timestamp(until));
        }
        // SQLite folds case for ASCII only; other needles are matched in Rust.
        let needle = filter.contains.as_deref().filter(|n| !n.is_empty());
        let pushed_down = needle.is_none_or(|n| n.is_ascii());
        if let Some(needle) = needle.filter(|_| pushed_down) {
            query
                .push(" AND content LIKE ")
                .push_bind(format!("%{}%", Self::escape_like(needle)))
                .push(" ESCAPE '\\'");
        }
        query.push(" ORDER BY timestamp ASC, seq ASC");

        let rows = query
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("fetch_all: {e}")))?;

        let turns = rows
            .iter()
            .map(Self::row_to_turn)
            .collect::<Result<Vec<_>, _>>()?;
        if pushed_down {
            return Ok(turns);
        }
        Ok(turns.into_iter().filter(|t| filter.matches(t)).collect())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM turns")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("count: {e}")))?;
        let n: i64 = row
            .try_get("n")
            .map_err(|e| StoreError::QueryFailed(format!("count column: {e}")))?;
        Ok(usize::try_from(n).unwrap_or(0))
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.writer.lock().await;
        let result = sqlx::query("DELETE FROM turns")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::WriteFailed(format!("DELETE failed: {e}")))?;
        info!(deleted = result.rows_affected(), "Conversation cleared");
        Ok(())
    }
}
