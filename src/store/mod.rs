//! Session persistence over SQLite.
//!
//! The [`SessionStore`] is the sole gateway to the conversation database.
//! One active session per user (`sessions` row plus its `turns`), immutable
//! snapshots of superseded sessions (`archived_sessions` / `archived_turns`),
//! and the user directory (`users`).
//!
//! Appends are single `INSERT` statements (no read-modify-write of the turn
//! sequence), so concurrent turns from the same user cannot corrupt ordering.
//! The session's last-update stamp is written in the same transaction as the
//! append.

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info};
use uuid::Uuid;

/// Risk label recorded before any classification has produced a verdict.
pub const DEFAULT_RISK_LABEL: &str = "unspecified";

// ---------------------------------------------------------------------------
// Domain types
// ---------------------------------------------------------------------------

/// One query/response exchange within a session.
///
/// Bot-authored greeting turns carry a `sender` tag and no query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    /// Unique turn identifier.
    pub id: String,
    /// The user's input text (absent for bot-authored turns).
    pub query: Option<String>,
    /// The reply shown to the user.
    pub response: Option<String>,
    /// Sender tag (`"bot"` for greeting turns, absent otherwise).
    pub sender: Option<String>,
}

impl Turn {
    /// Build a user turn with a freshly generated identifier.
    pub fn exchange(user_id: &str, query: &str, response: &str) -> Self {
        Self {
            id: new_turn_id(user_id),
            query: Some(query.to_owned()),
            response: Some(response.to_owned()),
            sender: None,
        }
    }

    /// Build a bot-authored greeting turn.
    pub fn greeting(user_id: &str, message: &str) -> Self {
        Self {
            id: new_turn_id(user_id),
            query: None,
            response: Some(message.to_owned()),
            sender: Some("bot".to_owned()),
        }
    }
}

/// A user's active session: ordered turns plus the current risk label.
#[derive(Debug, Clone)]
pub struct Session {
    /// Session identifier of the active session.
    pub session_id: String,
    /// Current risk label ([`DEFAULT_RISK_LABEL`] until a verdict lands).
    pub risk_label: String,
    /// Turn sequence, oldest first.
    pub turns: Vec<Turn>,
}

/// A frozen snapshot of a superseded session.
#[derive(Debug, Clone)]
pub struct ArchivedSession {
    /// Snapshot identifier.
    pub session_id: String,
    /// Risk label at archive time.
    pub risk_label: String,
    /// Turn sequence, oldest first.
    pub turns: Vec<Turn>,
}

/// Generate a turn identifier.
///
/// Shape: `{user_id}_{millis}_{suffix}`. The random suffix keeps identifiers
/// unique when two turns land in the same millisecond or the clock skews.
pub fn new_turn_id(user_id: &str) -> String {
    let millis = Utc::now().timestamp_millis();
    let suffix: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
    format!("{user_id}_{millis}_{suffix}")
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from session store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// No session document exists for the requested user.
    #[error("no conversation found for user")]
    UserNotFound,

    /// The requested message is not present in the active session.
    #[error("message not found")]
    MessageNotFound,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// SQLite-backed session store.
#[derive(Debug, Clone)]
pub struct SessionStore {
    db: SqlitePool,
}

impl SessionStore {
    /// Open (or create) the database at `path` and apply the schema.
    ///
    /// Startup-fatal by design: callers abort process startup on failure.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the file cannot be opened or the
    /// schema cannot be applied.
    pub async fn connect(path: &str) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(opts).await?;

        let schema = include_str!("../../migrations/001_schema.sql");
        sqlx::raw_sql(schema).execute(&pool).await?;

        info!(path, "session store opened");
        Ok(Self { db: pool })
    }

    /// Wrap an existing pool. The schema must already be applied.
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Returns a reference to the underlying pool (shared with the FTS index).
    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Create the session document for `user_id` if absent.
    ///
    /// Idempotent: an existing session (and its history) is never overwritten.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the insert fails.
    pub async fn ensure_session(&self, user_id: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO sessions (user_id, session_id, risk_label) \
             VALUES (?1, ?2, ?3) \
             ON CONFLICT(user_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(Uuid::new_v4().simple().to_string())
        .bind(DEFAULT_RISK_LABEL)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Append a turn to the user's active session.
    ///
    /// Creates the session if absent, inserts the turn, stamps the session's
    /// last-update time, and optionally records a new risk label — all in one
    /// transaction. Retried appends with the same turn id are deduplicated.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the transaction fails.
    pub async fn append_turn(
        &self,
        user_id: &str,
        turn: &Turn,
        risk_label: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut tx = self.db.begin().await?;

        sqlx::query(
            "INSERT INTO sessions (user_id, session_id, risk_label) \
             VALUES (?1, ?2, ?3) \
             ON CONFLICT(user_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(Uuid::new_v4().simple().to_string())
        .bind(DEFAULT_RISK_LABEL)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT OR IGNORE INTO turns (turn_id, user_id, query, response, sender) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&turn.id)
        .bind(user_id)
        .bind(&turn.query)
        .bind(&turn.response)
        .bind(&turn.sender)
        .execute(&mut *tx)
        .await?;

        match risk_label {
            Some(label) => {
                sqlx::query(
                    "UPDATE sessions SET risk_label = ?1, updated_at = datetime('now') \
                     WHERE user_id = ?2",
                )
                .bind(label)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
            }
            None => {
                sqlx::query(
                    "UPDATE sessions SET updated_at = datetime('now') WHERE user_id = ?1",
                )
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        debug!(user_id, turn_id = %turn.id, "turn appended");
        Ok(())
    }

    /// Read the last `limit` turns of the active session, oldest first.
    ///
    /// Returns an empty vector when no session or no turns exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn recent_turns(&self, user_id: &str, limit: usize) -> Result<Vec<Turn>, StoreError> {
        let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut rows: Vec<(String, Option<String>, Option<String>, Option<String>)> =
            sqlx::query_as(
                "SELECT turn_id, query, response, sender \
                 FROM turns WHERE user_id = ?1 \
                 ORDER BY seq DESC LIMIT ?2",
            )
            .bind(user_id)
            .bind(limit_i64)
            .fetch_all(&self.db)
            .await?;
        rows.reverse();
        Ok(rows.into_iter().map(row_to_turn).collect())
    }

    /// Read the full active session for `user_id`, or `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn session(&self, user_id: &str) -> Result<Option<Session>, StoreError> {
        let header: Option<(String, String)> =
            sqlx::query_as("SELECT session_id, risk_label FROM sessions WHERE user_id = ?1")
                .bind(user_id)
                .fetch_optional(&self.db)
                .await?;
        let Some((session_id, risk_label)) = header else {
            return Ok(None);
        };

        let rows: Vec<(String, Option<String>, Option<String>, Option<String>)> = sqlx::query_as(
            "SELECT turn_id, query, response, sender \
             FROM turns WHERE user_id = ?1 ORDER BY seq ASC",
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        Ok(Some(Session {
            session_id,
            risk_label,
            turns: rows.into_iter().map(row_to_turn).collect(),
        }))
    }

    /// Number of turns accumulated in the user's active session.
    ///
    /// This is the single source of truth for the trigger policy: the count
    /// is always derived from the persisted turn sequence, never tracked
    /// separately.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn turn_count(&self, user_id: &str) -> Result<u64, StoreError> {
        let row: (i64,) = sqlx::query_as("SELECT count(*) FROM turns WHERE user_id = ?1")
            .bind(user_id)
            .fetch_one(&self.db)
            .await?;
        Ok(row.0.cast_unsigned())
    }

    /// Current risk label of the active session, or `None` if no session
    /// exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn risk_label(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT risk_label FROM sessions WHERE user_id = ?1")
                .bind(user_id)
                .fetch_optional(&self.db)
                .await?;
        Ok(row.map(|(label,)| label))
    }

    /// Record a new risk label on the active session.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    pub async fn update_risk(&self, user_id: &str, label: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE sessions SET risk_label = ?1, updated_at = datetime('now') \
             WHERE user_id = ?2",
        )
        .bind(label)
        .bind(user_id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Archive the active session (if it has turns) and start a fresh one.
    ///
    /// With at least one turn: the full turn sequence and risk label are
    /// copied into a new archived snapshot, the active turns are cleared, and
    /// the risk label resets to [`DEFAULT_RISK_LABEL`]. With zero turns the
    /// archive step is skipped so empty snapshots are never produced.
    ///
    /// Returns the archived snapshot's identifier, or `None` when nothing was
    /// archived.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the transaction fails.
    pub async fn archive_and_reset(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        let mut tx = self.db.begin().await?;

        let count_row: (i64,) = sqlx::query_as("SELECT count(*) FROM turns WHERE user_id = ?1")
            .bind(user_id)
            .fetch_one(&mut *tx)
            .await?;

        let archived_id = if count_row.0 > 0 {
            let snapshot_id = Uuid::new_v4().simple().to_string();

            sqlx::query(
                "INSERT INTO archived_sessions (session_id, user_id, risk_label) \
                 SELECT ?1, user_id, risk_label FROM sessions WHERE user_id = ?2",
            )
            .bind(&snapshot_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO archived_turns (session_id, turn_id, query, response, sender, created_at) \
                 SELECT ?1, turn_id, query, response, sender, created_at \
                 FROM turns WHERE user_id = ?2 ORDER BY seq ASC",
            )
            .bind(&snapshot_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM turns WHERE user_id = ?1")
                .bind(user_id)
                .execute(&mut *tx)
                .await?;

            Some(snapshot_id)
        } else {
            None
        };

        sqlx::query(
            "INSERT INTO sessions (user_id, session_id, risk_label, updated_at) \
             VALUES (?1, ?2, ?3, datetime('now')) \
             ON CONFLICT(user_id) DO UPDATE SET \
                 session_id = excluded.session_id, \
                 risk_label = excluded.risk_label, \
                 updated_at = excluded.updated_at",
        )
        .bind(user_id)
        .bind(Uuid::new_v4().simple().to_string())
        .bind(DEFAULT_RISK_LABEL)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(user_id, archived = archived_id.is_some(), "session reset");
        Ok(archived_id)
    }

    /// Read an archived snapshot by its identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MessageNotFound`] if no snapshot with that
    /// identifier exists, [`StoreError::Database`] on query failure.
    pub async fn archived_session(&self, session_id: &str) -> Result<ArchivedSession, StoreError> {
        let header: Option<(String,)> =
            sqlx::query_as("SELECT risk_label FROM archived_sessions WHERE session_id = ?1")
                .bind(session_id)
                .fetch_optional(&self.db)
                .await?;
        let Some((risk_label,)) = header else {
            return Err(StoreError::MessageNotFound);
        };

        let rows: Vec<(String, Option<String>, Option<String>, Option<String>)> = sqlx::query_as(
            "SELECT turn_id, query, response, sender \
             FROM archived_turns WHERE session_id = ?1 ORDER BY seq ASC",
        )
        .bind(session_id)
        .fetch_all(&self.db)
        .await?;

        Ok(ArchivedSession {
            session_id: session_id.to_owned(),
            risk_label,
            turns: rows.into_iter().map(row_to_turn).collect(),
        })
    }

    /// Look up a single message in the user's active session.
    ///
    /// `message_id` may be a numeric index into the turn sequence or a turn
    /// identifier. Returns the turn's response text.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UserNotFound`] when the user has no session,
    /// [`StoreError::MessageNotFound`] when the index is out of range or no
    /// turn carries that identifier, [`StoreError::Database`] on query
    /// failure.
    pub async fn find_message(
        &self,
        user_id: &str,
        message_id: &str,
    ) -> Result<String, StoreError> {
        let exists: Option<(String,)> =
            sqlx::query_as("SELECT session_id FROM sessions WHERE user_id = ?1")
                .bind(user_id)
                .fetch_optional(&self.db)
                .await?;
        if exists.is_none() {
            return Err(StoreError::UserNotFound);
        }

        if let Ok(index) = message_id.parse::<u64>() {
            let offset = i64::try_from(index).unwrap_or(i64::MAX);
            let row: Option<(Option<String>,)> = sqlx::query_as(
                "SELECT response FROM turns WHERE user_id = ?1 \
                 ORDER BY seq ASC LIMIT 1 OFFSET ?2",
            )
            .bind(user_id)
            .bind(offset)
            .fetch_optional(&self.db)
            .await?;
            return match row {
                Some((response,)) => Ok(response.unwrap_or_default()),
                None => Err(StoreError::MessageNotFound),
            };
        }

        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT response FROM turns WHERE user_id = ?1 AND turn_id = ?2")
                .bind(user_id)
                .bind(message_id)
                .fetch_optional(&self.db)
                .await?;
        match row {
            Some((response,)) => Ok(response.unwrap_or_default()),
            None => Err(StoreError::MessageNotFound),
        }
    }

    // ── User directory ──────────────────────────────────────────

    /// Look up the user's display name from the directory.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn lookup_name(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT name FROM users WHERE user_id = ?1")
                .bind(user_id)
                .fetch_optional(&self.db)
                .await?;
        Ok(row.and_then(|(name,)| name))
    }

    /// Look up the user's push-notification device token, if registered.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn lookup_push_token(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT push_token FROM users WHERE user_id = ?1")
                .bind(user_id)
                .fetch_optional(&self.db)
                .await?;
        Ok(row.and_then(|(token,)| token))
    }
}

fn row_to_turn(row: (String, Option<String>, Option<String>, Option<String>)) -> Turn {
    let (id, query, response, sender) = row;
    Turn {
        id,
        query,
        response,
        sender,
    }
}
