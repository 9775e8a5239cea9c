//! Knowledge-base retrieval behind the [`ContextIndex`] trait.
//!
//! The engine consumes retrieval as an external capability: a query string
//! goes in, an ordered list of reference passages comes out. The bundled
//! implementation is [`FtsIndex`] — SQLite FTS5 over the `passages` table.
//! Retrieval failures never fail a turn; the engine degrades to an
//! unaugmented prompt.

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::debug;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from retrieval operations.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    /// Database operation failed.
    #[error("index database error: {0}")]
    Database(#[from] sqlx::Error),
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Semantic index interface consumed by the conversation engine.
#[async_trait]
pub trait ContextIndex: Send + Sync {
    /// Return up to `k` reference passages relevant to `query`, best first.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError`] on index failure. Callers are expected to
    /// degrade to an empty context rather than propagate.
    async fn search(&self, query: &str, k: usize) -> Result<Vec<String>, RetrievalError>;
}

// ---------------------------------------------------------------------------
// FTS5 implementation
// ---------------------------------------------------------------------------

/// SQLite FTS5 index over the knowledge-base `passages` table.
#[derive(Debug, Clone)]
pub struct FtsIndex {
    db: SqlitePool,
}

impl FtsIndex {
    /// Create an index over the given pool. The `passages` schema must
    /// already be applied.
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Insert a passage into the knowledge base.
    ///
    /// The FTS5 shadow table is maintained by the `passages_ai` trigger.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::Database`] if the insert fails.
    pub async fn add_passage(
        &self,
        content: &str,
        source: Option<&str>,
    ) -> Result<(), RetrievalError> {
        sqlx::query("INSERT INTO passages (content, source) VALUES (?1, ?2)")
            .bind(content)
            .bind(source)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    /// Count stored passages.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::Database`] if the query fails.
    pub async fn passage_count(&self) -> Result<u64, RetrievalError> {
        let row: (i64,) = sqlx::query_as("SELECT count(*) FROM passages")
            .fetch_one(&self.db)
            .await?;
        Ok(row.0.cast_unsigned())
    }
}

#[async_trait]
impl ContextIndex for FtsIndex {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<String>, RetrievalError> {
        let sanitised = sanitise_fts5_query(query);
        if sanitised.is_empty() {
            return Ok(Vec::new());
        }

        let limit = i64::try_from(k).unwrap_or(i64::MAX);

        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT p.content \
             FROM passages_fts f \
             JOIN passages p ON f.rowid = p.id \
             WHERE passages_fts MATCH ?1 \
             ORDER BY f.rank \
             LIMIT ?2",
        )
        .bind(&sanitised)
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        debug!(query = %sanitised, hits = rows.len(), "knowledge-base search");
        Ok(rows.into_iter().map(|(content,)| content).collect())
    }
}

/// Sanitise a user query string for FTS5 MATCH syntax.
///
/// FTS5 treats certain characters as operators. We strip them to avoid
/// syntax errors while preserving the search intent.
fn sanitise_fts5_query(query: &str) -> String {
    let cleaned: String = query
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == ' ' || c == '_' {
                c
            } else {
                ' '
            }
        })
        .collect();

    // FTS5 keyword operators that cause parse errors when used as search terms.
    const FTS5_KEYWORDS: &[&str] = &["OR", "NOT", "AND", "NEAR"];

    let tokens: Vec<&str> = cleaned
        .split_whitespace()
        .filter(|t| !FTS5_KEYWORDS.contains(t))
        .collect();
    if tokens.is_empty() {
        return String::new();
    }

    // Join tokens with spaces — FTS5 treats them as implicit AND.
    tokens.join(" ")
}
