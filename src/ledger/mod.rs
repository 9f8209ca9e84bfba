//! Persistent domain ledger
//!
//! A single durable table backing the public-domain filter's bookkeeping:
//! one row per domain with first/last sighting and a hit counter. Writes
//! are idempotent upserts so repeated process restarts are safe. The
//! ledger is not part of deduplication.

use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use thiserror::Error;

/// Errors from ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Sql(#[from] sqlx::Error),
    #[error("invalid ledger path: {0}")]
    InvalidPath(String),
}

/// One ledger row.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub domain: String,
    pub top_domain: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub hit_count: i64,
    pub source: String,
}

/// Durable domain table over SQLite.
pub struct DomainLedger {
    pool: Pool<Sqlite>,
}

impl DomainLedger {
    /// Open (creating if missing) a ledger at `path` with WAL enabled.
    pub async fn open(path: &Path) -> Result<Self, LedgerError> {
        let path_str = path
            .to_str()
            .ok_or_else(|| LedgerError::InvalidPath(path.display().to_string()))?;

        let options = SqliteConnectOptions::new()
            .filename(path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let ledger = Self { pool };
        ledger.init_schema().await?;
        Ok(ledger)
    }

    /// Open an in-memory ledger. One connection only, so the database
    /// lives as long as the pool.
    pub async fn open_in_memory() -> Result<Self, LedgerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let ledger = Self { pool };
        ledger.init_schema().await?;
        Ok(ledger)
    }

    async fn init_schema(&self) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS domains (
                domain      TEXT PRIMARY KEY,
                top_domain  TEXT NOT NULL,
                first_seen  TEXT NOT NULL,
                last_seen   TEXT NOT NULL,
                hit_count   INTEGER NOT NULL DEFAULT 1,
                source      TEXT NOT NULL DEFAULT ''
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_domains_top ON domains(top_domain)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Record one sighting of a domain. Inserts on first sight; otherwise
    /// increments `hit_count` and advances `last_seen`.
    pub async fn record(
        &self,
        domain: &str,
        top_domain: &str,
        source: &str,
    ) -> Result<(), LedgerError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO domains (domain, top_domain, first_seen, last_seen, hit_count, source)
            VALUES (?1, ?2, ?3, ?3, 1, ?4)
            ON CONFLICT(domain) DO UPDATE SET
                hit_count = hit_count + 1,
                last_seen = excluded.last_seen
            "#,
        )
        .bind(domain.to_ascii_lowercase())
        .bind(top_domain.to_ascii_lowercase())
        .bind(now)
        .bind(source)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a batch of sightings.
    pub async fn record_many(
        &self,
        entries: &[(String, String)],
        source: &str,
    ) -> Result<(), LedgerError> {
        for (domain, top_domain) in entries {
            self.record(domain, top_domain, source).await?;
        }
        Ok(())
    }

    /// Whether a domain has ever been recorded.
    pub async fn contains(&self, domain: &str) -> Result<bool, LedgerError> {
        let row = sqlx::query("SELECT 1 FROM domains WHERE domain = ?1")
            .bind(domain.to_ascii_lowercase())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Fetch one entry.
    pub async fn lookup(&self, domain: &str) -> Result<Option<LedgerEntry>, LedgerError> {
        let row = sqlx::query(
            "SELECT domain, top_domain, first_seen, last_seen, hit_count, source
             FROM domains WHERE domain = ?1",
        )
        .bind(domain.to_ascii_lowercase())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| entry_from_row(&row)))
    }

    /// Total number of recorded domains.
    pub async fn count(&self) -> Result<u64, LedgerError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM domains")
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.get("n");
        Ok(n as u64)
    }

    /// The most frequently seen domains, descending.
    pub async fn top_hits(&self, limit: u32) -> Result<Vec<LedgerEntry>, LedgerError> {
        let rows = sqlx::query(
            "SELECT domain, top_domain, first_seen, last_seen, hit_count, source
             FROM domains ORDER BY hit_count DESC, domain ASC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(entry_from_row).collect())
    }
}

fn entry_from_row(row: &sqlx::sqlite::SqliteRow) -> LedgerEntry {
    let first_seen: String = row.get("first_seen");
    let last_seen: String = row.get("last_seen");
    LedgerEntry {
        domain: row.get("domain"),
        top_domain: row.get("top_domain"),
        first_seen: DateTime::parse_from_rfc3339(&first_seen)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        last_seen: DateTime::parse_from_rfc3339(&last_seen)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        hit_count: row.get("hit_count"),
        source: row.get("source"),
    }
}
