//! Past analyses stored in SQLite
//!
//! Operations: `save <SYMBOL> <text>`, `retrieve <SYMBOL> [last_week|last_month|all]`
//! and `search <term>`.

use super::{preview, Capability};
use crate::Result;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use tracing::{info, warn};

const DESCRIPTION: &str = "Saves and retrieves past analyses.
Input: one of
  \"save <SYMBOL> <analysis text>\"
  \"retrieve <SYMBOL> [last_week|last_month|all]\"
  \"search <term>\"
Examples: \"retrieve BTCUSDT last_week\", \"search funding rate\"";

const SAVED_QUERY: &str = "note";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Timeframe {
    LastWeek,
    LastMonth,
    All,
}

impl Timeframe {
    fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::to_lowercase).as_deref() {
            None | Some("last_week") => Timeframe::LastWeek,
            Some("last_month") => Timeframe::LastMonth,
            _ => Timeframe::All,
        }
    }
}

pub struct HistoryCapability {
    /// The pool, or why it could not be opened.
    store: std::result::Result<SqlitePool, String>,
}

impl HistoryCapability {
    /// Open (creating if needed) the database at `path`. A failure leaves the
    /// capability in place, answering every request with the reason.
    pub async fn open(path: &str) -> Self {
        match connect(path).await {
            Ok(pool) => {
                info!(path, "History store ready");
                Self { store: Ok(pool) }
            }
            Err(e) => {
                warn!(path, error = %e, "History store unavailable");
                Self {
                    store: Err(e.to_string()),
                }
            }
        }
    }

    /// Private in-memory database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        init_schema(&pool).await?;
        Ok(Self { store: Ok(pool) })
    }

    async fn save_analysis(
        &self,
        pool: &SqlitePool,
        symbol: &str,
        query: &str,
        report: &str,
        sources: &[String],
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO analyses (symbol, query, report, sources, timestamp)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(symbol)
        .bind(query)
        .bind(report)
        .bind(serde_json::to_string(sources)?)
        .bind(Utc::now().to_rfc3339())
        .execute(pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn retrieve(&self, pool: &SqlitePool, symbol: &str, timeframe: Timeframe) -> Result<String> {
        let (window, limit) = match timeframe {
            Timeframe::LastWeek => (Some("-7 days"), 5),
            Timeframe::LastMonth => (Some("-30 days"), 10),
            Timeframe::All => (None, 5),
        };

        let rows: Vec<(String, String, String)> = sqlx::query_as(
            r#"
            SELECT query, report, timestamp FROM analyses
            WHERE symbol = ?
              AND (? IS NULL OR created_at >= datetime('now', ?))
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(symbol)
        .bind(window)
        .bind(window)
        .bind(limit)
        .fetch_all(pool)
        .await?;

        if rows.is_empty() {
            return Ok(format!("No analyses found for {}", symbol));
        }

        let mut out = format!("Historical analyses for {}:\n\n", symbol);
        for (i, (query, report, timestamp)) in rows.iter().enumerate() {
            out.push_str(&format!("{}. Query: {}\n", i + 1, query));
            out.push_str(&format!("   Date: {}\n", timestamp));
            out.push_str(&format!("   Report: {}\n\n", preview(report, 200)));
        }
        Ok(out)
    }

    async fn search(&self, pool: &SqlitePool, term: &str) -> Result<String> {
        let pattern = format!("%{}%", term);
        let rows: Vec<(String, String, String, String)> = sqlx::query_as(
            r#"
            SELECT symbol, query, report, timestamp FROM analyses
            WHERE query LIKE ? OR report LIKE ?
            ORDER BY created_at DESC, id DESC
            LIMIT 10
            "#,
        )
        .bind(&pattern)
        .bind(&pattern)
        .fetch_all(pool)
        .await?;

        if rows.is_empty() {
            return Ok(format!("No results found for: {}", term));
        }

        let mut out = format!("Search results for '{}':\n\n", term);
        for (i, (symbol, query, report, timestamp)) in rows.iter().enumerate() {
            out.push_str(&format!("{}. {} - {}\n", i + 1, symbol, query));
            out.push_str(&format!("   Date: {}\n", timestamp));
            out.push_str(&format!("   Preview: {}\n\n", preview(report, 150)));
        }
        Ok(out)
    }

    async fn run(&self, pool: &SqlitePool, input: &str) -> Result<String> {
        let (operation, params) = match input.trim().split_once(char::is_whitespace) {
            Some((op, rest)) => (op.to_lowercase(), rest.trim()),
            None => (input.trim().to_lowercase(), ""),
        };

        match operation.as_str() {
            "save" => {
                let Some((symbol, text)) = params.split_once(char::is_whitespace) else {
                    return Ok("Format: save <SYMBOL> <analysis text>".to_string());
                };
                let symbol = symbol.to_uppercase();
                let id = self
                    .save_analysis(pool, &symbol, SAVED_QUERY, text.trim(), &[])
                    .await?;
                Ok(format!("Analysis saved for {} (id {})", symbol, id))
            }
            "retrieve" => {
                let mut parts = params.split_whitespace();
                let Some(symbol) = parts.next() else {
                    return Ok("Format: retrieve <SYMBOL> [last_week|last_month|all]".to_string());
                };
                self.retrieve(pool, &symbol.to_uppercase(), Timeframe::parse(parts.next()))
                    .await
            }
            "search" if !params.is_empty() => self.search(pool, params).await,
            "search" => Ok("Format: search <term>".to_string()),
            other => Ok(format!(
                "Unsupported operation: {}. Operations: save, retrieve, search",
                other
            )),
        }
    }
}

#[async_trait::async_trait]
impl Capability for HistoryCapability {
    fn name(&self) -> &str {
        "history"
    }

    fn description(&self) -> &str {
        DESCRIPTION
    }

    async fn execute(&self, input: &str) -> Result<String> {
        let pool = match &self.store {
            Ok(pool) => pool,
            Err(reason) => return Ok(format!("History storage unavailable: {}", reason)),
        };

        Ok(match self.run(pool, input).await {
            Ok(text) => text,
            Err(e) => format!("History operation failed: {}", e),
        })
    }
}

async fn connect(path: &str) -> Result<SqlitePool> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    init_schema(&pool).await?;
    Ok(pool)
}

async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS analyses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            symbol TEXT NOT NULL,
            query TEXT NOT NULL,
            report TEXT NOT NULL,
            sources TEXT NOT NULL DEFAULT '[]',
            timestamp TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_analyses_symbol_time
        ON analyses (symbol, created_at);
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
