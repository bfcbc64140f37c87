use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::batch::Keyed;
use crate::parser::OutcomeKind;

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create database directory {}", dir.display()))?;
    }
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS pages (
            id         INTEGER PRIMARY KEY,
            url        TEXT UNIQUE NOT NULL,
            slug       TEXT NOT NULL,
            visited    BOOLEAN NOT NULL DEFAULT 0,
            visited_at TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_pages_visited ON pages(visited);

        CREATE TABLE IF NOT EXISTS page_data (
            id         INTEGER PRIMARY KEY,
            page_id    INTEGER NOT NULL UNIQUE REFERENCES pages(id),
            url        TEXT NOT NULL,
            slug       TEXT NOT NULL,
            html       TEXT,
            status     INTEGER,
            error      TEXT,
            latency_ms INTEGER,
            scraped_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- One row per source URL; page_id is the row index
        CREATE TABLE IF NOT EXISTS extractions (
            page_id        INTEGER PRIMARY KEY REFERENCES pages(id),
            url            TEXT NOT NULL,
            slug           TEXT NOT NULL,
            outcome        TEXT NOT NULL CHECK(outcome IN
                               ('parsed','missing_description','parse_failure','fetch_failure')),
            description    TEXT NOT NULL,
            image_count    INTEGER,
            video_count    INTEGER,
            pledge_amounts TEXT,
            error          TEXT,
            processed_at   TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_extractions_outcome ON extractions(outcome);
        ",
    )?;
    Ok(())
}

// ── Queue ──

pub fn insert_pages(conn: &Connection, pages: &[(String, String)]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut stmt = tx.prepare("INSERT OR IGNORE INTO pages (url, slug) VALUES (?1, ?2)")?;
        for (url, slug) in pages {
            count += stmt.execute(rusqlite::params![url, slug])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedPage {
    pub id: i64,
    pub url: String,
    pub slug: String,
}

impl Keyed for QueuedPage {
    fn key(&self) -> i64 {
        self.id
    }
}

pub fn count_unvisited(conn: &Connection) -> Result<usize> {
    let n = conn.query_row("SELECT COUNT(*) FROM pages WHERE visited = 0", [], |r| r.get(0))?;
    Ok(n)
}

pub fn fetch_unvisited_after(conn: &Connection, after: i64, limit: usize) -> Result<Vec<QueuedPage>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, url, slug FROM pages WHERE visited = 0 AND id > ?1 ORDER BY id LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![after, limit as i64], |row| {
            Ok(QueuedPage {
                id: row.get(0)?,
                url: row.get(1)?,
                slug: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Fetching ──

pub struct ScrapeRow {
    pub page_id: i64,
    pub url: String,
    pub slug: String,
    pub html: Option<String>,
    pub status: Option<u16>,
    pub error: Option<String>,
    pub latency_ms: Option<i64>,
}

/// Store one fetch attempt and mark its page visited.
pub fn save_fetch(conn: &Connection, row: &ScrapeRow) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut insert = tx.prepare_cached(
            "INSERT OR REPLACE INTO page_data (page_id, url, slug, html, status, error, latency_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        insert.execute(rusqlite::params![
            row.page_id, row.url, row.slug, row.html, row.status, row.error, row.latency_ms,
        ])?;
        let mut update = tx.prepare_cached(
            "UPDATE pages SET visited = 1, visited_at = datetime('now') WHERE id = ?1",
        )?;
        update.execute(rusqlite::params![row.page_id])?;
    }
    tx.commit()?;
    Ok(())
}

// ── Processing ──

pub struct ScrapedPage {
    pub page_id: i64,
    pub url: String,
    pub slug: String,
    pub html: Option<String>,
    pub error: Option<String>,
}

impl Keyed for ScrapedPage {
    fn key(&self) -> i64 {
        self.page_id
    }
}

const UNPROCESSED: &str = "FROM page_data pd
     LEFT JOIN extractions e ON e.page_id = pd.page_id
     WHERE e.page_id IS NULL";

pub fn count_unprocessed(conn: &Connection) -> Result<usize> {
    let n = conn.query_row(&format!("SELECT COUNT(*) {}", UNPROCESSED), [], |r| r.get(0))?;
    Ok(n)
}

pub fn fetch_unprocessed_after(conn: &Connection, after: i64, limit: usize) -> Result<Vec<ScrapedPage>> {
    let sql = format!(
        "SELECT pd.page_id, pd.url, pd.slug, pd.html, pd.error {}
         AND pd.page_id > ?1 ORDER BY pd.page_id LIMIT ?2",
        UNPROCESSED
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params![after, limit as i64], |row| {
            Ok(ScrapedPage {
                page_id: row.get(0)?,
                url: row.get(1)?,
                slug: row.get(2)?,
                html: row.get(3)?,
                error: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// One row of the output table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractionRow {
    pub page_id: i64,
    pub url: String,
    pub slug: String,
    pub outcome: OutcomeKind,
    pub description: String,
    pub image_count: Option<usize>,
    pub video_count: Option<usize>,
    pub pledge_amounts: Option<Vec<u64>>,
    pub error: Option<String>,
}

impl Keyed for ExtractionRow {
    fn key(&self) -> i64 {
        self.page_id
    }
}

pub fn save_extractions(conn: &Connection, rows: &[ExtractionRow]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO extractions
             (page_id, url, slug, outcome, description, image_count, video_count, pledge_amounts, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )?;
        for r in rows {
            let pledges = r
                .pledge_amounts
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            stmt.execute(rusqlite::params![
                r.page_id, r.url, r.slug, r.outcome.as_str(), r.description,
                r.image_count, r.video_count, pledges, r.error,
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

const EXTRACTION_COLUMNS: &str =
    "page_id, url, slug, outcome, description, image_count, video_count, pledge_amounts, error";

fn extraction_from_row(row: &Row<'_>) -> rusqlite::Result<ExtractionRow> {
    let outcome: String = row.get(3)?;
    let outcome = OutcomeKind::parse(&outcome).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            Type::Text,
            format!("unknown outcome {:?}", outcome).into(),
        )
    })?;
    let pledges: Option<String> = row.get(7)?;
    let pledge_amounts = pledges
        .map(|json| serde_json::from_str::<Vec<u64>>(&json))
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?;

    Ok(ExtractionRow {
        page_id: row.get(0)?,
        url: row.get(1)?,
        slug: row.get(2)?,
        outcome,
        description: row.get(4)?,
        image_count: row.get(5)?,
        video_count: row.get(6)?,
        pledge_amounts,
        error: row.get(8)?,
    })
}

pub fn fetch_extraction(conn: &Connection, page_id: i64) -> Result<Option<ExtractionRow>> {
    let sql = format!("SELECT {} FROM extractions WHERE page_id = ?1", EXTRACTION_COLUMNS);
    let row = conn
        .query_row(&sql, [page_id], extraction_from_row)
        .optional()?;
    Ok(row)
}

pub fn fetch_extractions_after(conn: &Connection, after: i64, limit: usize) -> Result<Vec<ExtractionRow>> {
    let sql = format!(
        "SELECT {} FROM extractions WHERE page_id > ?1 ORDER BY page_id LIMIT ?2",
        EXTRACTION_COLUMNS
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params![after, limit as i64], extraction_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Overview ──

pub fn fetch_overview(
    conn: &Connection,
    outcome: Option<OutcomeKind>,
    limit: usize,
) -> Result<Vec<ExtractionRow>> {
    let where_clause = if outcome.is_some() { " WHERE outcome = ?1" } else { "" };
    let sql = format!(
        "SELECT {} FROM extractions{} ORDER BY page_id LIMIT {}",
        EXTRACTION_COLUMNS, where_clause, limit
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = match outcome {
        Some(kind) => stmt
            .query_map([kind.as_str()], extraction_from_row)?
            .collect::<Result<Vec<_>, _>>()?,
        None => stmt
            .query_map([], extraction_from_row)?
            .collect::<Result<Vec<_>, _>>()?,
    };
    Ok(rows)
}

// ── Stats ──

pub struct Stats {
    pub total: usize,
    pub visited: usize,
    pub unvisited: usize,
    pub scraped: usize,
    pub fetch_errors: usize,
    pub processed: usize,
    pub outcomes: Vec<(OutcomeKind, usize)>,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let total: usize = conn.query_row("SELECT COUNT(*) FROM pages", [], |r| r.get(0))?;
    let visited: usize =
        conn.query_row("SELECT COUNT(*) FROM pages WHERE visited = 1", [], |r| r.get(0))?;
    let scraped: usize = conn.query_row("SELECT COUNT(*) FROM page_data", [], |r| r.get(0))?;
    let fetch_errors: usize = conn.query_row(
        "SELECT COUNT(*) FROM page_data WHERE error IS NOT NULL",
        [],
        |r| r.get(0),
    )?;
    let processed: usize =
        conn.query_row("SELECT COUNT(*) FROM extractions", [], |r| r.get(0))?;

    let mut outcomes = Vec::with_capacity(OutcomeKind::ALL.len());
    for kind in OutcomeKind::ALL {
        let n: usize = conn.query_row(
            "SELECT COUNT(*) FROM extractions WHERE outcome = ?1",
            [kind.as_str()],
            |r| r.get(0),
        )?;
        outcomes.push((kind, n));
    }

    Ok(Stats {
        total,
        visited,
        unvisited: total - visited,
        scraped,
        fetch_errors,
        processed,
        outcomes,
    })
}
