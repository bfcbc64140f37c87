use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use rusqlite::Connection;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::batch::Batches;
use crate::db::{self, QueuedPage, ScrapeRow};
use crate::settings::FetchSettings;

const CHUNK: usize = 100;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP Error {code}: {reason}")]
    Status { code: u16, reason: String },
    #[error("{0}")]
    Transport(#[from] reqwest::Error),
}

impl FetchError {
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { code, .. } => Some(*code),
            FetchError::Transport(e) => e.status().map(|s| s.as_u16()),
        }
    }
}

#[derive(Debug)]
pub struct Fetched {
    pub status: u16,
    pub html: String,
}

/// Scrape stats returned after completion.
pub struct ScrapeStats {
    pub total: usize,
    pub ok: usize,
    pub errors: usize,
}

/// Single-attempt page fetcher. No retries, no backoff.
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new(settings: &FetchSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .user_agent(settings.user_agent.as_str())
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub async fn fetch(&self, url: &str) -> Result<Fetched, FetchError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                code: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("").to_string(),
            });
        }
        let html = response.text().await?;
        Ok(Fetched {
            status: status.as_u16(),
            html,
        })
    }
}

/// Fetch unvisited pages one at a time, in row order, saving each result
/// as it arrives. Stopping midway leaves the rest unvisited for next time.
pub async fn scrape_pages(
    conn: &Connection,
    fetcher: &Fetcher,
    limit: Option<usize>,
) -> Result<ScrapeStats> {
    let pending = db::count_unvisited(conn)?;
    let total = limit.map_or(pending, |n| n.min(pending));

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    let mut ok = 0usize;
    let mut errors = 0usize;

    let mut batches = Batches::new(conn, db::fetch_unvisited_after, CHUNK).limit(limit);
    for chunk in batches.by_ref() {
        for page in chunk? {
            let row = scrape_one(fetcher, page).await;
            match &row.error {
                Some(e) => {
                    errors += 1;
                    warn!("Fetch failed for {}: {}", row.url, e);
                }
                None => ok += 1,
            }
            db::save_fetch(conn, &row)?;
            pb.inc(1);
        }
    }

    pb.finish_and_clear();
    debug!("Fetch cursor stopped after row {}", batches.checkpoint().after);
    info!("Fetched {} pages ({} ok, {} errors)", ok + errors, ok, errors);

    Ok(ScrapeStats {
        total: ok + errors,
        ok,
        errors,
    })
}

async fn scrape_one(fetcher: &Fetcher, page: QueuedPage) -> ScrapeRow {
    let start = Instant::now();
    let result = fetcher.fetch(&page.url).await;
    let elapsed = start.elapsed().as_millis() as i64;
    debug!(url = %page.url, latency_ms = elapsed, "fetched");

    let (html, status, error) = match result {
        Ok(f) => (Some(f.html), Some(f.status), None),
        Err(e) => (None, e.status(), Some(e.to_string())),
    };

    ScrapeRow {
        page_id: page.id,
        url: page.url,
        slug: page.slug,
        html,
        status,
        error,
        latency_ms: Some(elapsed),
    }
}
