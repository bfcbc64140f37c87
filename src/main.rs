mod batch;
mod db;
mod fetcher;
mod notify;
mod parser;
mod settings;
mod sitemap;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::{ArgGroup, Parser, Subcommand};
use rusqlite::Connection;

use batch::Batches;
use db::ExtractionRow;
use notify::{BatchSummary, Event, EventSender, Notifier};
use parser::OutcomeKind;
use settings::Settings;

#[derive(Parser)]
#[command(name = "campaign_scraper", about = "Crowdfunding campaign page scraper")]
struct Cli {
    /// Config file (default: ./campaign_scraper.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// SQLite database path, overrides the config
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load campaign URLs into the queue
    #[command(group(ArgGroup::new("source").required(true).args(["file", "sitemap"])))]
    Init {
        /// Newline-delimited URL list
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Sitemap or sitemap index URL
        #[arg(short, long)]
        sitemap: Option<String>,
    },
    /// Fetch unvisited pages, one at a time
    Scrape {
        /// Max pages to fetch (default: all unvisited)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Extract fetched pages into the results table
    Process {
        /// Max pages to process (default: all unprocessed)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Scrape + process, then send the completion notification
    Run {
        /// Max pages to fetch
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Extract a local HTML file and print the result as JSON
    Parse {
        file: PathBuf,
    },
    /// Print one stored result row as JSON
    Show {
        /// Row id (the page's position in the queue)
        id: i64,
    },
    /// Show scraping statistics
    Stats,
    /// Results overview table
    Overview {
        /// Filter by outcome (parsed, missing_description, parse_failure, fetch_failure)
        #[arg(short, long)]
        outcome: Option<String>,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
    /// Write the results table as JSON Lines
    Export {
        #[arg(short, long)]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut settings = settings::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        settings.db_path = db;
    }

    let result = match cli.command {
        Commands::Init { file, sitemap: sitemap_url } => {
            let conn = open(&settings)?;
            let pages = match (file, sitemap_url) {
                (Some(path), _) => sitemap::load_url_file(&path)?,
                (None, Some(url)) => {
                    let fetcher = fetcher::Fetcher::new(&settings.fetch)?;
                    sitemap::fetch_project_urls(fetcher.client(), &url).await?
                }
                (None, None) => anyhow::bail!("Pass --file or --sitemap"),
            };
            let inserted = db::insert_pages(&conn, &pages)?;
            println!("Inserted {} new campaign URLs ({} total found)", inserted, pages.len());
            Ok(())
        }
        Commands::Scrape { limit } => {
            let conn = open(&settings)?;
            if db::count_unvisited(&conn)? == 0 {
                println!("No unvisited pages. Run 'init' first or all pages are scraped.");
                return Ok(());
            }
            let fetcher = fetcher::Fetcher::new(&settings.fetch)?;
            let stats = fetcher::scrape_pages(&conn, &fetcher, limit).await?;
            println!(
                "Done: {} fetched ({} ok, {} errors).",
                stats.total, stats.ok, stats.errors
            );
            Ok(())
        }
        Commands::Process { limit } => {
            let conn = open(&settings)?;
            let fetcher = fetcher::Fetcher::new(&settings.fetch)?;
            let notifier = Notifier::from_settings(&settings.notify, fetcher.client().clone());
            let summary = process_and_notify(&conn, &settings, limit, notifier).await?;
            print_summary(&summary);
            Ok(())
        }
        Commands::Run { limit } => {
            let conn = open(&settings)?;
            let fetcher = fetcher::Fetcher::new(&settings.fetch)?;

            // Phase 1: Fetch (saved row by row)
            let t_scrape = Instant::now();
            let stats = fetcher::scrape_pages(&conn, &fetcher, limit).await?;
            println!(
                "Fetched {} pages ({} ok, {} errors) in {:.1}s",
                stats.total, stats.ok, stats.errors, t_scrape.elapsed().as_secs_f64()
            );

            // Phase 2: Extract everything fetched so far
            let t_process = Instant::now();
            let notifier = Notifier::from_settings(&settings.notify, fetcher.client().clone());
            let summary = process_and_notify(&conn, &settings, None, notifier).await?;
            println!("Processed in {:.1}s", t_process.elapsed().as_secs_f64());
            print_summary(&summary);
            Ok(())
        }
        Commands::Parse { file } => {
            let html = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let row = parse_local(&file, &html);
            println!("{}", serde_json::to_string_pretty(&row)?);
            Ok(())
        }
        Commands::Show { id } => {
            let conn = open(&settings)?;
            match db::fetch_extraction(&conn, id)? {
                Some(row) => println!("{}", serde_json::to_string_pretty(&row)?),
                None => println!("No result for row {}.", id),
            }
            Ok(())
        }
        Commands::Stats => {
            let conn = open(&settings)?;
            let s = db::get_stats(&conn)?;
            println!("Total:        {}", s.total);
            println!("Visited:      {}", s.visited);
            println!("Unvisited:    {}", s.unvisited);
            println!("Fetched:      {}", s.scraped);
            println!("Fetch errors: {}", s.fetch_errors);
            println!("Processed:    {}", s.processed);
            for (kind, n) in &s.outcomes {
                println!("  {:<20} {}", kind.as_str(), n);
            }
            Ok(())
        }
        Commands::Overview { outcome, limit } => {
            let conn = open(&settings)?;
            let outcome = outcome
                .as_deref()
                .map(|o| {
                    OutcomeKind::parse(o).with_context(|| {
                        format!(
                            "Unknown outcome {:?}; expected one of: {}",
                            o,
                            OutcomeKind::ALL.map(|k| k.as_str()).join(", ")
                        )
                    })
                })
                .transpose()?;
            let rows = db::fetch_overview(&conn, outcome, limit)?;
            if rows.is_empty() {
                println!("No results found.");
                return Ok(());
            }
            print_overview(&rows);
            Ok(())
        }
        Commands::Export { out } => {
            let conn = open(&settings)?;
            let file = std::fs::File::create(&out)
                .with_context(|| format!("Failed to create {}", out.display()))?;
            let mut writer = std::io::BufWriter::new(file);
            let n = export_rows(&conn, settings.process.chunk_size, &mut writer)?;
            writer.flush()?;
            println!("Exported {} rows to {}", n, out.display());
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn open(settings: &Settings) -> anyhow::Result<Connection> {
    let conn = db::connect(&settings.db_path)?;
    db::init_schema(&conn)?;
    Ok(conn)
}

/// Process pending pages while a background task delivers events, then
/// send the single completion event and wait for delivery.
async fn process_and_notify(
    conn: &Connection,
    settings: &Settings,
    limit: Option<usize>,
    notifier: Notifier,
) -> anyhow::Result<BatchSummary> {
    let (events, dispatcher) = notifier.spawn();
    let summary = process_pages(conn, settings.process.chunk_size, limit, &events)?;
    let _ = events.send(Event::batch_completed(
        &settings.notify.completion_message,
        summary,
    ));
    drop(events);
    dispatcher.await?;
    Ok(summary)
}

fn process_pages(
    conn: &Connection,
    chunk_size: usize,
    limit: Option<usize>,
    events: &EventSender,
) -> anyhow::Result<BatchSummary> {
    use indicatif::{ProgressBar, ProgressStyle};
    use rayon::prelude::*;

    let pending = db::count_unprocessed(conn)?;
    let total = limit.map_or(pending, |n| n.min(pending));

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")?
            .progress_chars("#>-"),
    );

    let mut summary = BatchSummary::default();

    for chunk in Batches::new(conn, db::fetch_unprocessed_after, chunk_size).limit(limit) {
        let pages = chunk?;
        let rows: Vec<ExtractionRow> = pages.par_iter().map(parser::process_page).collect();
        db::save_extractions(conn, &rows)?;

        for row in &rows {
            summary.record(row.outcome);
            if let Some(event) = Event::record_failed(row) {
                let _ = events.send(event);
            }
        }
        pb.inc(rows.len() as u64);
    }

    pb.finish_and_clear();
    Ok(summary)
}

fn parse_local(path: &Path, html: &str) -> ExtractionRow {
    let page = db::ScrapedPage {
        page_id: 0,
        url: path.display().to_string(),
        slug: path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default(),
        html: None,
        error: None,
    };
    parser::build_row(&page, parser::extract::extract(html))
}

/// Write every result row as one JSON object per line, in row order.
fn export_rows(conn: &Connection, chunk_size: usize, out: &mut impl Write) -> anyhow::Result<usize> {
    let mut n = 0;
    for chunk in Batches::new(conn, db::fetch_extractions_after, chunk_size) {
        for row in chunk? {
            serde_json::to_writer(&mut *out, &row)?;
            out.write_all(b"\n")?;
            n += 1;
        }
    }
    Ok(n)
}

fn print_summary(s: &BatchSummary) {
    println!(
        "Saved {} rows: {} parsed, {} missing description, {} parse failures, {} fetch failures.",
        s.total, s.parsed, s.missing_description, s.parse_failures, s.fetch_failures,
    );
}

fn print_overview(rows: &[ExtractionRow]) {
    println!(
        "{:>5} | {:<24} | {:<19} | {:>3} | {:>3} | {:>5} | {:>7} | {:<30}",
        "#", "Slug", "Outcome", "Img", "Vid", "Tiers", "Top", "Description"
    );
    println!("{}", "-".repeat(118));

    for r in rows {
        let count = |c: Option<usize>| c.map(|n| n.to_string()).unwrap_or_else(|| "-".into());
        let tiers = r.pledge_amounts.as_ref().map(|p| p.len());
        let top = r
            .pledge_amounts
            .as_ref()
            .and_then(|p| p.iter().max())
            .map(|m| m.to_string())
            .unwrap_or_else(|| "-".into());
        let description = r.description.replace('\n', " ");

        println!(
            "{:>5} | {:<24} | {:<19} | {:>3} | {:>3} | {:>5} | {:>7} | {:<30}",
            r.page_id,
            truncate(&r.slug, 24),
            r.outcome.as_str(),
            count(r.image_count),
            count(r.video_count),
            count(tiers),
            top,
            truncate(&description, 30)
        );
    }

    println!("\n{} rows", rows.len());
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

// ── Tests ──
