//! # WarrantyDesk CLI (`wdx`)
//!
//! The `wdx` binary drives the ingestion service: database initialization,
//! terminal-driven mailbox scans, stored-document listing, and the HTTP
//! server.
//!
//! ## Usage
//!
//! ```bash
//! wdx --config ./config/wdx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `wdx init` | Create the SQLite database and run schema migrations |
//! | `wdx scan` | Run a synchronous mailbox scan for one owner |
//! | `wdx documents` | List stored warranty documents for one owner |
//! | `wdx serve` | Start the HTTP API server |
//!
//! The mailbox bearer credential for `wdx scan` is read from the
//! `WDX_MAILBOX_TOKEN` environment variable.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use warrantydesk::cache::VerdictCache;
use warrantydesk::classify::{ClassificationPipeline, HttpClassifier};
use warrantydesk::config::load_config;
use warrantydesk::db;
use warrantydesk::extract::PdfTextExtractor;
use warrantydesk::mailbox::HttpMailbox;
use warrantydesk::models::{ScanRequest, MAX_SCAN_RESULTS};
use warrantydesk::progress::ProgressMode;
use warrantydesk::scan::{run_scan, ScanContext};
use warrantydesk::server::run_server;
use warrantydesk::store::DocumentStore;

/// WarrantyDesk ingestion CLI: scan a mailbox for warranty documents and
/// manage the resulting catalog.
#[derive(Parser)]
#[command(
    name = "wdx",
    about = "WarrantyDesk — mailbox scanning and warranty-document ingestion",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/wdx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Run a synchronous mailbox scan for one owner.
    ///
    /// Pages through messages with PDF attachments, classifies each
    /// attachment, and stores accepted warranty documents. Progress is
    /// written to stderr when attached to a terminal.
    Scan {
        /// Owner whose catalog receives accepted documents.
        #[arg(long)]
        owner: String,

        /// Maximum messages to examine (clamped to the service limit).
        #[arg(long)]
        max_results: Option<u32>,

        /// Only messages on or after this date (YYYY-MM-DD).
        #[arg(long)]
        since: Option<String>,

        /// Only messages on or before this date (YYYY-MM-DD).
        #[arg(long)]
        until: Option<String>,
    },

    /// List stored warranty documents for one owner.
    Documents {
        #[arg(long)]
        owner: String,

        /// Maximum documents to list.
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },

    /// Start the HTTP API server.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&config.db.path).await?;
            db::run_migrations(&pool).await?;
            pool.close().await;
            println!("initialized {}", config.db.path.display());
        }

        Commands::Scan {
            owner,
            max_results,
            since,
            until,
        } => {
            let token = std::env::var("WDX_MAILBOX_TOKEN")
                .context("WDX_MAILBOX_TOKEN environment variable not set")?;

            let request = ScanRequest {
                owner_id: owner,
                max_results: max_results.unwrap_or(MAX_SCAN_RESULTS),
                start_date: parse_date(since.as_deref())?,
                end_date: parse_date(until.as_deref())?,
            };

            let pool = db::connect(&config.db.path).await?;
            db::run_migrations(&pool).await?;

            let ctx = ScanContext {
                mailbox: Arc::new(HttpMailbox::new(&config.mailbox, &token)?),
                pipeline: Arc::new(ClassificationPipeline::new(
                    Arc::new(VerdictCache::new()),
                    Arc::new(PdfTextExtractor),
                    Arc::new(HttpClassifier::new(&config.classifier)?),
                    config.classifier.max_excerpt_chars,
                )),
                store: DocumentStore::new(pool.clone()),
                sink: ProgressMode::default_for_tty().sink().into(),
                concurrency: config.scan.concurrency,
                batch_pause: Duration::from_millis(config.scan.batch_pause_ms),
                page_size: config.mailbox.page_size,
            };

            let report = run_scan(&ctx, request).await?;
            println!("scan complete");
            println!("  accepted: {} documents", report.total_accepted);
            for doc in &report.documents {
                println!(
                    "  {}  {}  (confidence {})",
                    doc.id, doc.filename, doc.confidence
                );
            }

            pool.close().await;
        }

        Commands::Documents { owner, limit } => {
            let pool = db::connect(&config.db.path).await?;
            let store = DocumentStore::new(pool.clone());

            let total = store.count(&owner).await?;
            let documents = store.list(&owner, limit).await?;

            println!("{} documents for {}", total, owner);
            for doc in &documents {
                let product = doc.product_name_guess.as_deref().unwrap_or("-");
                let expires = doc.expiration_date_guess.as_deref().unwrap_or("-");
                println!(
                    "  {}  {}  product: {}  expires: {}",
                    doc.id, doc.filename, product, expires
                );
            }

            pool.close().await;
        }

        Commands::Serve => {
            let pool = db::connect(&config.db.path).await?;
            db::run_migrations(&pool).await?;
            run_server(&config, DocumentStore::new(pool)).await?;
        }
    }

    Ok(())
}

fn parse_date(value: Option<&str>) -> Result<Option<chrono::NaiveDate>> {
    match value {
        None => Ok(None),
        Some(raw) => chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map(Some)
            .with_context(|| format!("invalid date '{}', expected YYYY-MM-DD", raw)),
    }
}
