//! Operator CLI for the job pipeline's schema migrations and the offline
//! dead-letter/stuck-job reconciliation path (spec §4.3 point 6: "a separate
//! offline path (out of scope) can reconcile stuck `processing` jobs").
//!
//! This is a trimmed-down sibling of the teacher's data-migration backfill
//! CLI: there is no per-row backfill workflow here, just schema migrations
//! and the two read/write operator actions this pipeline actually needs.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use server_core::domains::jobs::{JobStore, PostgresJobStore, PostgresWorkQueue, WorkQueue};
use server_core::Config;
use sqlx::PgPool;

#[derive(Parser)]
#[command(name = "migrate_cli")]
#[command(about = "Schema migrations and operator reconciliation for the job pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending sqlx migrations.
    Run,

    /// List dead-letter sink contents (spec §4.2).
    List,

    /// Mark `processing` jobs stuck since before `--older-than-minutes` as
    /// `failed(dead_lettered)`.
    Reconcile {
        #[arg(long, default_value_t = 60)]
        older_than_minutes: i64,
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Serialize)]
struct Response {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    job_ids: Option<Vec<String>>,
}

fn output(resp: Response) {
    println!("{}", serde_json::to_string(&resp).unwrap());
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run => cmd_run().await,
        Commands::List => cmd_list().await,
        Commands::Reconcile {
            older_than_minutes,
            dry_run,
        } => cmd_reconcile(older_than_minutes, dry_run).await,
    }
}

async fn get_pool() -> Result<PgPool> {
    let config = Config::from_env()?;
    PgPool::connect(&config.database_url)
        .await
        .context("Failed to connect to database")
}

async fn cmd_run() -> Result<()> {
    let pool = get_pool().await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    output(Response {
        success: true,
        message: Some("migrations applied".to_string()),
        count: None,
        job_ids: None,
    });
    Ok(())
}

async fn cmd_list() -> Result<()> {
    let pool = get_pool().await?;
    let queue = PostgresWorkQueue::new(pool, std::time::Duration::from_secs(90), 3);
    let dead_letters = queue.dead_letters().await?;

    output(Response {
        success: true,
        message: None,
        count: Some(dead_letters.len()),
        job_ids: Some(dead_letters.iter().map(|d| d.job_id.to_string()).collect()),
    });
    Ok(())
}

async fn cmd_reconcile(older_than_minutes: i64, dry_run: bool) -> Result<()> {
    let pool = get_pool().await?;
    let store = PostgresJobStore::new(pool);
    let threshold = Utc::now() - chrono::Duration::minutes(older_than_minutes);

    if dry_run {
        output(Response {
            success: true,
            message: Some(format!(
                "dry run: would reconcile jobs stuck in processing before {threshold}"
            )),
            count: None,
            job_ids: None,
        });
        return Ok(());
    }

    let reconciled = store.reconcile_stuck_jobs(threshold).await?;
    output(Response {
        success: true,
        message: Some(format!("reconciled {} stuck job(s)", reconciled.len())),
        count: Some(reconciled.len()),
        job_ids: Some(reconciled.iter().map(|id| id.to_string()).collect()),
    });
    Ok(())
}
