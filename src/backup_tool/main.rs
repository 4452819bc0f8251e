//! Standalone backup runner for cron jobs.
//!
//! Archives the bot's database, logs, statistics, content files and `.env`
//! the same way the running bot does, then prunes old archives.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::SystemTime;

use chrono::Local;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crush_bot::backup::{BackupManager, BackupPlan, DEFAULT_RETENTION_DAYS};
use crush_bot::storage::DataLayout;

/// Crush bot backup tool.
#[derive(Parser, Debug)]
#[command(name = "crush_backup")]
#[command(about = "Creates a timestamped tar.gz backup of the bot's data")]
#[command(version)]
struct Args {
    /// Directory the bot runs from (holds data/, content/ and .env).
    #[arg(short, long, default_value = ".")]
    source_root: PathBuf,

    /// Where archives are written. Defaults to <source-root>/data/backups.
    #[arg(short, long)]
    backup_root: Option<PathBuf>,

    /// Days to keep old archives.
    #[arg(short, long, default_value_t = DEFAULT_RETENTION_DAYS)]
    retention_days: u64,

    /// Show what would be archived and pruned without writing anything.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let layout = DataLayout::new(args.source_root.join("data"));
    let mut plan = BackupPlan::for_layout(
        &layout,
        &args.source_root.join("content"),
        &args.source_root.join(".env"),
        args.retention_days,
    );
    if let Some(root) = args.backup_root {
        plan.backup_root = root;
    }

    if args.dry_run {
        print_plan(&plan);
        return ExitCode::SUCCESS;
    }

    let manager = BackupManager::new(plan);
    match manager.run(Local::now()).await {
        Ok(report) => {
            println!("✓ {}", report.archive.display());
            println!("{}", report.summary());
            for path in &report.skipped {
                println!("  ⚠ missing: {}", path.display());
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Backup failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn print_plan(plan: &BackupPlan) {
    println!("Backup root: {}", plan.backup_root.display());
    println!("Retention:   {} days\n", plan.retention_days);

    let (present, missing) = plan.partition_sources();
    for source in present {
        println!("  ✓ {} -> {}", source.path.display(), source.name);
    }
    for source in missing {
        println!("  ⚠ {} (missing, skipped)", source.path.display());
    }

    let expired = plan.expired_archives(SystemTime::now());
    if expired.is_empty() {
        println!("\nNo archives to prune.");
    } else {
        println!("\nWould prune {} archive(s):", expired.len());
        for path in expired {
            println!("  - {}", path.display());
        }
    }
}
