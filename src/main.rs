//! Crush Bot - Main Entry Point
//!
//! Signs in as a Telegram bot and serves group chats until interrupted.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use dialoguer::Password;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crush_bot::backup::{BackupManager, BackupPlan};
use crush_bot::bot::{BotServices, Dispatcher};
use crush_bot::config::{BotSettings, ContentConfig, TelegramConfig};
use crush_bot::logging;
use crush_bot::scheduler::{MaintenanceScheduler, SchedulerMessage};
use crush_bot::stats::StatsEngine;
use crush_bot::storage::{AssetLayout, DataLayout, Database};
use crush_bot::telegram::{ChatGateway, TelegramBot};

/// Telegram group bot with moderation, auto-replies, greetings and ranks.
#[derive(Parser, Debug)]
#[command(name = "crush_bot")]
#[command(about = "Run the Crush Telegram group bot")]
#[command(version)]
struct Args {
    /// Path to the .env file for environment variables.
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long)]
    log_level: Option<String>,

    /// Write example content files into DIR and exit.
    #[arg(long, value_name = "DIR")]
    generate_content: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Environment first so RUST_LOG from .env reaches the filter
    let env_loaded = dotenvy::from_path(&args.env_file);
    let settings = BotSettings::from_env_with_defaults();
    let layout = DataLayout::new(&settings.data_dir);
    // Content generation is a one-off and leaves the data directory alone.
    let logs_dir = args.generate_content.is_none().then(|| layout.logs_dir());
    let _log_guards = logging::init(
        args.log_level.as_deref().unwrap_or(&settings.log_level),
        logs_dir.as_deref(),
    )
    .context("Failed to initialize logging")?;
    if let Err(e) = env_loaded {
        debug!("Could not load .env file ({}): {}", args.env_file.display(), e);
    }

    if let Some(dir) = args.generate_content {
        return generate_example_content(&dir);
    }

    let tg_config = TelegramConfig::from_env()
        .context("Failed to load Telegram configuration from environment")?;

    layout.ensure().context("Failed to prepare data directory")?;
    AssetLayout::new(&settings.assets_dir)
        .ensure()
        .context("Failed to prepare assets directory")?;

    let content = ContentConfig::load_from_dir(&settings.content_dir)
        .context("Failed to load content files")?;
    content.validate().context("Content validation failed")?;
    info!(
        "Loaded {} auto-reply rules, {} bad words from {}",
        content.auto_reply.patterns.len(),
        content.moderation.badwords.words.len(),
        settings.content_dir.display()
    );

    let database = Database::open(layout.database_file()).context("Failed to open database")?;
    let stats = StatsEngine::load(layout.usage_file()).context("Failed to load statistics")?;
    let backups = BackupManager::new(BackupPlan::for_layout(
        &layout,
        &settings.content_dir,
        &args.env_file,
        settings.backup_retention_days,
    ));

    // Connect to Telegram
    let bot = TelegramBot::connect(&tg_config, settings.min_send_interval_ms)
        .await
        .context("Failed to connect to Telegram")?;

    if !bot.is_authorized().await.context("Failed to check authorization")? {
        authenticate(&bot, &tg_config).await?;
    }

    let identity = bot.identity().await.context("Failed to fetch bot identity")?;
    info!(
        "Signed in as {} (@{}, id {})",
        identity.name,
        identity.username.as_deref().unwrap_or("-"),
        identity.user_id
    );
    if settings.admin_ids.is_empty() {
        warn!("ADMIN_IDS is empty, admin commands are disabled");
    }

    let events = bot
        .take_events()
        .await
        .context("Update stream already taken")?;

    let bot = Arc::new(bot);
    let services = Arc::new(BotServices::new(
        settings, identity, content, database, stats, backups,
    ));
    let gateway: Arc<dyn ChatGateway> = Arc::clone(&bot);
    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&services), Arc::clone(&gateway)));

    let (scheduler_tx, scheduler_rx) = mpsc::channel::<SchedulerMessage>(8);
    let scheduler = MaintenanceScheduler::new(Arc::clone(&services), gateway);
    let scheduler_handle = tokio::spawn(async move {
        scheduler.run(scheduler_rx).await;
    });

    info!("Bot is running. Use Ctrl+C to stop.");

    dispatcher
        .serve(events, async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C, shutting down..."),
                Err(e) => {
                    warn!("Could not listen for Ctrl+C: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        })
        .await;

    // Cleanup
    info!("Shutting down...");
    if scheduler_tx.send(SchedulerMessage::Shutdown).await.is_err() {
        debug!("Scheduler already stopped");
    }
    if let Err(e) = scheduler_handle.await {
        warn!("Scheduler task failed: {}", e);
    }
    bot.disconnect();

    Ok(())
}

/// Writes the example content files.
fn generate_example_content(dir: &Path) -> Result<()> {
    ContentConfig::example()
        .save_to_dir(dir)
        .with_context(|| format!("Failed to write content to {}", dir.display()))?;

    println!("✓ Example content written to: {}", dir.display());
    println!("\nTo use this bot:");
    println!("1. Point CONTENT_DIR at {} (or copy the files to ./content)", dir.display());
    println!("2. Edit the replies, greetings and word lists to your liking");
    println!("3. Create a .env file with TG_API_ID, TG_API_HASH, BOT_TOKEN and ADMIN_IDS");
    println!("4. Run: crush_bot");

    Ok(())
}

/// Signs in with the bot token, prompting for it when it is not configured.
async fn authenticate(bot: &TelegramBot, config: &TelegramConfig) -> Result<()> {
    info!("Authentication required");

    let token = match &config.bot_token {
        Some(token) => token.clone(),
        None => Password::new()
            .with_prompt("Enter the bot token from @BotFather")
            .interact()?,
    };

    bot.bot_sign_in(&token, &config.api_hash)
        .await
        .context("Bot sign-in failed")?;
    Ok(())
}
