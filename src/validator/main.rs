//! Standalone validator for the bot's JSON content files.
//!
//! Loads `auto_reply.json`, `welcome.json`, `goodbye.json` and
//! `moderation.json` from a directory and reports every problem found.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;

use crush_bot::config::{ContentConfig, ContentError};

/// Content file validator.
#[derive(Parser, Debug)]
#[command(name = "validate_content")]
#[command(about = "Validates content files for the Crush Telegram bot")]
#[command(version)]
struct Args {
    /// Directory holding the content JSON files.
    #[arg(short, long, default_value = "content")]
    dir: PathBuf,

    /// Show details for every rule and template.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    validate_dir(&args.dir, args.verbose)
}

fn validate_dir(dir: &Path, verbose: bool) -> ExitCode {
    println!("Validating: {}\n", dir.display());

    let content = match ContentConfig::load_from_dir(dir) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("✗ Failed to load content: {e}");
            return ExitCode::FAILURE;
        }
    };

    if verbose {
        print_details(&content);
    }

    let problems: Vec<ContentError> = content.validate_all();
    if problems.is_empty() {
        println!("✓ Content is valid!");
        println!("  Auto-reply rules: {}", content.auto_reply.patterns.len());
        println!("  Welcome templates: {}", content.welcome.templates.len());
        println!("  Goodbye templates: {}", content.goodbye.templates.len());
        println!("  Bad words: {}", content.moderation.badwords.words.len());
        ExitCode::SUCCESS
    } else {
        for problem in &problems {
            println!("  ✗ {problem}");
        }
        println!("\n✗ Validation failed: {} problem(s)", problems.len());
        ExitCode::FAILURE
    }
}

fn print_details(content: &ContentConfig) {
    for (id, rule) in &content.auto_reply.patterns {
        println!(
            "[{id}] {} pattern(s) -> \"{}\"",
            rule.patterns.len(),
            truncate(&rule.response, 40)
        );
    }
    for (name, greeting) in [("welcome", &content.welcome), ("goodbye", &content.goodbye)] {
        let state = if greeting.enabled { "enabled" } else { "disabled" };
        println!("[{name}] {} template(s), {state}", greeting.templates.len());
    }
    println!();
}

/// Truncates a string for display.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_owned()
    } else {
        format!("{}...", s.chars().take(max_len).collect::<String>())
    }
}
