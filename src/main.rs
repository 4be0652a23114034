//! Cloud Backup Restore Tool
//!
//! Restores an account's chat database and media from a cloud backup folder

// cloudrestore/src/main.rs
mod config;
mod errors;
mod presentation;
mod remote;
mod restore;
mod telemetry;
#[cfg(test)]
mod test_support;

use anyhow::{Context, Result};
use config::AppConfig;
use restore::flags::{FlagStore, JsonFlagStore};
use restore::logic::{Outcome, SessionReport};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "config.json";

/// Main entry point for the restore tool
#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match run_app().await {
        Ok(true) => {
            println!("✅ Operation completed successfully.");
            ExitCode::SUCCESS
        }
        Ok(false) => {
            eprintln!("❌ Restore did not complete.");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app() -> Result<bool> {
    let config_path = env::var("CLOUDRESTORE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
    let app_config = AppConfig::load_from_json(&config_path)
        .context(format!("Failed to load application configuration from {}", config_path.display()))?;

    let args: Vec<String> = env::args().collect();
    let choice = if args.len() > 1 {
        args[1].trim().to_string()
    } else {
        prompt_choice()?
    };

    match choice.as_str() {
        "1" | "restore" => {
            println!("🔄 Starting Restore Process...");
            let report = restore::run_restore_flow(&app_config)
                .await
                .context("Restore process failed")?;
            print_report(&report)
        }
        "2" | "skip" => {
            println!("⏭️ Skipping Restore...");
            let report = restore::run_skip_flow(&app_config)
                .await
                .context("Skip failed")?;
            print_report(&report)
        }
        "3" | "status" => {
            print_status(&app_config)?;
            Ok(true)
        }
        _ => {
            println!("❌ Invalid choice. Please enter '1' (restore), '2' (skip), or '3' (status).");
            anyhow::bail!("Invalid operation choice");
        }
    }
}

fn print_report(report: &SessionReport) -> Result<bool> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize session report")?;
    println!("{}", json);
    Ok(!matches!(report.outcome, Outcome::Failed { .. }))
}

fn print_status(app_config: &AppConfig) -> Result<()> {
    let layout = &app_config.restore.layout;
    let flags = JsonFlagStore::new(layout.flags_path())
        .load()
        .context("Failed to read restore flags")?;

    println!("Account:            {}", app_config.restore.account_id);
    println!("Cloud container:    {}", app_config.restore.container_root.display());
    println!("Signed in:          {}", app_config.restore.identity_token.is_some());
    println!("Local database:     {}", layout.database_path().display());
    println!("Database pending:   {}", flags.database_restore_pending);
    println!("Media pending:      {}", flags.media_restore_pending);
    Ok(())
}

/// Prompts user to select an operation
///
/// Returns the user's choice as String
fn prompt_choice() -> Result<String> {
    use std::io::{Write, stdin, stdout};

    println!("Select an operation:");
    println!("1. Restore from cloud backup (or type 'restore')");
    println!("2. Skip restore (or type 'skip')");
    println!("3. Show restore status (or type 'status')");
    print!("Enter your choice: ");
    stdout().flush().context("Failed to flush stdout")?;

    let mut input = String::new();
    stdin().read_line(&mut input).context("Failed to read user input")?;
    Ok(input.trim().to_string())
}
