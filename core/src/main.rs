/// ChatSync replay driver - feeds a JSON Lines script through the sync core
use anyhow::Context;
use chatsync_core::chat_types::UserRef;
use chatsync_core::clock::parse_server_timestamp;
use chatsync_core::replay::{ReplaySession, StepReport};
use chatsync_core::SyncConfig;
use colored::Colorize;
use std::env;
use std::fs::File;
use std::io::{self, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries the report
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage(args.first().map(String::as_str).unwrap_or("chatsync"));
        return Ok(());
    }

    let config = SyncConfig::from_args(&args)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    let viewer = UserRef::new(
        env::var("CHATSYNC_VIEWER_ID").unwrap_or_else(|_| "me".to_string()),
        env::var("CHATSYNC_VIEWER_NAME").unwrap_or_else(|_| "Me".to_string()),
    );

    let start = parse_server_timestamp(flag_value(&args, "--start").unwrap_or(DEFAULT_START))
        .map_err(|e| anyhow::anyhow!("Invalid --start: {}", e))?;

    let steps = match flag_value(&args, "--script") {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("opening script {}", path))?;
            ReplaySession::parse_script(BufReader::new(file))?
        }
        None => ReplaySession::parse_script(io::stdin().lock())?,
    };

    info!("Replaying {} steps as {}", steps.len(), viewer.id);
    let mut session = ReplaySession::new(viewer, config, start);
    for report in session.run(steps) {
        print_report(&report)?;
    }

    println!("{}", "Outbound frames".bright_white().bold());
    for frame in session.sent() {
        println!("     {} {}", "↑".yellow(), frame.to_json()?);
    }

    println!("{}", "Final snapshot".bright_white().bold());
    println!("{}", serde_json::to_string_pretty(&session.snapshot())?);
    Ok(())
}

/// Replay clock start unless `--start` says otherwise
const DEFAULT_START: &str = "2024-01-01T09:00:00Z";

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn print_report(report: &StepReport) -> anyhow::Result<()> {
    println!(
        "{} {}",
        format!("{:>4}", report.line).dimmed(),
        report.event.cyan()
    );
    for effect in &report.effects {
        println!("     {} {}", "→".green(), serde_json::to_string(effect)?);
    }
    Ok(())
}

fn print_usage(bin: &str) {
    println!("{}", "ChatSync replay".bright_cyan().bold());
    println!();
    println!("{}", "Usage:".bright_white().bold());
    println!("  {} [--script <file>] [--start <rfc3339>] [options]", bin.cyan());
    println!();
    println!("{}", "Options:".bright_white().bold());
    println!("  {} <file>          JSON config file, flags override it", "--config".cyan());
    println!("  {} <ms>     Typing signal lifetime", "--typing-ttl-ms".cyan());
    println!("  {} <ms>    Typing expiry check interval", "--typing-tick-ms".cyan());
    println!("  {} <n>   Near-bottom distance", "--scroll-threshold".cyan());
    println!("  {} <n>      Buffered typing events while offline", "--typing-buffer".cyan());
    println!("  {}            Keep history as-is after reconnect", "--no-refetch".cyan());
    println!();
    println!(
        "  Script lines are JSON steps; {} is read when no script is given.",
        "stdin".yellow()
    );
}
