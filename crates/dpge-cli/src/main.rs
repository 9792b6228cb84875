//! DPGE CLI - Train and query dual-perspective graph embeddings.

use anyhow::Context;
use clap::Parser;
use dpge_cli::commands;
use dpge_cli::{Cli, Command, Formatter, Settings};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Logs go to stderr so stdout stays clean for JSON output
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load(cli.config.as_deref()).context("loading settings")?;

    let format = cli.format.map(Into::into).unwrap_or(settings.output.format);
    let color_enabled = !cli.no_color && settings.output.color;
    let formatter = Formatter::new(format, color_enabled);

    // Ctrl+C asks training to stop after the current epoch
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Stop requested; finishing the current epoch");
            flag.store(true, Ordering::SeqCst);
        }
    });

    let outcome = tokio::task::spawn_blocking(move || match cli.command {
        Command::Train(args) => commands::execute_train(args, &settings, &formatter, stop),
        Command::Update(args) => commands::execute_update(args, &settings, &formatter, stop),
        Command::Evaluate(args) => commands::execute_evaluate(args, &settings, &formatter),
        Command::Recommend(args) => commands::execute_recommend(args, &settings, &formatter),
        Command::Inspect(args) => commands::execute_inspect(args, &settings, &formatter),
    })
    .await
    .context("command thread panicked")?;

    Ok(outcome?)
}
