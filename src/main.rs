//! steadyfetch - resilient caching client for a rate-limited HTTP API
//!
//! Thin command-line front end over [`ResilientClient`]: each subcommand runs
//! one client operation and prints the result.

use std::error::Error;
use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use steadyfetch::cli::{default_log_filter, resolve_config, Cli, Command};
use steadyfetch::{AppError, ResilientClient};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr so fetched bodies on stdout stay clean
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_log_filter(cli.verbose).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<AppError>() {
                Some(app_err) => {
                    debug!(error = %app_err, "Command failed");
                    eprintln!("error: {}", app_err.user_message());
                }
                None => eprintln!("error: {}", e),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let config = resolve_config(&cli)?;
    let client = ResilientClient::new(config)?;

    match cli.command {
        Command::Fetch { path } => {
            let body = client.fetch(&path).await?;
            println!("{}", body);
        }
        Command::FetchBinary { url, output } => {
            let data = client.fetch_binary(&url).await?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, &data).await?;
                    debug!(path = %path.display(), bytes = data.len(), "Wrote asset");
                }
                None => {
                    let mut stdout = std::io::stdout().lock();
                    stdout.write_all(&data)?;
                    stdout.flush()?;
                }
            }
        }
        Command::Stats { json } => {
            let stats = client.statistics().await?;
            let breaker = client.breaker_snapshot();
            if json {
                let report = serde_json::json!({
                    "cache": stats,
                    "circuit": {
                        "state": format!("{:?}", breaker.state),
                        "consecutive_failures": breaker.consecutive_failures,
                    },
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "Text cache:       {} entries, {} bytes",
                    stats.text_entries, stats.text_bytes
                );
                println!(
                    "Binary (memory):  {} entries, {} bytes",
                    stats.binary_memory_entries, stats.binary_memory_bytes
                );
                println!(
                    "Binary (disk):    {} entries, {} bytes",
                    stats.disk_entries, stats.disk_bytes
                );
                println!(
                    "Memory lookups:   {} hits, {} misses, {} evictions",
                    stats.memory_hits, stats.memory_misses, stats.memory_evictions
                );
                println!("Circuit:          {:?}", breaker.state);
            }
        }
        Command::Clear => {
            client.clear_caches().await?;
            println!("Caches cleared");
        }
        Command::Cleanup => {
            let report = client.cleanup_caches().await?;
            println!(
                "Removed {} expired entries (text {}, binary {}, disk {})",
                report.total(),
                report.text_expired,
                report.binary_expired,
                report.disk_removed
            );
        }
    }

    Ok(())
}
