//! relq – operator tool for relq queues.
//
//  $ relq clean --every 60
//  $ relq stats emails thumbnails
//  $ relq publish emails '{"to":"ops@example.com"}'
//  $ relq return-rejected emails --count 100
use std::future::Future;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use relq::logging::init_logging;
use relq::{load_config, Cleaner, Config, Connection};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "relq", version, about = "relq queue operator tool")]
struct Cli {
    /// Path to config TOML (env RELQ_CONFIG overrides)
    #[arg(short, long, global = true, default_value = "relq.toml")]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Return unacked deliveries of dead connections to their queues.
    Clean {
        /// Keep running, cleaning every SECS seconds (config default when 0).
        #[arg(long, value_name = "SECS")]
        every: Option<u64>,
    },
    /// Print queue and connection statistics.
    Stats {
        #[arg(required = true)]
        queues: Vec<String>,
    },
    /// Publish one payload.
    Publish { queue: String, payload: String },
    /// Drop every ready payload of a queue.
    PurgeReady { queue: String },
    /// Drop every rejected payload of a queue.
    PurgeRejected { queue: String },
    /// Move rejected payloads back to ready.
    ReturnRejected {
        queue: String,
        /// Number of payloads to move (all when omitted).
        #[arg(long)]
        count: Option<u64>,
    },
}

fn resolve_config(path: String) -> anyhow::Result<Config> {
    let path: String = std::env::var("RELQ_CONFIG").unwrap_or(path);
    if Path::new(&path).exists() {
        load_config(&path).with_context(|| format!("failed to load config {path}"))
    } else {
        warn!(target: "relq::cli", path = %path, "Config file not found, using defaults");
        Ok(Config::default())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();
    let cfg = resolve_config(cli.config)?;

    let connection = Connection::connect("relq-cli", &cfg.store.url, cfg.connection_options())
        .await
        .with_context(|| format!("failed to open connection to {}", cfg.store.url))?;

    let result = run(&connection, &cfg, cli.cmd).await;
    finish(&connection, result).await
}

/// Tears the connection down and hands back the command's own result.
async fn finish(connection: &Connection, result: anyhow::Result<()>) -> anyhow::Result<()> {
    // the CLI never consumes, so nothing is left for a cleaner to reclaim
    if let Err(e) = connection.stop_heartbeat().await {
        warn!(target: "relq::cli", error = %e, "Failed to stop heartbeat");
    }
    if let Err(e) = connection.close().await {
        warn!(target: "relq::cli", error = %e, "Failed to close connection");
    }
    result
}

async fn run(connection: &Connection, cfg: &Config, cmd: Command) -> anyhow::Result<()> {
    match cmd {
        Command::Clean { every: None } => {
            let report = Cleaner::new(connection).clean().await?;
            println!(
                "cleaned {} connection(s), returned {} deliveries",
                report.connections.len(),
                report.returned
            );
        }
        Command::Clean { every: Some(secs) } => {
            let secs = if secs == 0 { cfg.cleaner.interval_secs } else { secs };
            clean_forever(connection, Duration::from_secs(secs.max(1))).await;
        }
        Command::Stats { queues } => {
            let names: Vec<&str> = queues.iter().map(String::as_str).collect();
            let stats = connection.collect_stats(&names).await?;
            print!("{stats}");
        }
        Command::Publish { queue, payload } => {
            connection.open_queue(&queue).await?.publish(payload).await?;
            println!("published to {queue}");
        }
        Command::PurgeReady { queue } => {
            let purged = connection.open_queue(&queue).await?.purge_ready().await?;
            println!("purged {purged} ready deliveries from {queue}");
        }
        Command::PurgeRejected { queue } => {
            let purged = connection.open_queue(&queue).await?.purge_rejected().await?;
            println!("purged {purged} rejected deliveries from {queue}");
        }
        Command::ReturnRejected { queue, count } => {
            let queue = connection.open_queue(&queue).await?;
            let returned = match count {
                Some(count) => queue.return_rejected(count).await?,
                None => queue.return_all_rejected().await?,
            };
            println!("returned {returned} rejected deliveries to {}", queue.name());
        }
    }
    Ok(())
}

async fn clean_forever(connection: &Connection, every: Duration) {
    info!(target: "relq::cli", ?every, "Cleaner running, Ctrl-C to stop");
    clean_until(&Cleaner::new(connection), every, tokio::signal::ctrl_c()).await;
}

/// Cleans every `every` until `shutdown` resolves, including mid-pass.
async fn clean_until<F: Future>(cleaner: &Cleaner, every: Duration, shutdown: F) {
    let mut ticker = tokio::time::interval(every);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!(target: "relq::cli", "Shutdown requested");
                break;
            }
            _ = ticker.tick() => {}
        }

        tokio::select! {
            _ = &mut shutdown => {
                info!(target: "relq::cli", "Shutdown requested during clean pass");
                break;
            }
            result = cleaner.clean() => match result {
                Ok(report) if !report.connections.is_empty() => {
                    info!(target: "relq::cli", cleaned = report.connections.len(), returned = report.returned, "Clean pass");
                }
                Ok(_) => {}
                Err(e) => warn!(target: "relq::cli", error = %e, "Clean pass failed"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use relq::{ConnectionOptions, MemoryStore};

    use super::*;

    async fn open(store: &Arc<MemoryStore>, tag: &str) -> Connection {
        Connection::open(tag, store.clone(), ConnectionOptions::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn finish_keeps_command_error_when_cleanup_fails() {
        let store = Arc::new(MemoryStore::new());
        let connection = open(&store, "cli").await;

        store.set_offline(true);
        let result = finish(&connection, Err(anyhow::anyhow!("publish failed"))).await;
        let err = result.unwrap_err();
        assert_eq!(err.to_string(), "publish failed");
    }

    #[tokio::test]
    async fn finish_unregisters_on_success() {
        let store = Arc::new(MemoryStore::new());
        let connection = open(&store, "cli").await;

        finish(&connection, Ok(())).await.unwrap();
        assert!(!connection.check().await.unwrap());
        assert!(connection.connections().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clean_until_runs_passes_and_stops_on_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let observer = open(&store, "observer").await;
        let dead = open(&store, "dead").await;
        dead.stop_heartbeat().await.unwrap();

        let cleaner = Cleaner::new(&observer);
        tokio::time::timeout(
            Duration::from_secs(2),
            clean_until(&cleaner, Duration::from_millis(10), tokio::time::sleep(Duration::from_millis(50))),
        )
        .await
        .unwrap();

        assert_eq!(
            observer.connections().await.unwrap(),
            vec![observer.name().to_string()]
        );
    }
}
