//! conveyer CLI: runs a conveyer over JSON-lines work items.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use conveyer::config::Config;
use conveyer::log::{Log, LogHub, LogRecord};
use conveyer::queue::{JsonLinesQueue, Queue};
use conveyer::repo::CommandRepo;
use conveyer::telemetry::{TelemetryConfig, init_telemetry, metrics};
use conveyer::users::{MemoryUsers, Users};
use conveyer::{Conveyer, DispatchStatus};
use tracing::info;

#[derive(Parser)]
#[command(name = "conveyer", about = "Horizontally scalable job conveyer")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Drain work items and run them until input ends or Ctrl-C
    Serve {
        /// TOML table of known users; without it every owner is accepted
        #[arg(long)]
        users: Option<PathBuf>,
        /// Maximum jobs running at once (overrides CONVEYER_MAX_CONCURRENT)
        #[arg(long)]
        max_concurrent: Option<usize>,
        /// File with one JSON work item per line; "-" reads stdin
        #[arg(long, default_value = "-")]
        input: String,
    },
}

/// Prints job output as `[owner/unit] message`.
struct StdoutLog;

impl Log for StdoutLog {
    fn push(&self, record: LogRecord) {
        // Records outside a job already reach stderr through the fmt layer.
        if let Some(job) = record.job {
            println!("[{}/{}] {}", job.owner, job.unit, record.message);
        }
    }
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            users,
            max_concurrent,
            input,
        } => cmd_serve(users, max_concurrent, input),
    }
}

fn cmd_serve(
    users: Option<PathBuf>,
    max_concurrent: Option<usize>,
    input: String,
) -> anyhow::Result<()> {
    let mut config = Config::from_env()?;
    if let Some(n) = max_concurrent {
        anyhow::ensure!(n > 0, "--max-concurrent must be at least 1");
        config.max_concurrent = n;
    }

    // Hosts the OTLP exporters and signal handling; jobs run on the
    // conveyer's own pool.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("conveyer-main")
        .enable_all()
        .build()?;

    let hub = LogHub::new();
    let _guard = runtime.block_on(async {
        init_telemetry(TelemetryConfig {
            endpoint: config.otel_endpoint.clone(),
            service_name: "conveyer".to_string(),
            log_level: config.log_level.clone(),
            hub: hub.clone(),
        })
    })?;

    let users: Arc<dyn Users> = match users {
        Some(path) => Arc::new(MemoryUsers::load(&path)?),
        None => Arc::new(MemoryUsers::anonymous()),
    };

    let queue: Arc<dyn Queue> = if input == "-" {
        Arc::new(JsonLinesQueue::new(tokio::io::BufReader::new(
            tokio::io::stdin(),
        )))
    } else {
        let file = std::fs::File::open(&input)
            .map_err(|e| anyhow::anyhow!("cannot open input {input}: {e}"))?;
        Arc::new(JsonLinesQueue::new(tokio::io::BufReader::new(
            tokio::fs::File::from_std(file),
        )))
    };

    let conveyer = Conveyer::new(
        queue,
        Arc::new(CommandRepo),
        users,
        Arc::new(StdoutLog),
        config.conveyer_config(hub),
    )?;
    conveyer.register(&metrics::meter())?;
    conveyer.start()?;

    let mut status = conveyer.subscribe();
    runtime.block_on(async {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("interrupted, shutting down"),
            _ = async {
                let _ = status.wait_for(DispatchStatus::is_terminal).await;
                // Input ended: let submitted jobs print before the log detaches.
                conveyer.idle().await;
            } => {}
        }
    });

    if let DispatchStatus::Failed(reason) = conveyer.status() {
        info!(%reason, "ingestion ended");
    }
    conveyer.close()?;

    let stats = conveyer.stats();
    println!(
        "{} submitted, {} done, {} failed",
        stats.submitted, stats.done, stats.failed
    );
    Ok(())
}
