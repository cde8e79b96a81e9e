use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use redchan::{config, Channel, ChannelError, MetricsRegistry};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "redchan", about = "Bounded FIFO channel over KeyDB/Redis")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "/etc/redchan/config.yaml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Push one raw value.
    Push { value: String },
    /// Pop one value; prints nothing if the channel is empty.
    Pop,
    /// Print the current channel length.
    Len,
    /// Delete the channel.
    Clear,
    /// Check that the store answers.
    Ping,
    /// Run a producer, a consumer and a length monitor until interrupted.
    Demo {
        /// Pause between consumer pops, in milliseconds.
        #[arg(long, default_value_t = 500)]
        consume_every_ms: u64,
    },
}

// ---------------------------------------------------------------------------
// Graceful shutdown
// ---------------------------------------------------------------------------

/// Cancel `shutdown` on the first SIGINT or SIGTERM.
async fn cancel_on_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    let terminate = {
        let sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .map_err(|e| {
                tracing::warn!(error = %e, "SIGTERM handler unavailable, only Ctrl+C stops redchan");
            })
            .ok();
        async move {
            match sigterm {
                Some(mut stream) => {
                    stream.recv().await;
                    "SIGTERM"
                }
                None => std::future::pending().await,
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<&'static str>();

    let received = tokio::select! {
        res = signal::ctrl_c() => match res {
            Ok(()) => "SIGINT",
            Err(e) => {
                tracing::warn!(error = %e, "Ctrl+C handler unavailable");
                return;
            }
        },
        name = terminate => name,
    };
    tracing::info!(signal = received, "shutting down");
    shutdown.cancel();
}

// ---------------------------------------------------------------------------
// Demo
// ---------------------------------------------------------------------------

async fn run_demo(chan: Channel, consume_every: Duration, shutdown: CancellationToken) {
    let producer = tokio::spawn({
        let chan = chan.clone();
        let shutdown = shutdown.clone();
        async move {
            while !shutdown.is_cancelled() {
                let now = chrono::Utc::now().timestamp();
                match chan.push(&now).await {
                    Ok(len) => tracing::info!(len, "push success"),
                    Err(ChannelError::Full { .. }) => {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                    Err(e) => tracing::warn!(error = %e, "push failed"),
                }
            }
        }
    });

    let consumer = tokio::spawn({
        let chan = chan.clone();
        let shutdown = shutdown.clone();
        async move {
            while !shutdown.is_cancelled() {
                match chan.pop::<i64>().await {
                    Ok(Some(value)) => tracing::info!(value, "popped"),
                    Ok(None) => {}
                    Err(e) => tracing::warn!(error = %e, "pop failed"),
                }
                tokio::time::sleep(consume_every).await;
            }
        }
    });

    let monitor = tokio::spawn({
        let chan = chan.clone();
        let shutdown = shutdown.clone();
        async move {
            while !shutdown.is_cancelled() {
                match chan.len().await {
                    Ok(len) => tracing::info!(len, "channel length"),
                    Err(e) => tracing::warn!(error = %e, "len failed"),
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    });

    let _ = tokio::join!(producer, consumer, monitor);
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // ---- CLI ----
    let cli = Cli::parse();

    // ---- Tracing ----
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    // ---- Config ----
    let config = config::load_config(&cli.config)?;
    tracing::info!(
        config_path = %cli.config,
        channel_key = %config.channel.channel_key,
        lock_key = %config.channel.lock_key,
        max_len = config.channel.max_len,
        "starting redchan"
    );

    // ---- Shutdown wiring ----
    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    // ---- Store ----
    let metrics = MetricsRegistry::new();
    let chan = Channel::connect(&config, &shutdown)
        .await
        .context("failed to connect channel store")?
        .with_metrics(Arc::clone(&metrics.metrics));

    match cli.command {
        Command::Push { value } => {
            let len = chan.push_raw(&value).await?;
            println!("{len}");
        }
        Command::Pop => {
            if let Some(value) = chan.pop_raw().await? {
                println!("{value}");
            }
        }
        Command::Len => println!("{}", chan.len().await?),
        Command::Clear => println!("{}", chan.clear().await?),
        Command::Ping => {
            chan.ping().await?;
            println!("PONG");
        }
        Command::Demo { consume_every_ms } => {
            run_demo(chan, Duration::from_millis(consume_every_ms), shutdown).await;
            tracing::debug!(metrics = %metrics.encode()?, "final metrics");
        }
    }

    tracing::info!("redchan shut down cleanly");
    Ok(())
}
