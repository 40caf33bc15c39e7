//! Command-line interface: argument parsing and the subcommands.

use crate::config::resolve_client_config;
use crate::output::{render, OutputFormat};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hydra_realtime::RealtimeClient;
use serde_json::Value;
use std::future::Future;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "hydra-tail")]
#[command(about = "Follow Hydra realtime channels", long_about = None)]
pub struct Cli {
    /// Realtime endpoint, overrides the config file.
    #[arg(short, long, env = "HYDRA_RT_URL")]
    pub url: Option<String>,

    /// Client config file (.toml or .json).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Request timeout in milliseconds.
    #[arg(short, long)]
    pub timeout_ms: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Subscribe to channels and print their broadcasts until interrupted.
    Tail {
        /// Channels to follow.
        #[arg(required = true)]
        channels: Vec<String>,
        /// Print raw frames as JSON lines.
        #[arg(long)]
        json: bool,
    },
    /// Send one request and print the acknowledgement.
    Send {
        /// JSON object to send.
        payload: String,
    },
}

impl Cli {
    /// Runs the selected subcommand.
    pub async fn run(self) -> Result<()> {
        let config =
            resolve_client_config(self.config.as_deref(), self.url.clone(), self.timeout_ms)?;
        match self.command {
            Command::Tail { ref channels, json } => {
                let format = if json {
                    OutputFormat::Json
                } else {
                    OutputFormat::Text
                };
                let client = RealtimeClient::new(config)?;
                tail(&client, channels, format).await
            }
            Command::Send { ref payload } => {
                let payload: Value =
                    serde_json::from_str(payload).context("payload is not valid JSON")?;
                let client = RealtimeClient::new(config)?;
                let response = client.send(payload).await?;
                println!("{}", serde_json::to_string_pretty(&response)?);
                Ok(())
            }
        }
    }
}

async fn tail(client: &RealtimeClient, channels: &[String], format: OutputFormat) -> Result<()> {
    client.on_connectivity_change(|up| {
        if up {
            tracing::info!("connection restored");
        } else {
            tracing::warn!("connection lost, reconnecting");
        }
    })?;

    // Listeners run on the client task; printing happens here.
    let (lines_tx, mut lines) = mpsc::unbounded_channel::<String>();
    let mut subscriptions = Vec::with_capacity(channels.len());
    for channel in channels {
        let subscription = client
            .subscribe(channel.clone())
            .await
            .with_context(|| format!("subscribing to {channel}"))?;
        let tx = lines_tx.clone();
        subscription.listen_all(move |frame| {
            if let Some(line) = render(frame, format) {
                let _ = tx.send(line);
            }
        })?;
        tracing::info!(channel = %channel, "subscribed");
        subscriptions.push(subscription);
    }
    drop(lines_tx);

    wait_printing(&mut lines, tokio::signal::ctrl_c()).await;

    for subscription in subscriptions {
        subscription.unsubscribe()?;
    }
    Ok(())
}

/// Prints lines until the listeners go away or `interrupt` completes.
///
/// `interrupt` is created once and polled across iterations so a signal that
/// lands between two lines is still seen.
async fn wait_printing<F>(lines: &mut mpsc::UnboundedReceiver<String>, interrupt: F) -> bool
where
    F: Future<Output = std::io::Result<()>>,
{
    tokio::pin!(interrupt);
    loop {
        tokio::select! {
            line = lines.recv() => match line {
                Some(line) => println!("{line}"),
                None => return false,
            },
            result = &mut interrupt => {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "cannot listen for ctrl-c");
                }
                tracing::info!("interrupted, leaving channels");
                return true;
            }
        }
    }
}
