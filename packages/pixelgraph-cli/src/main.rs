//! Replay driver for the pixelgraph engine.
//!
//! Reads newline-delimited JSON events from a file or stdin, plays them
//! through the engine with a log-backed presenter, then prints the final
//! status line and agent table.
//!
//! ```text
//! pixelgraph --file run.ndjson --agent wizard=Wizard --agent scout --speed 4
//! ```

use std::path::PathBuf;

use anyhow::{ensure, Context, Result};
use async_trait::async_trait;
use clap::Parser;
use pixelgraph::{
    submit_input, Config, ConnectionState, EngineBuilder, EngineHandle, RosterEntry, Submission,
    TracingPresenter, Transport,
};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "pixelgraph")]
#[command(about = "Replay agent execution events as a sequenced stage")]
struct Cli {
    /// Newline-delimited JSON events. Reads stdin when omitted.
    #[arg(long)]
    file: Option<PathBuf>,

    /// Agent to place on stage before replay, as ID or ID=NAME. Repeatable;
    /// replaces PIXELGRAPH_AGENTS.
    #[arg(long = "agent", value_name = "ID[=NAME]")]
    agents: Vec<String>,

    /// Playback speed multiplier.
    #[arg(long, default_value_t = 1.0)]
    speed: f64,

    /// Emit a START_SIMULATION control message with this input first.
    #[arg(long, value_name = "INPUT")]
    send: Option<String>,
}

/// Writes control messages to stdout, one per line.
struct StdoutTransport;

#[async_trait]
impl Transport for StdoutTransport {
    fn state(&self) -> ConnectionState {
        ConnectionState::Open
    }

    async fn send(&self, payload: String) -> Result<()> {
        println!("{payload}");
        Ok(())
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays clean for control messages and the report
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,pixelgraph=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    ensure!(
        cli.speed.is_finite() && cli.speed > 0.0,
        "--speed must be a positive number, got {}",
        cli.speed
    );

    let mut config = Config::from_env().context("Failed to load configuration")?;
    config.timings = config.timings.scaled(cli.speed);
    if !cli.agents.is_empty() {
        config.roster = cli
            .agents
            .iter()
            .map(|raw| raw.parse::<RosterEntry>())
            .collect::<Result<_, _>>()
            .context("Invalid --agent value")?;
    }
    tracing::info!(speed = cli.speed, agents = config.roster.len(), "configuration loaded");

    let handle = EngineBuilder::new(TracingPresenter)
        .with_config(&config)
        .build()
        .start();

    if let Some(input) = &cli.send {
        match submit_input(&StdoutTransport, input).await? {
            Submission::Sent => {}
            skipped => tracing::warn!(?skipped, "control message not sent"),
        }
    }

    let reader: Box<dyn AsyncRead + Unpin + Send> = match &cli.file {
        Some(path) => Box::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdin()),
    };

    let (published, malformed) = replay(&handle, reader).await?;
    tracing::info!(published, malformed, "input exhausted, waiting for queue to drain");

    handle.wait_idle().await;
    report(&handle, published, malformed);
    handle.shutdown().await;
    Ok(())
}

/// Feed every non-blank line to the engine. Returns (published, malformed).
async fn replay(
    handle: &EngineHandle,
    reader: Box<dyn AsyncRead + Unpin + Send>,
) -> Result<(usize, usize)> {
    let mut lines = BufReader::new(reader).lines();
    let mut published = 0;
    let mut malformed = 0;

    while let Some(line) = lines.next_line().await.context("Failed to read input")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match handle.ingest(line) {
            Ok(_) => published += 1,
            Err(e) => {
                malformed += 1;
                tracing::warn!(error = %e, "skipping malformed line");
            }
        }
    }

    Ok((published, malformed))
}

fn report(handle: &EngineHandle, published: usize, malformed: usize) {
    let status = handle.status();
    let stats = handle.queue_stats();

    println!();
    println!("status: {} ({})", status.text, status.severity.color());
    println!(
        "events: {published} published, {malformed} malformed, {} actions played, {} failed",
        stats.completed, stats.failed
    );
    let diagnostics = handle.diagnostics();
    if !diagnostics.is_empty() {
        println!("unrecognized: {}", diagnostics.len());
    }

    println!();
    println!("{:<16} {:<20} {:<11} FOCUS", "AGENT", "NAME", "STATE");
    for agent in handle.agents() {
        println!(
            "{:<16} {:<20} {:<11} {}",
            agent.id,
            agent.display_name,
            agent.state.as_str(),
            if agent.focused { "*" } else { "" }
        );
    }
}
