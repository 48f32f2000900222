use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use lodestar_core::campaign::{Campaign, CampaignReport};
use lodestar_core::mcp::{handle_line, McpState};
use lodestar_ir::parse::parse_config;
use lodestar_ir::types::{CampaignConfig, CheckpointPolicy, InvariantSpec};
use lodestar_sandbox::config::SandboxConfig;
use lodestar_sandbox::wasm_sut::WasmSut;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lodestar")]
#[command(about = "Stateful invariant fuzzer for WASM modules")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fuzz a module and print the campaign report as JSON.
    Run {
        /// Path to a .wasm or .wat module.
        module: PathBuf,

        /// Campaign config JSON file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Invariant to check (repeatable). Defaults to every invariant_* export.
        #[arg(long = "invariant")]
        invariants: Vec<String>,

        #[arg(long)]
        workers: Option<usize>,

        #[arg(long)]
        seed: Option<u64>,

        /// Sequences per worker.
        #[arg(long)]
        iterations: Option<u64>,

        #[arg(long)]
        time_secs: Option<u64>,

        /// Check invariants only after the last call of each sequence.
        #[arg(long, default_value_t = false)]
        end_of_sequence: bool,

        /// Fuel granted to each call.
        #[arg(long)]
        fuel: Option<u64>,
    },
    /// Serve the JSON-RPC tool surface over stdio.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            module,
            config,
            invariants,
            workers,
            seed,
            iterations,
            time_secs,
            end_of_sequence,
            fuel,
        } => {
            let mut campaign_config = match &config {
                Some(path) => {
                    let json = std::fs::read_to_string(path)
                        .with_context(|| format!("reading config {}", path.display()))?;
                    parse_config(&json)?
                }
                None => CampaignConfig::default(),
            };
            if let Some(n) = workers {
                campaign_config.worker_count = n;
            }
            if let Some(s) = seed {
                campaign_config.seed = s;
            }
            if let Some(n) = iterations {
                campaign_config.iteration_budget = n;
            }
            if let Some(t) = time_secs {
                campaign_config.time_budget_secs = t;
            }
            if end_of_sequence {
                campaign_config.checkpoint_policy = CheckpointPolicy::EndOfSequence;
            }
            let mut sandbox = SandboxConfig::default();
            if fuel.is_some() {
                sandbox.fuel_per_call = fuel;
            }

            let report = run_campaign(&module, invariants, campaign_config, &sandbox).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(match report.counterexample() {
                Some(_) => ExitCode::from(1),
                None => ExitCode::SUCCESS,
            })
        }
        Command::Serve => {
            serve().await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_campaign(
    module: &Path,
    invariant_names: Vec<String>,
    config: CampaignConfig,
    sandbox: &SandboxConfig,
) -> anyhow::Result<CampaignReport> {
    let bytes = std::fs::read(module).with_context(|| format!("reading module {}", module.display()))?;
    let adapter = WasmSut::load(&bytes, sandbox)?;
    let invariants = if invariant_names.is_empty() {
        adapter.invariant_specs()
    } else {
        invariant_names.iter().map(|name| InvariantSpec::new(name)).collect()
    };
    let campaign = Campaign::new(Arc::new(adapter), invariants, config)?;
    let cancel = campaign.cancel_token();

    let mut run = tokio::task::spawn_blocking(move || campaign.run());
    let report = tokio::select! {
        joined = &mut run => joined??,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted; stopping campaign");
            cancel.cancel();
            run.await??
        }
    };
    Ok(report)
}

async fn serve() -> anyhow::Result<()> {
    info!("serving JSON-RPC on stdio");
    let state = Arc::new(McpState::new());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let state = Arc::clone(&state);
        let response = tokio::task::spawn_blocking(move || handle_line(&line, &state)).await?;
        stdout.write_all(response.to_string().as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }
    Ok(())
}
