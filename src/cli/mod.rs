//! Command-line interface.

pub mod doctor;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::chains::DEFAULT_CHAIN_ID;
use crate::config::Config;
use crate::explorer::EtherscanClient;
use crate::studio::Studio;
use crate::tools::{ToolContext, default_registry};
use crate::verification::CancellationFlag;

#[derive(Parser, Debug)]
#[command(
    name = "contract-studio",
    version,
    about = "Track contracts deployed from a wallet and their explorer source verification"
)]
pub struct Cli {
    /// TOML config file overlay (defaults to ~/.contract-studio/config.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List deployments, discovering them from chain history when none are saved.
    Deployments {
        #[arg(long, env = "STUDIO_WALLET")]
        wallet: String,
    },

    /// Rescan chain history and merge new deployments into the saved list.
    Resync {
        #[arg(long, env = "STUDIO_WALLET")]
        wallet: String,
    },

    /// Submit a deployment's source for explorer verification.
    Verify { address: String },

    /// Show verification state for one address, or all of them.
    Status { address: Option<String> },

    /// Sweep for already-verified contracts, then poll pending jobs until Ctrl-C.
    Watch,

    /// Fill in missing names and symbols from on-chain metadata.
    Hydrate,

    /// Delete every saved deployment and verification record.
    Clear {
        /// Skip the confirmation guard.
        #[arg(long)]
        yes: bool,
    },

    /// Inspect and call the tool surface.
    Tools {
        #[command(subcommand)]
        command: ToolsCommand,
    },

    /// Probe configuration, explorer and RPC endpoints.
    Doctor {
        /// Exit non-zero when any check fails.
        #[arg(long)]
        strict: bool,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ToolsCommand {
    /// Print the tool catalog.
    List,

    /// Call a tool with a JSON object of parameters.
    Call {
        name: String,
        #[arg(default_value = "{}")]
        params: String,
        /// Chain used when the call omits `chainId`.
        #[arg(long, default_value_t = DEFAULT_CHAIN_ID)]
        chain_id: u64,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Dispatch a parsed command.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Command::Doctor { strict } = cli.command {
        return doctor::run_doctor_command(cli.config.as_deref(), strict).await;
    }

    let config = Config::from_env_with_toml(cli.config.as_deref())?;
    let studio = Arc::new(Studio::from_config(&config).await?);
    tracing::debug!(store = %studio.store().describe(), "Studio ready");

    match cli.command {
        Command::Deployments { wallet } => {
            let listing = studio.deployments(&wallet).await?;
            for failure in &listing.failures {
                tracing::warn!(chain = %failure.chain_name, error = %failure.error, "Chain scan failed");
            }
            print_json(&listing)?;
        }
        Command::Resync { wallet } => {
            print_json(&studio.resync(&wallet).await?)?;
        }
        Command::Verify { address } => match studio.verification().submit(&address).await {
            Ok(record) => print_json(&record)?,
            Err(refusal) => anyhow::bail!("{refusal}"),
        },
        Command::Status { address: Some(address) } => {
            print_json(&studio.verification().status(&address).await?)?;
        }
        Command::Status { address: None } => {
            print_json(&studio.verification().all().await?)?;
        }
        Command::Watch => {
            let cancel = CancellationFlag::new();
            let mut watch = studio.spawn_verification_watch(cancel.clone());
            tracing::info!("Watching verification jobs; press Ctrl-C to stop");
            let interrupted = tokio::select! {
                _ = tokio::signal::ctrl_c() => true,
                joined = &mut watch => {
                    joined?;
                    false
                }
            };
            if interrupted {
                tracing::info!("Stopping verification watch");
                cancel.cancel();
                watch.await?;
            }
        }
        Command::Hydrate => {
            let report = studio.hydrate_now(&CancellationFlag::new()).await?;
            print_json(&report)?;
        }
        Command::Clear { yes } => {
            if !yes {
                anyhow::bail!("refusing to clear saved records without --yes");
            }
            studio.clear_all().await?;
            println!("Cleared saved deployments and verification records.");
        }
        Command::Tools { command } => {
            let client = Arc::new(EtherscanClient::new(&config.explorer)?);
            let registry = default_registry(Arc::clone(&studio), client);
            match command {
                ToolsCommand::List => print_json(&registry.catalog())?,
                ToolsCommand::Call {
                    name,
                    params,
                    chain_id,
                } => {
                    let params: serde_json::Value = serde_json::from_str(&params)
                        .map_err(|e| anyhow::anyhow!("params must be a JSON object: {e}"))?;
                    let ctx = ToolContext {
                        default_chain_id: chain_id,
                        ..ToolContext::default()
                    };
                    print_json(&registry.call_structured(&name, params, &ctx).await)?;
                }
            }
        }
        Command::Doctor { .. } => {}
    }

    studio.shutdown();
    Ok(())
}
