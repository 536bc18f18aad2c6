//! Command-line surface: one `ssm` subcommand tree covering discovery,
//! sessions, execution, transfer, port-forwarding, power, and cleanup.

mod exec;
mod list;
mod power;
mod transfer_cmd;

use crate::client_pool::{ClientPool, ClientPoolHandle};
use crate::config::Config;
use crate::instance::{InteractiveSelector, NonInteractiveSelector};
use crate::platform::PlatformDetector;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "ztictl")]
#[command(about = "Operator control plane for AWS Systems Manager")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Output format (text, json)
    #[arg(long, global = true, default_value = "text")]
    output: String,
}

#[derive(Subcommand)]
enum Commands {
    Ssm {
        #[command(subcommand)]
        subcommand: SsmCommands,
    },
}

#[derive(Subcommand)]
enum SsmCommands {
    /// List managed instances in a region
    List {
        #[arg(long)]
        region: String,
        #[arg(long)]
        tags: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        table: bool,
    },
    /// Start an interactive shell session
    Connect {
        identifier: Option<String>,
        #[arg(long)]
        region: String,
    },
    /// Run one command on one instance
    Exec {
        region: String,
        instance: String,
        command: String,
        #[arg(long)]
        comment: Option<String>,
        #[arg(long, default_value_t = 60)]
        timeout: u64,
    },
    /// Run one command on every instance matching tag filters
    ExecTagged {
        region: String,
        command: String,
        #[arg(long)]
        tags: Option<String>,
        #[arg(long, default_value_t = 5)]
        parallel: usize,
    },
    /// Run one command across multiple regions
    ExecMulti {
        #[arg(long)]
        regions: Option<String>,
        #[arg(long)]
        all_regions: bool,
        #[arg(long)]
        region_group: Option<String>,
        command: String,
        #[arg(long)]
        tags: Option<String>,
        #[arg(long, default_value_t = 5)]
        parallel: usize,
        #[arg(long)]
        continue_on_error: bool,
        #[arg(long, default_value_t = 60)]
        timeout: u64,
    },
    Transfer {
        #[command(subcommand)]
        subcommand: TransferCommands,
    },
    /// Forward a local TCP port to a remote port on the instance
    Forward {
        instance: String,
        /// `local:remote`
        ports: String,
        #[arg(long)]
        region: String,
    },
    Start {
        instance: Option<String>,
        #[arg(long)]
        instances: Option<String>,
        #[arg(long)]
        region: String,
        #[arg(long, default_value_t = 5)]
        parallel: usize,
        #[arg(long)]
        wait: bool,
    },
    Stop {
        instance: Option<String>,
        #[arg(long)]
        instances: Option<String>,
        #[arg(long)]
        region: String,
        #[arg(long, default_value_t = 5)]
        parallel: usize,
        #[arg(long)]
        wait: bool,
    },
    Reboot {
        instance: Option<String>,
        #[arg(long)]
        instances: Option<String>,
        #[arg(long)]
        region: String,
        #[arg(long, default_value_t = 5)]
        parallel: usize,
    },
    /// Sweep stale staging objects and temporary IAM policies
    Cleanup {
        #[arg(long)]
        region: String,
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum TransferCommands {
    Upload {
        instance: String,
        local: std::path::PathBuf,
        remote: String,
        #[arg(long)]
        region: String,
    },
    Download {
        instance: String,
        remote: String,
        local: std::path::PathBuf,
        #[arg(long)]
        region: String,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    let pool: std::sync::Arc<dyn ClientPoolHandle> = std::sync::Arc::new(ClientPool::new());
    let detector = std::sync::Arc::new(PlatformDetector::new(Duration::from_secs(
        config.platform_detection.cache_ttl_secs,
    )));
    let selector = NonInteractiveSelector;

    let Commands::Ssm { subcommand } = cli.command;
    dispatch(subcommand, pool, detector, &config, &selector, &cli.output).await
}

async fn dispatch(
    command: SsmCommands,
    pool: std::sync::Arc<dyn ClientPoolHandle>,
    detector: std::sync::Arc<PlatformDetector>,
    config: &Config,
    selector: &dyn InteractiveSelector,
    output: &str,
) -> Result<()> {
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            cancel.cancel();
        });
    }

    match command {
        SsmCommands::List { region, tags, status, name, table } => {
            list::run(pool.as_ref(), &region, tags, status, name, table, output).await
        }
        SsmCommands::Connect { identifier, region } => {
            exec::connect(pool.as_ref(), identifier, &region, selector).await
        }
        SsmCommands::Exec { region, instance, command, comment, timeout } => {
            exec::exec_one(pool.as_ref(), detector.as_ref(), &region, &instance, &command, comment, timeout, cancel, output).await
        }
        SsmCommands::ExecTagged { region, command, tags, parallel } => {
            exec::exec_tagged(pool, detector, config, &region, &command, tags, parallel, cancel, output).await
        }
        SsmCommands::ExecMulti {
            regions,
            all_regions,
            region_group,
            command,
            tags,
            parallel,
            continue_on_error,
            timeout,
        } => {
            exec::exec_multi(
                pool, detector, config, regions, all_regions, region_group, &command, tags, parallel,
                continue_on_error, timeout, cancel, output,
            )
            .await
        }
        SsmCommands::Transfer { subcommand } => match subcommand {
            TransferCommands::Upload { instance, local, remote, region } => {
                transfer_cmd::upload(pool.as_ref(), detector.as_ref(), config, &region, &instance, &local, &remote, cancel).await
            }
            TransferCommands::Download { instance, remote, local, region } => {
                transfer_cmd::download(pool.as_ref(), detector.as_ref(), config, &region, &instance, &remote, &local, cancel).await
            }
        },
        SsmCommands::Forward { instance, ports, region } => {
            exec::forward(pool.as_ref(), &instance, &ports, &region, cancel).await
        }
        SsmCommands::Start { instance, instances, region, parallel, wait } => {
            power::apply(pool, instance, instances, &region, crate::power_ops::PowerAction::Start, parallel, wait, cancel).await
        }
        SsmCommands::Stop { instance, instances, region, parallel, wait } => {
            power::apply(pool, instance, instances, &region, crate::power_ops::PowerAction::Stop, parallel, wait, cancel).await
        }
        SsmCommands::Reboot { instance, instances, region, parallel } => {
            power::apply(pool, instance, instances, &region, crate::power_ops::PowerAction::Reboot, parallel, false, cancel).await
        }
        SsmCommands::Cleanup { region, dry_run } => {
            crate::cleanup::run(pool.as_ref(), config, &region, dry_run).await.map_err(anyhow::Error::from)
        }
    }
}
