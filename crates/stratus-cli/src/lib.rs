//! stratus CLI library

pub mod commands;
pub mod error;
pub mod instance;

pub use error::{Error, Result};

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use stratus_common::telemetry::LogFormat;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use commands::{parse_duration, Context};

/// stratus - install lifecycle for observability instances
#[derive(Parser, Debug)]
#[command(name = "stratus")]
#[command(version = stratus_upgrade::VERSION, about, long_about = None)]
pub struct Cli {
    /// Give up after this long (e.g. 1h, 30m, 600s)
    #[arg(long, global = true, default_value = "1h", value_parser = parse_duration)]
    pub timeout: Duration,

    /// Log output format: text or json
    #[arg(long, global = true, default_value = "text", env = "STRATUS_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Kubeconfig of the instance's cluster
    #[arg(long, global = true, env = "STRATUS_KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Upgrade the controller to this CLI's version
    Upgrade(commands::upgrade::UpgradeArgs),
    /// Show or wait for rollout and volume release progress
    Status(commands::status::StatusArgs),
    /// List instances across AWS regions
    List(commands::list::ListArgs),
    /// Manage the instance's DNS subzone
    #[command(subcommand)]
    Dns(commands::dns::DnsCommand),
    /// Manage IAM roles
    #[command(subcommand)]
    Role(commands::role::RoleCommand),
}

impl Cli {
    /// Run the CLI command under the global deadline.
    ///
    /// Ctrl-C cancels in-flight convergence loops at their next await point.
    pub async fn run(self) -> Result<()> {
        let cancel = CancellationToken::new();
        let interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, stopping");
                interrupt.cancel();
            }
        });

        let ctx = Context {
            kubeconfig: self.kubeconfig,
            timeout: self.timeout,
            cancel,
        };
        let command = self.command.run(&ctx);
        match tokio::time::timeout(ctx.timeout, command).await {
            Ok(result) => result,
            Err(_) => Err(stratus_common::Error::timeout("stratus", ctx.timeout.as_secs()).into()),
        }
    }
}

impl Commands {
    async fn run(self, ctx: &Context) -> Result<()> {
        match self {
            Commands::Upgrade(args) => commands::upgrade::run(args, ctx).await,
            Commands::Status(args) => commands::status::run(args, ctx).await,
            Commands::List(args) => commands::list::run(args).await,
            Commands::Dns(cmd) => commands::dns::run(cmd, ctx).await,
            Commands::Role(cmd) => commands::role::run(cmd, ctx).await,
        }
    }
}
