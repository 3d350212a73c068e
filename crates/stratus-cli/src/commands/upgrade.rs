//! Upgrade command

use std::path::PathBuf;

use clap::Args;
use stratus_common::KubeClusterReader;
use stratus_readiness::WAIT_POLL_INTERVAL;
use stratus_upgrade::{run_upgrade, KubeClusterWriter, UpgradeOutcome, VERSION};
use tracing::info;

use super::Context;
use crate::instance::InstanceConfig;
use crate::Result;

/// Upgrade command arguments
#[derive(Args, Debug)]
pub struct UpgradeArgs {
    /// Instance config file
    #[arg(short = 'c', long = "config")]
    pub config: PathBuf,
}

/// Run the upgrade command
pub async fn run(args: UpgradeArgs, ctx: &Context) -> Result<()> {
    let instance = InstanceConfig::load(&args.config)?;
    let client = ctx.kube_client().await?;
    let reader = KubeClusterReader::new(client.clone());
    let writer = KubeClusterWriter::new(client);

    info!(instance = %instance.name, version = VERSION, "upgrading instance");
    let outcome = run_upgrade(
        &reader,
        &writer,
        &instance.overrides,
        VERSION,
        &ctx.converge(WAIT_POLL_INTERVAL),
    )
    .await?;

    match outcome {
        UpgradeOutcome::UpToDate => {
            println!("{} is already at version {}", instance.name, VERSION)
        }
        UpgradeOutcome::Upgraded { from, to } => {
            println!("{}: controller upgraded from {} to {}", instance.name, from, to)
        }
    }
    Ok(())
}
