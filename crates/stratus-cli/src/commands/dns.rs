//! DNS commands - the instance's delegated subzone

use std::path::PathBuf;

use clap::{Args, Subcommand};
use stratus_cloud::dns::{
    destroy_dns_zone, ensure_dns_exists, subdomain, CREATE_POLL_INTERVAL, DELETE_POLL_INTERVAL,
};
use stratus_cloud::HttpDnsRegistration;
use tracing::info;

use super::{AwsArgs, Context, DnsServiceArgs};
use crate::instance::InstanceConfig;
use crate::Result;

/// DNS subcommands
#[derive(Subcommand, Debug)]
pub enum DnsCommand {
    /// Create the subzone and delegate it through the DNS registration service
    Ensure(DnsEnsureArgs),
    /// Delete the subzone
    Destroy(DnsDestroyArgs),
}

/// `dns ensure` arguments
#[derive(Args, Debug)]
pub struct DnsEnsureArgs {
    /// Instance config file
    #[arg(short = 'c', long = "config")]
    pub config: PathBuf,

    #[command(flatten)]
    pub aws: AwsArgs,

    #[command(flatten)]
    pub service: DnsServiceArgs,
}

/// `dns destroy` arguments
#[derive(Args, Debug)]
pub struct DnsDestroyArgs {
    /// Instance config file
    #[arg(short = 'c', long = "config")]
    pub config: PathBuf,

    #[command(flatten)]
    pub aws: AwsArgs,
}

/// Run a DNS subcommand
pub async fn run(cmd: DnsCommand, ctx: &Context) -> Result<()> {
    match cmd {
        DnsCommand::Ensure(args) => ensure(args, ctx).await,
        DnsCommand::Destroy(args) => destroy(args, ctx).await,
    }
}

async fn ensure(args: DnsEnsureArgs, ctx: &Context) -> Result<()> {
    let instance = InstanceConfig::load(&args.config)?;
    instance.require_aws()?;
    let cloud = args.aws.cloud_config()?;
    let registration = HttpDnsRegistration::new(&args.service.config(), &cloud)?;
    let route53 = args.aws.clients().await?.route53();

    let zone = ensure_dns_exists(
        &registration,
        &route53,
        &instance.name,
        &instance.dns_name,
        &ctx.converge(CREATE_POLL_INTERVAL),
    )
    .await?;
    println!("{}", zone);
    Ok(())
}

async fn destroy(args: DnsDestroyArgs, ctx: &Context) -> Result<()> {
    let instance = InstanceConfig::load(&args.config)?;
    instance.require_aws()?;
    let route53 = args.aws.clients().await?.route53();

    let zone = subdomain(&instance.name, &instance.dns_name);
    destroy_dns_zone(&route53, &zone, &ctx.converge(DELETE_POLL_INTERVAL)).await?;
    info!(zone = %zone, "DNS zone removed");
    Ok(())
}
