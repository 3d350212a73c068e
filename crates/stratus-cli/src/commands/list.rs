//! List command - stratus instances on EKS across regions

use clap::Args;
use stratus_cloud::eks::{list_instances, Instance, EKS_REGIONS};

use super::AwsArgs;
use crate::Result;

/// List command arguments
#[derive(Args, Debug)]
pub struct ListArgs {
    #[command(flatten)]
    pub aws: AwsArgs,

    /// Only search these regions (repeatable)
    #[arg(long = "in-region")]
    pub regions: Vec<String>,
}

/// Run the list command
pub async fn run(args: ListArgs) -> Result<()> {
    let clients = args.aws.clients().await?;
    let eks = clients.eks();
    let regions: Vec<&str> = if args.regions.is_empty() {
        EKS_REGIONS.to_vec()
    } else {
        args.regions.iter().map(String::as_str).collect()
    };

    let instances = list_instances(&eks, &regions).await?;
    if instances.is_empty() {
        println!("No instances found");
        return Ok(());
    }
    for line in table(&instances) {
        println!("{}", line);
    }
    Ok(())
}

fn table(instances: &[Instance]) -> Vec<String> {
    let width = instances
        .iter()
        .map(|i| i.name.len())
        .max()
        .unwrap_or(0)
        .max("NAME".len());
    let mut lines = vec![format!("{:<width$}  {:<14}  STATUS", "NAME", "REGION")];
    lines.extend(instances.iter().map(|i| {
        format!(
            "{:<width$}  {:<14}  {}",
            i.name,
            i.cluster.region,
            i.cluster.status.as_deref().unwrap_or("UNKNOWN")
        )
    }));
    lines
}
