//! Listing stratus instances running on EKS

use futures::future::join_all;
use stratus_common::{Error, Result, INSTANCE_TAG};
use tracing::{debug, info};

use crate::api::{EksApi, EksCluster};

/// Regions searched for instances
pub const EKS_REGIONS: &[&str] = &[
    "af-south-1",
    "ap-east-1",
    "ap-northeast-1",
    "ap-northeast-2",
    "ap-northeast-3",
    "ap-south-1",
    "ap-southeast-1",
    "ap-southeast-2",
    "ca-central-1",
    "eu-central-1",
    "eu-north-1",
    "eu-south-1",
    "eu-west-1",
    "eu-west-2",
    "eu-west-3",
    "me-south-1",
    "sa-east-1",
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
];

/// A stratus instance found on EKS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    /// Instance name from the cluster tag
    pub name: String,
    /// The backing EKS cluster
    pub cluster: EksCluster,
}

/// Instances in one region, with every ListClusters page drained.
///
/// A 403 means the region is not enabled for the account and yields no
/// instances. Any other failure is returned with the region attached.
pub async fn list_instances_in_region(eks: &dyn EksApi, region: &str) -> Result<Vec<Instance>> {
    let mut names = Vec::new();
    let mut next = None;
    loop {
        let page = match eks.list_clusters(region, next).await {
            Ok(page) => page,
            Err(e) if e.status_code() == Some(403) => {
                info!(region = %region, error = %e, "region not accessible, skipping");
                return Ok(Vec::new());
            }
            Err(e) => return Err(in_region(e, region)),
        };
        names.extend(page.items);
        match page.next {
            Some(token) => next = Some(token),
            None => break,
        }
    }
    debug!(region = %region, clusters = names.len(), "listed EKS clusters");

    let mut instances = Vec::new();
    for name in names {
        let Some(cluster) = eks
            .describe_cluster(region, &name)
            .await
            .map_err(|e| in_region(e, region))?
        else {
            continue;
        };
        if let Some(instance_name) = cluster.tags.get(INSTANCE_TAG) {
            instances.push(Instance {
                name: instance_name.clone(),
                cluster,
            });
        }
    }
    Ok(instances)
}

/// Instances across `regions`, listed concurrently, sorted by name
pub async fn list_instances(eks: &dyn EksApi, regions: &[&str]) -> Result<Vec<Instance>> {
    let results = join_all(
        regions
            .iter()
            .map(|region| list_instances_in_region(eks, region)),
    )
    .await;

    let mut instances = Vec::new();
    for result in results {
        instances.extend(result?);
    }
    instances.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(instances)
}

fn in_region(e: Error, region: &str) -> Error {
    match e {
        Error::Cloud { source } if source.region.is_none() => source.in_region(region).into(),
        Error::Cloud { source } => Error::Cloud { source },
        other => Error::internal_with_context(
            "list_instances",
            format!("listing EKS clusters in {} failed: {}", region, other),
        ),
    }
}
