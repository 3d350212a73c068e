//! Status command - rollout and volume release progress
//!
//! Without flags prints one snapshot. `--wait` blocks until ready (or, with
//! `--destroying`, until every volume is released). `--follow` logs every
//! change until interrupted.

use clap::Args;
use stratus_common::{ClusterReader, KubeClusterReader};
use stratus_readiness::{
    status_message, wait_until_destroyed, wait_until_ready, ChangeLogger, DestroyingChangeEvent,
    ReadinessReporter, RunningChangeEvent, WAIT_POLL_INTERVAL,
};

use super::Context;
use crate::Result;

/// Status command arguments
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Block until the condition is met
    #[arg(long, conflicts_with = "follow")]
    pub wait: bool,

    /// Report volume release instead of rollouts
    #[arg(long)]
    pub destroying: bool,

    /// Keep reporting changes until interrupted
    #[arg(long)]
    pub follow: bool,
}

/// Run the status command
pub async fn run(args: StatusArgs, ctx: &Context) -> Result<()> {
    let reader = KubeClusterReader::new(ctx.kube_client().await?);

    if args.follow {
        let destroying = args.destroying;
        let mut logger = ChangeLogger::new();
        ReadinessReporter::new(&reader, WAIT_POLL_INTERVAL)
            .run(&mut logger, move || destroying, ctx.cancel.clone())
            .await;
        return Ok(());
    }

    if args.wait {
        let config = ctx.converge(WAIT_POLL_INTERVAL);
        if args.destroying {
            wait_until_destroyed(&reader, &config).await?;
        } else {
            wait_until_ready(&reader, &config).await?;
        }
        return Ok(());
    }

    let snapshot = reader.snapshot().await?;
    for line in report(&snapshot, args.destroying) {
        println!("{}", line);
    }
    Ok(())
}

fn report(snapshot: &stratus_common::ClusterSnapshot, destroying: bool) -> Vec<String> {
    if destroying {
        let event = DestroyingChangeEvent::from_snapshot(snapshot);
        if event.is_complete() {
            return vec!["all persistent volumes released".to_string()];
        }
        let remaining = &event.remaining_persistent_volumes;
        return vec![format!(
            "Waiting for {} PersistentVolumes to be released: {}",
            remaining.len(),
            remaining.join(", ")
        )];
    }

    let event = RunningChangeEvent::from_snapshot(snapshot);
    if event.is_ready() {
        return vec!["all resources are ready".to_string()];
    }
    [
        ("Deployment", &event.active_deployments),
        ("DaemonSet", &event.active_daemon_sets),
        ("StatefulSet", &event.active_stateful_sets),
        ("Certificate", &event.active_certificates),
    ]
    .into_iter()
    .filter(|(_, active)| !active.is_empty())
    .map(|(kind, active)| status_message(kind, active))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::PersistentVolume;
    use kube::api::ObjectMeta;
    use stratus_common::ClusterSnapshot;

    #[test]
    fn empty_cluster_is_ready() {
        assert_eq!(
            report(&ClusterSnapshot::default(), false),
            vec!["all resources are ready"]
        );
        assert_eq!(
            report(&ClusterSnapshot::default(), true),
            vec!["all persistent volumes released"]
        );
    }

    #[test]
    fn remaining_volumes_are_reported() {
        let snapshot = ClusterSnapshot {
            persistent_volumes: vec![PersistentVolume {
                metadata: ObjectMeta {
                    name: Some("pvc-1".to_string()),
                    ..Default::default()
                },
                ..Default::default()
            }],
            ..Default::default()
        };
        let lines = report(&snapshot, true);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("pvc-1"), "{}", lines[0]);
    }
}
