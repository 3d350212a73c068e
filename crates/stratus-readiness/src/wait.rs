//! Blocking waits built on the reporter
//!
//! Each wait is a [`poll_until`] loop that feeds every snapshot through a
//! [`ChangeDetector`] and [`ChangeLogger`], so progress is logged on change
//! while the caller blocks.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use stratus_common::{
    poll_until, Classification, ClusterReader, ConvergeConfig, Error, CONTROLLER_NAME,
    CONTROLLER_NAMESPACE,
};
use tracing::{debug, info};

use crate::reporter::{ChangeDetector, ChangeLogger, DestroyingChangeEvent, RunningChangeEvent};

/// Default poll interval for readiness waits
pub const WAIT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Kubernetes read failures are retried unless credentials are rejected
pub fn classify_read(e: &Error) -> Classification {
    match e.status_code() {
        Some(401) | Some(403) => Classification::Fatal,
        _ => Classification::Transient,
    }
}

#[derive(Default)]
struct Progress {
    detector: ChangeDetector,
    logger: ChangeLogger,
}

/// Block until no Deployment, DaemonSet, StatefulSet or Certificate is active
pub async fn wait_until_ready(
    reader: &dyn ClusterReader,
    config: &ConvergeConfig,
) -> stratus_common::Result<()> {
    let progress = &Mutex::new(Progress::default());
    poll_until(
        config,
        "wait_until_ready",
        move || async move {
            let snapshot = reader.snapshot().await?;
            let event = RunningChangeEvent::from_snapshot(&snapshot);
            let mut guard = progress.lock().unwrap_or_else(PoisonError::into_inner);
            let Progress { detector, logger } = &mut *guard;
            detector.running(&event, logger);
            Ok(event.is_ready().then_some(()))
        },
        classify_read,
    )
    .await?;
    info!("all resources are ready");
    Ok(())
}

/// Block until every PersistentVolume has been released
pub async fn wait_until_destroyed(
    reader: &dyn ClusterReader,
    config: &ConvergeConfig,
) -> stratus_common::Result<()> {
    let progress = &Mutex::new(Progress::default());
    poll_until(
        config,
        "wait_until_destroyed",
        move || async move {
            let snapshot = reader.snapshot().await?;
            let event = DestroyingChangeEvent::from_snapshot(&snapshot);
            let mut guard = progress.lock().unwrap_or_else(PoisonError::into_inner);
            let Progress { detector, logger } = &mut *guard;
            detector.destroying(&event, logger);
            Ok(event.is_complete().then_some(()))
        },
        classify_read,
    )
    .await?;
    info!("all persistent volumes released");
    Ok(())
}

/// Block until the controller deployment reports `desired_ready_replicas`.
///
/// `None` waits for the controller to have no ready replicas at all, which
/// is how a scale to zero becomes visible.
pub async fn wait_for_controller_deployment(
    reader: &dyn ClusterReader,
    desired_ready_replicas: Option<i32>,
    config: &ConvergeConfig,
) -> stratus_common::Result<()> {
    poll_until(
        config,
        "wait_for_controller_deployment",
        move || async move {
            let snapshot = reader.snapshot().await?;
            let Some(deployment) = snapshot.deployment(CONTROLLER_NAMESPACE, CONTROLLER_NAME)
            else {
                debug!("controller deployment not found yet");
                return Ok(None);
            };
            let ready = deployment
                .status
                .as_ref()
                .and_then(|s| s.ready_replicas)
                .filter(|n| *n > 0);
            debug!(ready = ?ready, desired = ?desired_ready_replicas, "controller replicas");
            Ok((ready == desired_ready_replicas.filter(|n| *n > 0)).then_some(()))
        },
        classify_read,
    )
    .await?;
    info!(desired = ?desired_ready_replicas, "controller deployment reached desired replicas");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus};
    use k8s_openapi::api::core::v1::PersistentVolume;
    use kube::api::ObjectMeta;
    use mockall::Sequence;
    use stratus_common::{ApiError, ClusterSnapshot, MockClusterReader};
    use tokio::time::Instant;

    fn controller(ready: Option<i32>) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some(CONTROLLER_NAME.to_string()),
                namespace: Some(CONTROLLER_NAMESPACE.to_string()),
                ..Default::default()
            },
            status: Some(DeploymentStatus {
                ready_replicas: ready,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn with_controller(ready: Option<i32>) -> ClusterSnapshot {
        ClusterSnapshot {
            deployments: vec![controller(ready)],
            ..Default::default()
        }
    }

    fn config() -> ConvergeConfig {
        ConvergeConfig::new(Duration::from_secs(1))
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_scale_to_zero() {
        let mut reader = MockClusterReader::new();
        let mut seq = Sequence::new();
        reader
            .expect_snapshot()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|| Ok(with_controller(Some(1))));
        reader
            .expect_snapshot()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(with_controller(Some(0))));

        let start = Instant::now();
        wait_for_controller_deployment(&reader, None, &config())
            .await
            .unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_specific_replica_count() {
        let mut reader = MockClusterReader::new();
        let mut seq = Sequence::new();
        reader
            .expect_snapshot()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(ClusterSnapshot::default()));
        reader
            .expect_snapshot()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(with_controller(None)));
        reader
            .expect_snapshot()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(with_controller(Some(1))));

        wait_for_controller_deployment(&reader, Some(1), &config())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn forbidden_read_aborts_wait() {
        let mut reader = MockClusterReader::new();
        reader.expect_snapshot().times(1).returning(|| {
            Err(ApiError::new("kubernetes", "list", "forbidden")
                .with_status(403)
                .into())
        });

        let err = wait_until_ready(&reader, &config()).await.unwrap_err();
        assert_eq!(err.status_code(), Some(403));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_read_failure_is_retried() {
        let mut reader = MockClusterReader::new();
        let mut seq = Sequence::new();
        reader
            .expect_snapshot()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| {
                Err(ApiError::new("kubernetes", "list", "unavailable")
                    .with_status(503)
                    .into())
            });
        reader
            .expect_snapshot()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(ClusterSnapshot::default()));

        wait_until_ready(&reader, &config()).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn destroyed_once_volumes_are_gone() {
        let mut reader = MockClusterReader::new();
        let mut seq = Sequence::new();
        reader
            .expect_snapshot()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| {
                Ok(ClusterSnapshot {
                    persistent_volumes: vec![PersistentVolume {
                        metadata: ObjectMeta {
                            name: Some("pv-1".to_string()),
                            ..Default::default()
                        },
                        ..Default::default()
                    }],
                    ..Default::default()
                })
            });
        reader
            .expect_snapshot()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(ClusterSnapshot::default()));

        wait_until_destroyed(&reader, &config()).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn wait_honours_deadline() {
        let mut reader = MockClusterReader::new();
        reader
            .expect_snapshot()
            .returning(|| Ok(with_controller(Some(1))));

        let err = wait_for_controller_deployment(
            &reader,
            None,
            &config().with_timeout(Duration::from_secs(10)),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }
}
