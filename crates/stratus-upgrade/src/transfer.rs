//! Ownership transfer from the controller to the cortex operator
//!
//! A one-shot ordered sequence: scale the controller to zero, annotate every
//! selected resource as immutable so the controller leaves it alone, then
//! delete the Deployments the operator cannot adopt in place. Nothing is
//! rolled back. Annotating is idempotent and a deleted object stays deleted,
//! so re-running after a partial failure finishes the job.

use kube::ResourceExt;
use stratus_common::{
    ClusterReader, ClusterSnapshot, ConvergeConfig, Error, Result, CONTROLLER_NAME,
    CONTROLLER_NAMESPACE, IMMUTABLE_ANNOTATION,
};
use stratus_readiness::wait_for_controller_deployment;
use tracing::{debug, info, warn};

use crate::writer::{ClusterWriter, ResourceKind, ResourceRef};

/// Namespace the cortex operator runs in
pub const OPERATOR_NAMESPACE: &str = "cortex-operator-system";

/// Deployment of the cortex operator
pub const OPERATOR_DEPLOYMENT: &str = "cortex-operator-controller-manager";

/// Namespace holding the cortex workloads being handed over
pub const CORTEX_NAMESPACE: &str = "cortex";

/// Which names of a kind a step applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Every object except these
    AllExcept(Vec<String>),
    /// Only these, when present
    Only(Vec<String>),
}

impl Selector {
    /// Select every object except `names`
    pub fn all_except(names: &[&str]) -> Self {
        Selector::AllExcept(names.iter().map(|n| n.to_string()).collect())
    }

    /// Select only `names`
    pub fn only(names: &[&str]) -> Self {
        Selector::Only(names.iter().map(|n| n.to_string()).collect())
    }

    fn matches(&self, name: &str) -> bool {
        match self {
            Selector::AllExcept(skip) => !skip.iter().any(|s| s == name),
            Selector::Only(keep) => keep.iter().any(|s| s == name),
        }
    }
}

/// What happens to a selected object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferAction {
    /// Add the immutable annotation
    MarkImmutable,
    /// Delete it for the new owner to recreate
    Delete,
}

/// One step of a [`TransferPlan`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferStep {
    /// Kind the step applies to
    pub kind: ResourceKind,
    /// Names selected
    pub selector: Selector,
    /// Action taken on each selected object
    pub action: TransferAction,
}

/// A concrete action against one object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedAction {
    /// Object acted on
    pub target: ResourceRef,
    /// Action
    pub action: TransferAction,
}

/// Ordered steps applied within one namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPlan {
    /// Namespace every step applies to
    pub namespace: String,
    /// Steps, in order
    pub steps: Vec<TransferStep>,
}

impl TransferPlan {
    /// Hand the cortex workloads to the cortex operator.
    ///
    /// memcached, configs and the loki gossip ring service stay with the
    /// controller. The query path Deployments changed selector labels and
    /// cannot be adopted.
    pub fn cortex() -> Self {
        use ResourceKind::*;
        use TransferAction::*;
        let step = |kind, selector, action| TransferStep {
            kind,
            selector,
            action,
        };
        Self {
            namespace: CORTEX_NAMESPACE.to_string(),
            steps: vec![
                step(StatefulSet, Selector::all_except(&["memcached"]), MarkImmutable),
                step(Deployment, Selector::all_except(&["configs"]), MarkImmutable),
                step(
                    Service,
                    Selector::all_except(&["loki-gossip-ring", "memcached", "configs"]),
                    MarkImmutable,
                ),
                step(ServiceAccount, Selector::only(&["cortex"]), MarkImmutable),
                step(ConfigMap, Selector::only(&["cortex-config"]), MarkImmutable),
                step(
                    Deployment,
                    Selector::only(&["distributor", "querier", "query-frontend"]),
                    Delete,
                ),
            ],
        }
    }

    /// Resolve the steps against `snapshot`, in order.
    ///
    /// Objects absent from the snapshot produce no action, so an `Only`
    /// delete of an already deleted Deployment is a no-op.
    pub fn actions(&self, snapshot: &ClusterSnapshot) -> Vec<PlannedAction> {
        let mut actions = Vec::new();
        for step in &self.steps {
            for name in names_in(snapshot, step.kind, &self.namespace) {
                if step.selector.matches(&name) {
                    actions.push(PlannedAction {
                        target: ResourceRef::new(step.kind, self.namespace.clone(), name),
                        action: step.action,
                    });
                }
            }
        }
        actions
    }

    /// Apply every action sequentially.
    ///
    /// A failure does not stop the sequence; all failures are reported
    /// together once every action has been attempted. Returns the number of
    /// actions applied.
    pub async fn apply(
        &self,
        snapshot: &ClusterSnapshot,
        writer: &dyn ClusterWriter,
    ) -> Result<usize> {
        let actions = self.actions(snapshot);
        let total = actions.len();
        let mut failures = Vec::new();

        for PlannedAction { target, action } in actions {
            let result = match action {
                TransferAction::MarkImmutable => {
                    debug!(target = %target, "marking immutable");
                    writer.annotate(&target, IMMUTABLE_ANNOTATION, "true").await
                }
                TransferAction::Delete => {
                    info!(target = %target, "deleting");
                    writer.delete(&target).await
                }
            };
            if let Err(e) = result {
                warn!(target = %target, error = %e, "ownership transfer action failed");
                failures.push(format!("{}: {}", target, e));
            }
        }

        if !failures.is_empty() {
            return Err(Error::internal_with_context(
                "transfer_ownership",
                format!(
                    "{} of {} actions failed: {}",
                    failures.len(),
                    total,
                    failures.join("; ")
                ),
            ));
        }
        info!(actions = total, "ownership transferred");
        Ok(total)
    }
}

fn names_in(snapshot: &ClusterSnapshot, kind: ResourceKind, namespace: &str) -> Vec<String> {
    fn collect<K: ResourceExt>(items: &[K], namespace: &str) -> Vec<String> {
        items
            .iter()
            .filter(|o| o.namespace().as_deref() == Some(namespace))
            .map(|o| o.name_any())
            .collect()
    }
    match kind {
        ResourceKind::StatefulSet => collect(&snapshot.stateful_sets, namespace),
        ResourceKind::Deployment => collect(&snapshot.deployments, namespace),
        ResourceKind::Service => collect(&snapshot.services, namespace),
        ResourceKind::ServiceAccount => collect(&snapshot.service_accounts, namespace),
        ResourceKind::ConfigMap => collect(&snapshot.config_maps, namespace),
    }
}

/// Stop the controller and hand the cortex workloads to the operator.
///
/// Skipped entirely when the operator is already deployed.
pub async fn operator_preamble(
    reader: &dyn ClusterReader,
    writer: &dyn ClusterWriter,
    snapshot: &ClusterSnapshot,
    wait: &ConvergeConfig,
) -> Result<()> {
    let controller = snapshot
        .deployment(CONTROLLER_NAMESPACE, CONTROLLER_NAME)
        .ok_or_else(|| {
            Error::invariant(
                "operator_preamble",
                format!(
                    "could not find deployment {}/{}",
                    CONTROLLER_NAMESPACE, CONTROLLER_NAME
                ),
            )
        })?;

    if snapshot
        .deployment(OPERATOR_NAMESPACE, OPERATOR_DEPLOYMENT)
        .is_some()
    {
        debug!("cortex operator already deployed, skipping ownership transfer");
        return Ok(());
    }

    let replicas = controller
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    if replicas > 0 {
        info!("stopping controller");
        writer
            .scale_deployment(CONTROLLER_NAMESPACE, CONTROLLER_NAME, 0)
            .await?;
        wait_for_controller_deployment(reader, None, wait).await?;
    }

    // Re-read so the plan sees the cluster as the stopped controller left it
    let snapshot = reader.snapshot().await?;
    TransferPlan::cortex().apply(&snapshot, writer).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upgrade::tests::{controller, meta};
    use crate::writer::MockClusterWriter;
    use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
    use k8s_openapi::api::core::v1::{ConfigMap, Service, ServiceAccount};
    use mockall::Sequence;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use stratus_common::{ApiError, MockClusterReader};

    fn cortex_snapshot() -> ClusterSnapshot {
        let ns = CORTEX_NAMESPACE;
        let deployment = |name: &str| Deployment {
            metadata: meta(ns, name),
            ..Default::default()
        };
        ClusterSnapshot {
            stateful_sets: ["ingester", "memcached", "compactor"]
                .iter()
                .map(|n| StatefulSet {
                    metadata: meta(ns, n),
                    ..Default::default()
                })
                .collect(),
            deployments: vec![
                deployment("configs"),
                deployment("distributor"),
                deployment("querier"),
                deployment("ruler"),
                Deployment {
                    metadata: meta("other", "querier"),
                    ..Default::default()
                },
            ],
            services: ["ingester", "memcached", "configs", "loki-gossip-ring", "querier"]
                .iter()
                .map(|n| Service {
                    metadata: meta(ns, n),
                    ..Default::default()
                })
                .collect(),
            service_accounts: ["cortex", "default"]
                .iter()
                .map(|n| ServiceAccount {
                    metadata: meta(ns, n),
                    ..Default::default()
                })
                .collect(),
            config_maps: ["cortex-config", "kube-root-ca.crt"]
                .iter()
                .map(|n| ConfigMap {
                    metadata: meta(ns, n),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    fn describe(actions: &[PlannedAction]) -> Vec<String> {
        actions
            .iter()
            .map(|a| format!("{:?} {}", a.action, a.target))
            .collect()
    }

    #[test]
    fn cortex_plan_resolves_in_order() {
        let actions = TransferPlan::cortex().actions(&cortex_snapshot());
        assert_eq!(
            describe(&actions),
            vec![
                "MarkImmutable StatefulSet cortex/ingester",
                "MarkImmutable StatefulSet cortex/compactor",
                "MarkImmutable Deployment cortex/distributor",
                "MarkImmutable Deployment cortex/querier",
                "MarkImmutable Deployment cortex/ruler",
                "MarkImmutable Service cortex/ingester",
                "MarkImmutable Service cortex/querier",
                "MarkImmutable ServiceAccount cortex/cortex",
                "MarkImmutable ConfigMap cortex/cortex-config",
                "Delete Deployment cortex/distributor",
                "Delete Deployment cortex/querier",
            ]
        );
    }

    #[test]
    fn skip_list_is_never_touched() {
        let plan = TransferPlan::cortex();
        let actions = plan.actions(&cortex_snapshot());
        for step in &plan.steps {
            if let Selector::AllExcept(skip) = &step.selector {
                for name in skip {
                    assert!(
                        !actions
                            .iter()
                            .any(|a| a.target.kind == step.kind && &a.target.name == name),
                        "{} {} must be skipped",
                        step.kind,
                        name
                    );
                }
            }
        }
    }

    #[test]
    fn missing_objects_produce_no_actions() {
        assert!(TransferPlan::cortex()
            .actions(&ClusterSnapshot::default())
            .is_empty());
    }

    fn recording_writer(
        fail_on: Option<&'static str>,
    ) -> (MockClusterWriter, Arc<Mutex<Vec<String>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut writer = MockClusterWriter::new();
        let sink = calls.clone();
        writer
            .expect_annotate()
            .returning(move |target, key, value| {
                assert_eq!((key, value), (IMMUTABLE_ANNOTATION, "true"));
                sink.lock().unwrap().push(format!("annotate {}", target));
                if Some(target.name.as_str()) == fail_on {
                    return Err(ApiError::new("kubernetes", "patch", "conflict")
                        .with_status(409)
                        .into());
                }
                Ok(())
            });
        let sink = calls.clone();
        writer.expect_delete().returning(move |target| {
            sink.lock().unwrap().push(format!("delete {}", target));
            Ok(())
        });
        (writer, calls)
    }

    #[tokio::test]
    async fn apply_runs_every_action() {
        let (writer, calls) = recording_writer(None);
        let applied = TransferPlan::cortex()
            .apply(&cortex_snapshot(), &writer)
            .await
            .unwrap();
        assert_eq!(applied, 11);
        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 11);
        assert_eq!(calls.last().unwrap(), "delete Deployment cortex/querier");
    }

    #[tokio::test]
    async fn failure_does_not_stop_the_sequence() {
        let (writer, calls) = recording_writer(Some("ingester"));
        let err = TransferPlan::cortex()
            .apply(&cortex_snapshot(), &writer)
            .await
            .unwrap_err();

        assert_eq!(calls.lock().unwrap().len(), 11);
        let msg = err.to_string();
        assert!(msg.contains("2 of 11 actions failed"), "{}", msg);
        assert!(msg.contains("StatefulSet cortex/ingester"));
        assert!(msg.contains("Service cortex/ingester"));
    }

    fn with_controller(mut snapshot: ClusterSnapshot, replicas: i32) -> ClusterSnapshot {
        snapshot
            .deployments
            .push(controller("stratus/controller:1.0.0", replicas));
        snapshot
    }

    #[tokio::test]
    async fn preamble_skips_when_operator_present() {
        let mut snapshot = with_controller(cortex_snapshot(), 1);
        snapshot.deployments.push(Deployment {
            metadata: meta(OPERATOR_NAMESPACE, OPERATOR_DEPLOYMENT),
            ..Default::default()
        });
        let reader = MockClusterReader::new();
        let writer = MockClusterWriter::new();

        operator_preamble(&reader, &writer, &snapshot, &ConvergeConfig::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn preamble_requires_controller() {
        let reader = MockClusterReader::new();
        let writer = MockClusterWriter::new();
        let err = operator_preamble(
            &reader,
            &writer,
            &cortex_snapshot(),
            &ConvergeConfig::default(),
        )
        .await
        .unwrap_err();
        assert!(err.is_invariant());
    }

    #[tokio::test(start_paused = true)]
    async fn preamble_stops_controller_before_transfer() {
        let mut seq = Sequence::new();
        let mut reader = MockClusterReader::new();
        let mut writer = MockClusterWriter::new();

        writer
            .expect_scale_deployment()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|ns, name, replicas| {
                assert_eq!((ns, name, replicas), (CONTROLLER_NAMESPACE, CONTROLLER_NAME, 0));
                Ok(())
            });
        reader
            .expect_snapshot()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(with_controller(cortex_snapshot(), 1)));
        reader
            .expect_snapshot()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|| Ok(with_controller(cortex_snapshot(), 0)));
        writer
            .expect_annotate()
            .times(9)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));
        writer
            .expect_delete()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        operator_preamble(
            &reader,
            &writer,
            &with_controller(cortex_snapshot(), 1),
            &ConvergeConfig::new(Duration::from_secs(1)),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn preamble_skips_scale_when_already_stopped() {
        let mut reader = MockClusterReader::new();
        reader
            .expect_snapshot()
            .times(1)
            .returning(|| Ok(with_controller(cortex_snapshot(), 0)));
        let (writer, calls) = recording_writer(None);

        operator_preamble(
            &reader,
            &writer,
            &with_controller(cortex_snapshot(), 0),
            &ConvergeConfig::default(),
        )
        .await
        .unwrap();
        assert_eq!(calls.lock().unwrap().len(), 11);
    }
}
