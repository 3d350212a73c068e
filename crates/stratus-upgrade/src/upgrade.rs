//! Controller deployment and config map upgrade
//!
//! Not a polling loop: each step is a single compare-and-mutate against the
//! snapshot it is given. Kubernetes' own rollout converges the pods, and a
//! failed step is retried by re-running the upgrade.

use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use serde::{Deserialize, Serialize};
use stratus_common::{
    ClusterReader, ClusterSnapshot, ConvergeConfig, Error, Result, CONTROLLER_CONFIGMAP_NAME,
    CONTROLLER_CONFIG_KEY, CONTROLLER_NAME, CONTROLLER_NAMESPACE,
};
use stratus_readiness::{wait_for_controller_deployment, wait_until_ready};
use tracing::{info, instrument};

use crate::build_info::{controller_image, image_tag};
use crate::controller_config::ControllerConfig;
use crate::transfer::operator_preamble;
use crate::writer::ClusterWriter;

/// Replicas the controller runs with
pub const CONTROLLER_REPLICAS: i32 = 1;

/// User-given settings copied into the controller config on upgrade
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigOverrides {
    /// DNS name override
    #[serde(default)]
    pub custom_dns_name: Option<String>,
    /// Auth0 client id override; the domain is only copied alongside it
    #[serde(default)]
    pub custom_auth0_client_id: Option<String>,
    /// Auth0 domain override
    #[serde(default)]
    pub custom_auth0_domain: Option<String>,
}

/// Result of [`run_upgrade`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeOutcome {
    /// Installed controller already matches this build
    UpToDate,
    /// Controller moved from `from` to `to`
    Upgraded {
        /// Image before the upgrade
        from: String,
        /// Image after the upgrade
        to: String,
    },
}

fn controller_deployment(snapshot: &ClusterSnapshot) -> Result<&Deployment> {
    snapshot
        .deployment(CONTROLLER_NAMESPACE, CONTROLLER_NAME)
        .ok_or_else(|| {
            Error::invariant(
                "controller_deployment",
                format!(
                    "could not find deployment {}/{}",
                    CONTROLLER_NAMESPACE, CONTROLLER_NAME
                ),
            )
        })
}

/// Name and image of the controller's first container
pub fn installed_controller(snapshot: &ClusterSnapshot) -> Result<(&str, &str)> {
    let deployment = controller_deployment(snapshot)?;
    deployment
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .and_then(|s| s.containers.first())
        .and_then(|c| c.image.as_deref().map(|image| (c.name.as_str(), image)))
        .ok_or_else(|| {
            Error::invariant(
                "controller_deployment",
                "controller deployment has no container image",
            )
        })
}

/// Read the controller config out of the snapshot
pub fn controller_config(snapshot: &ClusterSnapshot) -> Result<ControllerConfig> {
    let cm = snapshot
        .config_map(CONTROLLER_NAMESPACE, CONTROLLER_CONFIGMAP_NAME)
        .ok_or_else(|| {
            Error::invariant(
                "controller_config",
                format!(
                    "could not find config map {}/{}",
                    CONTROLLER_NAMESPACE, CONTROLLER_CONFIGMAP_NAME
                ),
            )
        })?;
    ControllerConfig::from_config_map(cm)
}

/// Decide whether the installed controller needs to move to `build_version`.
///
/// The recorded history only decides once it holds more than one version. A
/// last entry that disagrees with the installed image tag then means the
/// config map and the deployment have drifted apart; that is reported as an
/// error rather than guessed at. Otherwise the installed image is compared
/// with this build's image.
pub fn requires_upgrade(snapshot: &ClusterSnapshot, build_version: &str) -> Result<bool> {
    let config = controller_config(snapshot)?;
    let (_, installed) = installed_controller(snapshot)?;
    let versions = &config.cli_metadata.all_cli_versions;

    if let [_, .., last] = versions.as_slice() {
        if last.version != image_tag(installed) {
            return Err(Error::invariant(
                "requires_upgrade",
                format!(
                    "found version mismatch, last CLI version {} in controller configuration does not match installed controller version {}",
                    last.version,
                    image_tag(installed)
                ),
            ));
        }
        if last.version != build_version {
            info!(recorded = %last.version, build = %build_version, "CLI version changed");
            return Ok(true);
        }
    }

    let desired = controller_image(build_version);
    if installed != desired {
        info!(installed = %installed, desired = %desired, "controller image differs");
        return Ok(true);
    }
    Ok(false)
}

/// Point the controller deployment at this build's image.
///
/// One update, never retried here.
#[instrument(skip(snapshot, writer))]
pub async fn upgrade_controller_deployment(
    snapshot: &ClusterSnapshot,
    writer: &dyn ClusterWriter,
    build_version: &str,
) -> Result<String> {
    let (container, installed) = installed_controller(snapshot)?;
    let desired = controller_image(build_version);
    info!(from = %installed, to = %desired, "upgrading controller image");
    writer
        .update_deployment(
            CONTROLLER_NAMESPACE,
            CONTROLLER_NAME,
            container,
            &desired,
            CONTROLLER_REPLICAS,
        )
        .await?;
    Ok(desired)
}

/// Record `build_version` in the controller config and copy the overrides.
#[instrument(skip(snapshot, writer, overrides, now))]
pub async fn upgrade_controller_config_map(
    snapshot: &ClusterSnapshot,
    writer: &dyn ClusterWriter,
    overrides: &ConfigOverrides,
    build_version: &str,
    now: DateTime<Utc>,
) -> Result<ControllerConfig> {
    let mut config = controller_config(snapshot)?;
    config.record_version(build_version, now);

    if let Some(client_id) = &overrides.custom_auth0_client_id {
        config.custom_auth0_client_id = Some(client_id.clone());
        config.custom_auth0_domain = overrides.custom_auth0_domain.clone();
    }
    if let Some(dns_name) = &overrides.custom_dns_name {
        config.custom_dns_name = Some(dns_name.clone());
    }

    writer
        .write_config_map_data(
            CONTROLLER_NAMESPACE,
            CONTROLLER_CONFIGMAP_NAME,
            CONTROLLER_CONFIG_KEY,
            &config.to_json()?,
        )
        .await?;
    info!("controller config updated");
    Ok(config)
}

/// Full upgrade: version check, ownership transfer, config map, deployment,
/// then wait for the controller and every workload to be ready again.
pub async fn run_upgrade(
    reader: &dyn ClusterReader,
    writer: &dyn ClusterWriter,
    overrides: &ConfigOverrides,
    build_version: &str,
    wait: &ConvergeConfig,
) -> Result<UpgradeOutcome> {
    let snapshot = reader.snapshot().await?;
    if !requires_upgrade(&snapshot, build_version)? {
        info!(version = %build_version, "controller is up to date");
        return Ok(UpgradeOutcome::UpToDate);
    }
    let (_, from) = installed_controller(&snapshot)?;
    let from = from.to_string();

    operator_preamble(reader, writer, &snapshot, wait).await?;

    let snapshot = reader.snapshot().await?;
    upgrade_controller_config_map(&snapshot, writer, overrides, build_version, Utc::now())
        .await?;
    let to = upgrade_controller_deployment(&snapshot, writer, build_version).await?;

    wait_for_controller_deployment(reader, Some(CONTROLLER_REPLICAS), wait).await?;
    wait_until_ready(reader, wait).await?;
    Ok(UpgradeOutcome::Upgraded { from, to })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::transfer::CORTEX_NAMESPACE;
    use crate::writer::MockClusterWriter;
    use chrono::TimeZone;
    use k8s_openapi::api::apps::v1::{DeploymentSpec, DeploymentStatus};
    use k8s_openapi::api::core::v1::{ConfigMap, Container, PodSpec, PodTemplateSpec};
    use kube::api::ObjectMeta;
    use mockall::Sequence;
    use serde_json::Value;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use stratus_common::IMMUTABLE_ANNOTATION;
    use tokio::time::Instant;

    pub(crate) fn meta(namespace: &str, name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }
    }

    pub(crate) fn controller(image: &str, replicas: i32) -> Deployment {
        Deployment {
            metadata: meta(CONTROLLER_NAMESPACE, CONTROLLER_NAME),
            spec: Some(DeploymentSpec {
                replicas: Some(replicas),
                template: PodTemplateSpec {
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: "controller".to_string(),
                            image: Some(image.to_string()),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                ..Default::default()
            }),
            status: Some(DeploymentStatus {
                ready_replicas: Some(replicas),
                ..Default::default()
            }),
        }
    }

    pub(crate) fn config_map(json: &str) -> ConfigMap {
        ConfigMap {
            metadata: meta(CONTROLLER_NAMESPACE, CONTROLLER_CONFIGMAP_NAME),
            data: Some(BTreeMap::from([(
                CONTROLLER_CONFIG_KEY.to_string(),
                json.to_string(),
            )])),
            ..Default::default()
        }
    }

    fn history(versions: &[&str]) -> String {
        let entries: Vec<Value> = versions
            .iter()
            .map(|v| serde_json::json!({ "version": v, "timestamp": "2021-07-28T15:43:07Z" }))
            .collect();
        serde_json::json!({ "name": "prod", "cliMetadata": { "allCLIVersions": entries } })
            .to_string()
    }

    fn rolled_out_controller(image: &str) -> Deployment {
        let mut deployment = controller(image, 1);
        deployment.status = Some(DeploymentStatus {
            replicas: Some(1),
            updated_replicas: Some(1),
            available_replicas: Some(1),
            ready_replicas: Some(1),
            ..Default::default()
        });
        deployment
    }

    fn snapshot(image: &str, config: &str) -> ClusterSnapshot {
        ClusterSnapshot {
            deployments: vec![controller(image, 1)],
            config_maps: vec![config_map(config)],
            ..Default::default()
        }
    }

    #[test]
    fn up_to_date_controller_needs_no_upgrade() {
        let s = snapshot("stratus/controller:1.1.0", &history(&["1.0.0", "1.1.0"]));
        assert!(!requires_upgrade(&s, "1.1.0").unwrap());
    }

    #[test]
    fn newer_build_requires_upgrade() {
        let s = snapshot("stratus/controller:1.1.0", &history(&["1.0.0", "1.1.0"]));
        assert!(requires_upgrade(&s, "1.2.0").unwrap());
    }

    #[test]
    fn image_drift_requires_upgrade() {
        let s = snapshot("stratus/controller:1.1.0", r#"{"name":"prod"}"#);
        assert!(requires_upgrade(&s, "1.2.0").unwrap());
    }

    #[test]
    fn single_recorded_version_defers_to_image() {
        let s = snapshot("stratus/controller:1.2.0", &history(&["1.0.0"]));
        assert!(!requires_upgrade(&s, "1.2.0").unwrap());

        let s = snapshot("stratus/controller:1.0.0", &history(&["1.0.0"]));
        assert!(requires_upgrade(&s, "1.2.0").unwrap());
    }

    #[test]
    fn empty_history_compares_image_only() {
        let s = snapshot("stratus/controller:1.2.0", r#"{"name":"prod"}"#);
        assert!(!requires_upgrade(&s, "1.2.0").unwrap());
        assert!(requires_upgrade(&s, "1.3.0").unwrap());
    }

    #[test]
    fn history_and_image_disagreeing_is_fatal() {
        let s = snapshot("stratus/controller:1.0.0", &history(&["1.0.0", "1.1.0"]));
        let err = requires_upgrade(&s, "1.2.0").unwrap_err();
        assert!(err.is_invariant());
        assert!(err.to_string().contains("version mismatch"));
    }

    #[test]
    fn missing_controller_is_fatal() {
        let s = ClusterSnapshot {
            config_maps: vec![config_map("{}")],
            ..Default::default()
        };
        assert!(requires_upgrade(&s, "1.0.0").unwrap_err().is_invariant());
    }

    #[test]
    fn missing_config_map_is_fatal() {
        let s = ClusterSnapshot {
            deployments: vec![controller("stratus/controller:1.0.0", 1)],
            ..Default::default()
        };
        let err = requires_upgrade(&s, "1.0.0").unwrap_err();
        assert!(err.to_string().contains(CONTROLLER_CONFIGMAP_NAME));
    }

    #[tokio::test]
    async fn deployment_upgrade_is_one_update() {
        let s = snapshot("stratus/controller:1.0.0", &history(&["1.0.0"]));
        let mut writer = MockClusterWriter::new();
        writer.expect_update_deployment().times(1).returning(
            |ns, name, container, image, replicas| {
                assert_eq!((ns, name), (CONTROLLER_NAMESPACE, CONTROLLER_NAME));
                assert_eq!(container, "controller");
                assert_eq!(image, "stratus/controller:1.1.0");
                assert_eq!(replicas, CONTROLLER_REPLICAS);
                Ok(())
            },
        );

        let image = upgrade_controller_deployment(&s, &writer, "1.1.0")
            .await
            .unwrap();
        assert_eq!(image, "stratus/controller:1.1.0");
    }

    #[tokio::test]
    async fn deployment_update_failure_is_not_retried() {
        let s = snapshot("stratus/controller:1.0.0", &history(&["1.0.0"]));
        let mut writer = MockClusterWriter::new();
        writer
            .expect_update_deployment()
            .times(1)
            .returning(|_, _, _, _, _| {
                Err(stratus_common::ApiError::new("kubernetes", "patch", "unavailable")
                    .with_status(503)
                    .into())
            });

        let err = upgrade_controller_deployment(&s, &writer, "1.1.0")
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), Some(503));
    }

    fn capture_config(writer: &mut MockClusterWriter) -> Arc<Mutex<Option<String>>> {
        let written = Arc::new(Mutex::new(None));
        let sink = written.clone();
        writer
            .expect_write_config_map_data()
            .times(1)
            .returning(move |ns, name, key, value| {
                assert_eq!((ns, name, key), (
                    CONTROLLER_NAMESPACE,
                    CONTROLLER_CONFIGMAP_NAME,
                    CONTROLLER_CONFIG_KEY
                ));
                *sink.lock().unwrap() = Some(value.to_string());
                Ok(())
            });
        written
    }

    #[tokio::test]
    async fn config_map_upgrade_appends_version_and_overrides() {
        let s = snapshot("stratus/controller:1.0.0", &history(&["1.0.0"]));
        let mut writer = MockClusterWriter::new();
        let written = capture_config(&mut writer);
        let overrides = ConfigOverrides {
            custom_dns_name: Some("observe.example.com".to_string()),
            custom_auth0_client_id: Some("client".to_string()),
            custom_auth0_domain: Some("example.auth0.com".to_string()),
        };
        let now = Utc.with_ymd_and_hms(2021, 8, 2, 9, 0, 0).unwrap();

        let cfg = upgrade_controller_config_map(&s, &writer, &overrides, "1.1.0", now)
            .await
            .unwrap();
        assert_eq!(cfg.last_cli_version(), Some("1.1.0"));

        let stored: Value =
            serde_json::from_str(written.lock().unwrap().as_deref().unwrap()).unwrap();
        let versions = stored["cliMetadata"]["allCLIVersions"].as_array().unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[1]["timestamp"], "2021-08-02T09:00:00Z");
        assert_eq!(stored["custom_dns_name"], "observe.example.com");
        assert_eq!(stored["custom_auth0_client_id"], "client");
        assert_eq!(stored["custom_auth0_domain"], "example.auth0.com");
        assert_eq!(stored["name"], "prod");
    }

    #[tokio::test]
    async fn auth0_domain_needs_client_id() {
        let s = snapshot("stratus/controller:1.0.0", r#"{"name":"prod"}"#);
        let mut writer = MockClusterWriter::new();
        let written = capture_config(&mut writer);
        let overrides = ConfigOverrides {
            custom_auth0_domain: Some("example.auth0.com".to_string()),
            ..Default::default()
        };

        let cfg = upgrade_controller_config_map(&s, &writer, &overrides, "1.1.0", Utc::now())
            .await
            .unwrap();
        assert_eq!(cfg.custom_auth0_domain, None);
        let stored: Value =
            serde_json::from_str(written.lock().unwrap().as_deref().unwrap()).unwrap();
        assert!(stored.get("custom_auth0_domain").is_none());
    }

    #[tokio::test]
    async fn run_upgrade_short_circuits_when_current() {
        let mut reader = stratus_common::MockClusterReader::new();
        reader.expect_snapshot().times(1).returning(|| {
            Ok(snapshot("stratus/controller:1.1.0", &history(&["1.1.0"])))
        });
        let writer = MockClusterWriter::new();

        let outcome = run_upgrade(
            &reader,
            &writer,
            &ConfigOverrides::default(),
            "1.1.0",
            &ConvergeConfig::default(),
        )
        .await
        .unwrap();
        assert_eq!(outcome, UpgradeOutcome::UpToDate);
    }

    #[tokio::test(start_paused = true)]
    async fn run_upgrade_walks_every_step_in_order() {
        let mut reader = stratus_common::MockClusterReader::new();
        let mut writer = MockClusterWriter::new();
        let mut seq = Sequence::new();

        reader
            .expect_snapshot()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(snapshot("stratus/controller:1.0.0", &history(&["1.0.0"]))));
        writer
            .expect_scale_deployment()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|ns, name, replicas| {
                assert_eq!((ns, name, replicas), (CONTROLLER_NAMESPACE, CONTROLLER_NAME, 0));
                Ok(())
            });
        // Controller scaled down, with one cortex workload left to hand over
        reader
            .expect_snapshot()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|| {
                let mut s = snapshot("stratus/controller:1.0.0", &history(&["1.0.0"]));
                s.deployments[0] = controller("stratus/controller:1.0.0", 0);
                s.deployments.push(Deployment {
                    metadata: meta(CORTEX_NAMESPACE, "querier"),
                    ..Default::default()
                });
                Ok(s)
            });
        writer
            .expect_annotate()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|target, key, value| {
                assert_eq!(target.to_string(), "Deployment cortex/querier");
                assert_eq!((key, value), (IMMUTABLE_ANNOTATION, "true"));
                Ok(())
            });
        writer
            .expect_delete()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|target| {
                assert_eq!(target.to_string(), "Deployment cortex/querier");
                Ok(())
            });
        reader
            .expect_snapshot()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| {
                let mut s = snapshot("stratus/controller:1.0.0", &history(&["1.0.0"]));
                s.deployments[0] = controller("stratus/controller:1.0.0", 0);
                Ok(s)
            });
        writer
            .expect_write_config_map_data()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|ns, name, key, value| {
                assert_eq!(
                    (ns, name, key),
                    (CONTROLLER_NAMESPACE, CONTROLLER_CONFIGMAP_NAME, CONTROLLER_CONFIG_KEY)
                );
                let stored: Value = serde_json::from_str(value).unwrap();
                let versions = stored["cliMetadata"]["allCLIVersions"].as_array().unwrap();
                assert_eq!(versions.len(), 2);
                assert_eq!(versions[1]["version"], "1.1.0");
                Ok(())
            });
        writer
            .expect_update_deployment()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|ns, name, container, image, replicas| {
                assert_eq!((ns, name), (CONTROLLER_NAMESPACE, CONTROLLER_NAME));
                assert_eq!(container, "controller");
                assert_eq!(image, "stratus/controller:1.1.0");
                assert_eq!(replicas, CONTROLLER_REPLICAS);
                Ok(())
            });
        // Pods of the new image come up on the second look
        reader
            .expect_snapshot()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| {
                let mut s = snapshot("stratus/controller:1.1.0", &history(&["1.0.0", "1.1.0"]));
                s.deployments[0] = controller("stratus/controller:1.1.0", 0);
                Ok(s)
            });
        reader
            .expect_snapshot()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|| {
                Ok(ClusterSnapshot {
                    deployments: vec![rolled_out_controller("stratus/controller:1.1.0")],
                    ..Default::default()
                })
            });

        let wait = ConvergeConfig::new(Duration::from_secs(1));
        let start = Instant::now();
        let outcome = run_upgrade(&reader, &writer, &ConfigOverrides::default(), "1.1.0", &wait)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            UpgradeOutcome::Upgraded {
                from: "stratus/controller:1.0.0".to_string(),
                to: "stratus/controller:1.1.0".to_string(),
            }
        );
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn run_upgrade_refuses_drifted_history_without_writing() {
        let mut reader = stratus_common::MockClusterReader::new();
        reader.expect_snapshot().times(1).returning(|| {
            Ok(snapshot("stratus/controller:1.0.0", &history(&["1.0.0", "1.1.0"])))
        });
        let writer = MockClusterWriter::new();

        let err = run_upgrade(
            &reader,
            &writer,
            &ConfigOverrides::default(),
            "1.2.0",
            &ConvergeConfig::default(),
        )
        .await
        .unwrap_err();
        assert!(err.is_invariant());
        assert!(err.to_string().contains("version mismatch"));
    }
}
