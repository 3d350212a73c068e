//! Point-in-time view of the cluster resources stratus reasons about
//!
//! The readiness reporter and the ownership transfer sequencer both work from
//! a [`ClusterSnapshot`] rather than issuing their own list calls. A snapshot
//! is never cached beyond the iteration that fetched it.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolume, Service, ServiceAccount};
use kube::api::{ApiResource, DynamicObject, GroupVersionKind, ListParams};
use kube::{Api, Client};
use tracing::debug;

use crate::kube_utils::is_not_found;
use crate::Result;

/// API group of cert-manager certificates
pub const CERTIFICATE_GROUP: &str = "cert-manager.io";
/// API version of cert-manager certificates
pub const CERTIFICATE_VERSION: &str = "v1";
/// Kind of cert-manager certificates
pub const CERTIFICATE_KIND: &str = "Certificate";

/// Resources listed across all namespaces at one point in time
#[derive(Debug, Clone, Default)]
pub struct ClusterSnapshot {
    /// All Deployments
    pub deployments: Vec<Deployment>,
    /// All DaemonSets
    pub daemon_sets: Vec<DaemonSet>,
    /// All StatefulSets
    pub stateful_sets: Vec<StatefulSet>,
    /// All Services
    pub services: Vec<Service>,
    /// All ServiceAccounts
    pub service_accounts: Vec<ServiceAccount>,
    /// All ConfigMaps
    pub config_maps: Vec<ConfigMap>,
    /// All PersistentVolumes (cluster scoped)
    pub persistent_volumes: Vec<PersistentVolume>,
    /// All cert-manager Certificates; empty when the CRD is not installed
    pub certificates: Vec<DynamicObject>,
}

impl ClusterSnapshot {
    /// Find a deployment by namespace and name
    pub fn deployment(&self, namespace: &str, name: &str) -> Option<&Deployment> {
        self.deployments.iter().find(|d| {
            d.metadata.namespace.as_deref() == Some(namespace)
                && d.metadata.name.as_deref() == Some(name)
        })
    }

    /// Find a config map by namespace and name
    pub fn config_map(&self, namespace: &str, name: &str) -> Option<&ConfigMap> {
        self.config_maps.iter().find(|c| {
            c.metadata.namespace.as_deref() == Some(namespace)
                && c.metadata.name.as_deref() == Some(name)
        })
    }
}

/// Read access to cluster state
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ClusterReader: Send + Sync {
    /// List every resource kind in [`ClusterSnapshot`]
    async fn snapshot(&self) -> Result<ClusterSnapshot>;
}

/// [`ClusterReader`] backed by the Kubernetes API
pub struct KubeClusterReader {
    client: Client,
}

impl KubeClusterReader {
    /// Create a reader using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn list_all<K>(&self) -> Result<Vec<K>>
    where
        K: kube::Resource<DynamicType = ()>
            + Clone
            + serde::de::DeserializeOwned
            + std::fmt::Debug,
    {
        let api: Api<K> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_certificates(&self) -> Result<Vec<DynamicObject>> {
        let gvk = GroupVersionKind::gvk(CERTIFICATE_GROUP, CERTIFICATE_VERSION, CERTIFICATE_KIND);
        let ar = ApiResource::from_gvk(&gvk);
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &ar);
        match api.list(&ListParams::default()).await {
            Ok(list) => Ok(list.items),
            Err(e) if is_not_found(&e) => {
                debug!("certificate CRD not installed, treating as no certificates");
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ClusterReader for KubeClusterReader {
    async fn snapshot(&self) -> Result<ClusterSnapshot> {
        let (
            deployments,
            daemon_sets,
            stateful_sets,
            services,
            service_accounts,
            config_maps,
            persistent_volumes,
            certificates,
        ) = tokio::try_join!(
            self.list_all::<Deployment>(),
            self.list_all::<DaemonSet>(),
            self.list_all::<StatefulSet>(),
            self.list_all::<Service>(),
            self.list_all::<ServiceAccount>(),
            self.list_all::<ConfigMap>(),
            self.list_all::<PersistentVolume>(),
            self.list_certificates(),
        )?;

        Ok(ClusterSnapshot {
            deployments,
            daemon_sets,
            stateful_sets,
            services,
            service_accounts,
            config_maps,
            persistent_volumes,
            certificates,
        })
    }
}
