//! Mutations the upgrade path makes against the cluster

use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Service, ServiceAccount};
use kube::api::{Api, DeleteParams, Patch, PatchParams};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde_json::json;
use stratus_common::kube_utils::is_not_found;
use stratus_common::Result;
use tracing::{debug, info};

/// Kinds the upgrade path touches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// apps/v1 StatefulSet
    StatefulSet,
    /// apps/v1 Deployment
    Deployment,
    /// v1 Service
    Service,
    /// v1 ServiceAccount
    ServiceAccount,
    /// v1 ConfigMap
    ConfigMap,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::StatefulSet => "StatefulSet",
            ResourceKind::Deployment => "Deployment",
            ResourceKind::Service => "Service",
            ResourceKind::ServiceAccount => "ServiceAccount",
            ResourceKind::ConfigMap => "ConfigMap",
        };
        f.write_str(s)
    }
}

/// A namespaced object
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    /// Kind
    pub kind: ResourceKind,
    /// Namespace
    pub namespace: String,
    /// Name
    pub name: String,
}

impl ResourceRef {
    /// Create a reference
    pub fn new(kind: ResourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// Writes made by the upgrade path
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterWriter: Send + Sync {
    /// Set `spec.replicas` of a Deployment
    async fn scale_deployment(&self, namespace: &str, name: &str, replicas: i32) -> Result<()>;

    /// Add one annotation, leaving the others in place
    async fn annotate(&self, target: &ResourceRef, key: &str, value: &str) -> Result<()>;

    /// Delete an object; already gone counts as success
    async fn delete(&self, target: &ResourceRef) -> Result<()>;

    /// Set the image of one container and the replica count of a Deployment
    async fn update_deployment(
        &self,
        namespace: &str,
        name: &str,
        container: &str,
        image: &str,
        replicas: i32,
    ) -> Result<()>;

    /// Set one key of a ConfigMap's data
    async fn write_config_map_data(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        value: &str,
    ) -> Result<()>;
}

/// [`ClusterWriter`] backed by the Kubernetes API
pub struct KubeClusterWriter {
    client: Client,
}

impl KubeClusterWriter {
    /// Create a writer
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn merge<K>(&self, namespace: &str, name: &str, patch: serde_json::Value) -> Result<()>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + fmt::Debug,
        <K as Resource>::DynamicType: Default,
    {
        self.api::<K>(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn delete_named<K>(&self, namespace: &str, name: &str) -> Result<()>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + fmt::Debug,
        <K as Resource>::DynamicType: Default,
    {
        match self
            .api::<K>(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => {
                debug!(namespace = %namespace, name = %name, "already deleted");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ClusterWriter for KubeClusterWriter {
    async fn scale_deployment(&self, namespace: &str, name: &str, replicas: i32) -> Result<()> {
        info!(namespace = %namespace, name = %name, replicas, "scaling deployment");
        self.merge::<Deployment>(namespace, name, json!({ "spec": { "replicas": replicas } }))
            .await
    }

    async fn annotate(&self, target: &ResourceRef, key: &str, value: &str) -> Result<()> {
        let patch = json!({ "metadata": { "annotations": { key: value } } });
        let (ns, name) = (target.namespace.as_str(), target.name.as_str());
        match target.kind {
            ResourceKind::StatefulSet => self.merge::<StatefulSet>(ns, name, patch).await,
            ResourceKind::Deployment => self.merge::<Deployment>(ns, name, patch).await,
            ResourceKind::Service => self.merge::<Service>(ns, name, patch).await,
            ResourceKind::ServiceAccount => self.merge::<ServiceAccount>(ns, name, patch).await,
            ResourceKind::ConfigMap => self.merge::<ConfigMap>(ns, name, patch).await,
        }
    }

    async fn delete(&self, target: &ResourceRef) -> Result<()> {
        let (ns, name) = (target.namespace.as_str(), target.name.as_str());
        match target.kind {
            ResourceKind::StatefulSet => self.delete_named::<StatefulSet>(ns, name).await,
            ResourceKind::Deployment => self.delete_named::<Deployment>(ns, name).await,
            ResourceKind::Service => self.delete_named::<Service>(ns, name).await,
            ResourceKind::ServiceAccount => self.delete_named::<ServiceAccount>(ns, name).await,
            ResourceKind::ConfigMap => self.delete_named::<ConfigMap>(ns, name).await,
        }
    }

    async fn update_deployment(
        &self,
        namespace: &str,
        name: &str,
        container: &str,
        image: &str,
        replicas: i32,
    ) -> Result<()> {
        // Strategic merge keys containers by name, so siblings are untouched
        let patch = json!({
            "spec": {
                "replicas": replicas,
                "template": { "spec": { "containers": [
                    { "name": container, "image": image }
                ] } }
            }
        });
        self.api::<Deployment>(namespace)
            .patch(name, &PatchParams::default(), &Patch::Strategic(&patch))
            .await?;
        Ok(())
    }

    async fn write_config_map_data(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        value: &str,
    ) -> Result<()> {
        self.merge::<ConfigMap>(namespace, name, json!({ "data": { key: value } }))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_ref_display() {
        let r = ResourceRef::new(ResourceKind::StatefulSet, "cortex", "ingester");
        assert_eq!(r.to_string(), "StatefulSet cortex/ingester");
    }
}
