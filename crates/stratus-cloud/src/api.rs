//! Typed cloud API seams
//!
//! Each trait method is a single remote call. Implementations normalize
//! failures into [`stratus_common::ApiError`] before returning, so the
//! reconcilers only ever see HTTP status and provider code.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stratus_common::Result;

/// One page of a paginated listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    /// Items on this page
    pub items: Vec<T>,
    /// Continuation token; `None` on the last page
    pub next: Option<String>,
}

impl<T> Page<T> {
    /// A final page
    pub fn last(items: Vec<T>) -> Self {
        Self { items, next: None }
    }
}

/// Desired IAM role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleSpec {
    /// Role name
    pub name: String,
    /// Trust policy JSON
    pub assume_role_policy_document: String,
}

/// An IAM role as returned by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    /// Role name
    pub name: String,
    /// Role ARN
    pub arn: String,
}

/// IAM calls used by the role reconcilers
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IamApi: Send + Sync {
    /// One page of ListRoles, starting at `marker`
    async fn list_roles(&self, marker: Option<String>) -> Result<Page<Role>>;
    /// CreateRole; `None` if the provider answered without a role
    async fn create_role(&self, spec: &RoleSpec) -> Result<Option<Role>>;
    /// DeleteRole
    async fn delete_role(&self, name: &str) -> Result<()>;
    /// AttachRolePolicy
    async fn attach_policy(&self, role: &str, policy_arn: &str) -> Result<()>;
    /// DetachRolePolicy
    async fn detach_policy(&self, role: &str, policy_arn: &str) -> Result<()>;
}

/// A hosted DNS zone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsZone {
    /// Provider id, used to delete the zone
    pub id: String,
    /// Fully qualified zone name with trailing dot
    pub name: String,
}

/// A record set inside a zone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsRecord {
    /// Record name
    pub name: String,
    /// Record type, e.g. "NS"
    pub record_type: String,
    /// Record data
    pub values: Vec<String>,
}

/// A zone together with all of its record sets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneSnapshot {
    /// The zone
    pub zone: DnsZone,
    /// Every record set, pagination drained
    pub records: Vec<DnsRecord>,
}

impl ZoneSnapshot {
    /// Name servers from the zone's NS record set, if it has one with data
    pub fn nameservers(&self) -> Option<&[String]> {
        self.records
            .iter()
            .find(|r| r.record_type == "NS")
            .map(|r| r.values.as_slice())
            .filter(|v| !v.is_empty())
    }
}

/// Cloud DNS zone calls
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DnsZoneApi: Send + Sync {
    /// Look up a zone by exact name, with its records
    async fn find_zone(&self, name: &str) -> Result<Option<ZoneSnapshot>>;
    /// Create a zone
    async fn create_zone(&self, name: &str) -> Result<()>;
    /// Delete a zone by id
    async fn delete_zone(&self, id: &str) -> Result<()>;
}

/// An entry in the DNS registration service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsEntry {
    /// Instance name the entry was registered for
    pub clustername: String,
    /// Delegated name servers, empty until set
    #[serde(default)]
    pub nameservers: Vec<String>,
}

/// The DNS registration service that delegates `<instance>.<domain>` to us
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DnsRegistrationApi: Send + Sync {
    /// All entries owned by the caller
    async fn list_entries(&self) -> Result<Vec<DnsEntry>>;
    /// Register a new instance name
    async fn create_entry(&self, clustername: &str) -> Result<()>;
    /// Point the instance's delegation at `nameservers`
    async fn set_nameservers(&self, clustername: &str, nameservers: &[String]) -> Result<()>;
}

/// An EKS cluster as described by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EksCluster {
    /// Cluster name
    pub name: String,
    /// Region the cluster lives in
    pub region: String,
    /// Provider status, e.g. "ACTIVE"
    pub status: Option<String>,
    /// API server endpoint
    pub endpoint: Option<String>,
    /// Resource tags
    pub tags: BTreeMap<String, String>,
}

/// EKS calls, addressed per region
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EksApi: Send + Sync {
    /// One page of ListClusters in `region`
    async fn list_clusters(&self, region: &str, next: Option<String>) -> Result<Page<String>>;
    /// DescribeCluster; `None` if the response had no cluster
    async fn describe_cluster(&self, region: &str, name: &str) -> Result<Option<EksCluster>>;
}
