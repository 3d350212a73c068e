//! AWS SDK adapters for the cloud API traits
//!
//! This is the only module that sees SDK error types. Every failure leaves
//! here as an [`ApiError`] carrying the HTTP status and the AWS error code.

use std::collections::BTreeMap;

use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_iam::config::http::HttpResponse;
use aws_sdk_iam::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_route53::types::RrType;
use stratus_common::{ApiError, Error, Result};
use tracing::debug;

use crate::api::{
    DnsRecord, DnsZone, DnsZoneApi, EksApi, EksCluster, IamApi, Page, Role, RoleSpec, ZoneSnapshot,
};
use crate::config::CloudConfig;

/// Normalize an SDK failure into an [`ApiError`]
fn api_error<E>(
    service: &str,
    operation: &str,
    region: Option<&str>,
    err: SdkError<E, HttpResponse>,
) -> Error
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let mut api = ApiError::new(
        service,
        operation,
        err.message()
            .map(str::to_string)
            .unwrap_or_else(|| DisplayErrorContext(&err).to_string()),
    );
    if let Some(status) = err.raw_response().map(|r| r.status().as_u16()) {
        api = api.with_status(status);
    }
    if let Some(code) = err.code() {
        api = api.with_code(code);
    }
    if let Some(region) = region {
        api = api.in_region(region);
    }
    api.into()
}

/// Shared SDK configuration plus the service clients built from it
#[derive(Clone, Debug)]
pub struct AwsClients {
    sdk: SdkConfig,
    config: CloudConfig,
}

impl AwsClients {
    /// Load credentials from the environment and apply `config`
    pub async fn new(config: &CloudConfig) -> Result<Self> {
        config.validate()?;

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .retry_config(RetryConfig::standard().with_max_attempts(config.max_attempts))
            .timeout_config(
                TimeoutConfig::builder()
                    .connect_timeout(config.connect_timeout)
                    .read_timeout(config.read_timeout)
                    .build(),
            );
        if let Some(url) = &config.endpoint_url {
            loader = loader.endpoint_url(url);
        }

        Ok(Self {
            sdk: loader.load().await,
            config: config.clone(),
        })
    }

    /// IAM adapter
    pub fn iam(&self) -> AwsIam {
        AwsIam {
            client: aws_sdk_iam::Client::new(&self.sdk),
        }
    }

    /// Route 53 adapter
    pub fn route53(&self) -> AwsRoute53 {
        AwsRoute53 {
            client: aws_sdk_route53::Client::new(&self.sdk),
        }
    }

    /// EKS adapter; builds a regional client per call
    pub fn eks(&self) -> AwsEks {
        AwsEks {
            sdk: self.sdk.clone(),
            max_attempts: self.config.eks_max_attempts,
        }
    }
}

/// [`IamApi`] backed by `aws-sdk-iam`
#[derive(Clone, Debug)]
pub struct AwsIam {
    client: aws_sdk_iam::Client,
}

#[async_trait]
impl IamApi for AwsIam {
    async fn list_roles(&self, marker: Option<String>) -> Result<Page<Role>> {
        let out = self
            .client
            .list_roles()
            .set_marker(marker)
            .send()
            .await
            .map_err(|e| api_error("iam", "ListRoles", None, e))?;

        let items = out
            .roles()
            .iter()
            .map(|r| Role {
                name: r.role_name().to_string(),
                arn: r.arn().to_string(),
            })
            .collect();
        let next = if out.is_truncated() {
            out.marker().map(str::to_string)
        } else {
            None
        };
        Ok(Page { items, next })
    }

    async fn create_role(&self, spec: &RoleSpec) -> Result<Option<Role>> {
        let out = self
            .client
            .create_role()
            .role_name(&spec.name)
            .assume_role_policy_document(&spec.assume_role_policy_document)
            .send()
            .await
            .map_err(|e| api_error("iam", "CreateRole", None, e))?;

        Ok(out.role().map(|r| Role {
            name: r.role_name().to_string(),
            arn: r.arn().to_string(),
        }))
    }

    async fn delete_role(&self, name: &str) -> Result<()> {
        self.client
            .delete_role()
            .role_name(name)
            .send()
            .await
            .map_err(|e| api_error("iam", "DeleteRole", None, e))?;
        Ok(())
    }

    async fn attach_policy(&self, role: &str, policy_arn: &str) -> Result<()> {
        self.client
            .attach_role_policy()
            .role_name(role)
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(|e| api_error("iam", "AttachRolePolicy", None, e))?;
        Ok(())
    }

    async fn detach_policy(&self, role: &str, policy_arn: &str) -> Result<()> {
        self.client
            .detach_role_policy()
            .role_name(role)
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(|e| api_error("iam", "DetachRolePolicy", None, e))?;
        Ok(())
    }
}

/// [`DnsZoneApi`] backed by `aws-sdk-route53`
#[derive(Clone, Debug)]
pub struct AwsRoute53 {
    client: aws_sdk_route53::Client,
}

impl AwsRoute53 {
    async fn list_records(&self, zone_id: &str) -> Result<Vec<DnsRecord>> {
        let mut records = Vec::new();
        let mut start_name: Option<String> = None;
        let mut start_type: Option<RrType> = None;

        loop {
            let out = self
                .client
                .list_resource_record_sets()
                .hosted_zone_id(zone_id)
                .set_start_record_name(start_name.take())
                .set_start_record_type(start_type.take())
                .send()
                .await
                .map_err(|e| api_error("route53", "ListResourceRecordSets", None, e))?;

            records.extend(out.resource_record_sets().iter().map(|rs| DnsRecord {
                name: rs.name().to_string(),
                record_type: rs.r#type().as_str().to_string(),
                values: rs
                    .resource_records()
                    .iter()
                    .map(|r| r.value().to_string())
                    .collect(),
            }));

            if !out.is_truncated() {
                return Ok(records);
            }
            start_name = out.next_record_name().map(str::to_string);
            start_type = out.next_record_type().cloned();
            if start_name.is_none() {
                return Ok(records);
            }
        }
    }
}

#[async_trait]
impl DnsZoneApi for AwsRoute53 {
    async fn find_zone(&self, name: &str) -> Result<Option<ZoneSnapshot>> {
        let wanted = crate::dns::fqdn(name);
        let out = self
            .client
            .list_hosted_zones_by_name()
            .dns_name(&wanted)
            .max_items(1)
            .send()
            .await
            .map_err(|e| api_error("route53", "ListHostedZonesByName", None, e))?;

        // The listing starts at `wanted` but may return the next zone in order.
        let Some(zone) = out.hosted_zones().iter().find(|z| z.name() == wanted) else {
            debug!(zone = %wanted, "hosted zone not found");
            return Ok(None);
        };

        let zone = DnsZone {
            id: zone.id().to_string(),
            name: zone.name().to_string(),
        };
        let records = self.list_records(&zone.id).await?;
        Ok(Some(ZoneSnapshot { zone, records }))
    }

    async fn create_zone(&self, name: &str) -> Result<()> {
        let caller_reference = format!("{}-{}", name, chrono::Utc::now().timestamp_millis());
        self.client
            .create_hosted_zone()
            .name(crate::dns::fqdn(name))
            .caller_reference(caller_reference)
            .send()
            .await
            .map_err(|e| api_error("route53", "CreateHostedZone", None, e))?;
        Ok(())
    }

    async fn delete_zone(&self, id: &str) -> Result<()> {
        self.client
            .delete_hosted_zone()
            .id(id)
            .send()
            .await
            .map_err(|e| api_error("route53", "DeleteHostedZone", None, e))?;
        Ok(())
    }
}

/// [`EksApi`] backed by `aws-sdk-eks`
#[derive(Clone, Debug)]
pub struct AwsEks {
    sdk: SdkConfig,
    max_attempts: u32,
}

impl AwsEks {
    fn client(&self, region: &str) -> aws_sdk_eks::Client {
        let config = aws_sdk_eks::config::Builder::from(&self.sdk)
            .region(Region::new(region.to_string()))
            .retry_config(RetryConfig::standard().with_max_attempts(self.max_attempts))
            .build();
        aws_sdk_eks::Client::from_conf(config)
    }
}

#[async_trait]
impl EksApi for AwsEks {
    async fn list_clusters(&self, region: &str, next: Option<String>) -> Result<Page<String>> {
        let out = self
            .client(region)
            .list_clusters()
            .set_next_token(next)
            .send()
            .await
            .map_err(|e| api_error("eks", "ListClusters", Some(region), e))?;

        Ok(Page {
            items: out.clusters().to_vec(),
            next: out.next_token().map(str::to_string),
        })
    }

    async fn describe_cluster(&self, region: &str, name: &str) -> Result<Option<EksCluster>> {
        let out = self
            .client(region)
            .describe_cluster()
            .name(name)
            .send()
            .await
            .map_err(|e| api_error("eks", "DescribeCluster", Some(region), e))?;

        Ok(out.cluster().map(|c| EksCluster {
            name: c.name().unwrap_or(name).to_string(),
            region: region.to_string(),
            status: c.status().map(|s| s.as_str().to_string()),
            endpoint: c.endpoint().map(str::to_string),
            tags: c
                .tags()
                .map(|t| t.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_else(BTreeMap::new),
        }))
    }
}
