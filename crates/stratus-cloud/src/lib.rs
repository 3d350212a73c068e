//! Cloud resource clients and reconcilers
//!
//! The [`api`] traits are the only way reconcilers talk to a provider. The
//! [`aws`] and [`registration`] modules implement them over the AWS SDK and
//! HTTP; tests implement them with mockall.

#![warn(missing_docs)]

pub mod api;
pub mod aws;
pub mod config;
pub mod dns;
pub mod eks;
pub mod iam;
pub mod registration;

pub use api::{
    DnsEntry, DnsRecord, DnsRegistrationApi, DnsZone, DnsZoneApi, EksApi, EksCluster, IamApi,
    Page, Role, RoleSpec, ZoneSnapshot,
};
pub use aws::AwsClients;
pub use config::{CloudConfig, DnsServiceConfig};
pub use registration::HttpDnsRegistration;
