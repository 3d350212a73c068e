//! Cloud client configuration
//!
//! Passed explicitly to every client constructor. Nothing here is global.

use std::time::Duration;

use stratus_common::{Error, Result};

/// Default SDK-level retry attempts per call
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
/// EKS calls are retried more, the regional endpoints throttle harder
pub const DEFAULT_EKS_MAX_ATTEMPTS: u32 = 15;
/// Default time to establish a connection
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(6000);
/// Default time to wait for the first response byte
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(30000);

/// Settings shared by all AWS clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudConfig {
    /// Region for regional services
    pub region: String,
    /// SDK retry attempts for IAM and Route 53
    pub max_attempts: u32,
    /// SDK retry attempts for EKS
    pub eks_max_attempts: u32,
    /// Connect timeout per HTTP call
    pub connect_timeout: Duration,
    /// Read timeout per HTTP call
    pub read_timeout: Duration,
    /// Override endpoint (e.g. LocalStack)
    pub endpoint_url: Option<String>,
}

impl CloudConfig {
    /// Defaults for the given region
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            eks_max_attempts: DEFAULT_EKS_MAX_ATTEMPTS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            endpoint_url: None,
        }
    }

    /// Send every call to `url` instead of the AWS endpoints
    pub fn with_endpoint_url(mut self, url: impl Into<String>) -> Self {
        self.endpoint_url = Some(url.into());
        self
    }

    /// Reject configs the SDK would fail on later with a worse message
    pub fn validate(&self) -> Result<()> {
        if self.region.trim().is_empty() {
            return Err(Error::config_for_field("region", "region must not be empty"));
        }
        if self.max_attempts == 0 || self.eks_max_attempts == 0 {
            return Err(Error::config_for_field(
                "max_attempts",
                "retry attempts must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Where to reach the DNS registration service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsServiceConfig {
    /// Base URL, e.g. `https://dns.stratus.io`
    pub base_url: String,
    /// Bearer token sent on every request
    pub token: String,
}

impl DnsServiceConfig {
    /// Validate the base URL and token
    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("https://") || self.base_url.starts_with("http://")) {
            return Err(Error::config_for_field(
                "dns_service_url",
                format!("'{}' is not an http(s) URL", self.base_url),
            ));
        }
        if self.token.is_empty() {
            return Err(Error::config_for_field(
                "dns_service_token",
                "token must not be empty",
            ));
        }
        Ok(())
    }
}
