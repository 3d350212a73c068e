//! CLI commands

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use kube::Client;
use stratus_cloud::{AwsClients, CloudConfig, DnsServiceConfig};
use stratus_common::kube_utils::create_client;
use stratus_common::ConvergeConfig;
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

pub mod dns;
pub mod list;
pub mod role;
pub mod status;
pub mod upgrade;

/// State shared by every command
#[derive(Debug, Clone)]
pub struct Context {
    /// Explicit kubeconfig; inferred when unset
    pub kubeconfig: Option<PathBuf>,
    /// Deadline for the whole command
    pub timeout: Duration,
    /// Fired on Ctrl-C
    pub cancel: CancellationToken,
}

impl Context {
    /// Convergence settings bounded by the command deadline and Ctrl-C
    pub fn converge(&self, poll_interval: Duration) -> ConvergeConfig {
        ConvergeConfig::new(poll_interval)
            .with_timeout(self.timeout)
            .with_cancel(self.cancel.clone())
    }

    /// Client for the instance's cluster
    pub async fn kube_client(&self) -> Result<Client> {
        Ok(create_client(self.kubeconfig.as_deref()).await?)
    }
}

/// AWS connection options
#[derive(Args, Debug, Clone)]
pub struct AwsArgs {
    /// AWS region for regional calls
    #[arg(long, env = "AWS_REGION", default_value = "us-west-2")]
    pub region: String,

    /// Send AWS calls to this endpoint instead (e.g. LocalStack)
    #[arg(long, env = "STRATUS_AWS_ENDPOINT_URL")]
    pub aws_endpoint_url: Option<String>,
}

impl AwsArgs {
    /// Validated cloud config
    pub fn cloud_config(&self) -> Result<CloudConfig> {
        let mut config = CloudConfig::new(self.region.clone());
        if let Some(url) = &self.aws_endpoint_url {
            config = config.with_endpoint_url(url.clone());
        }
        config.validate()?;
        Ok(config)
    }

    /// SDK clients for the configured region
    pub async fn clients(&self) -> Result<AwsClients> {
        Ok(AwsClients::new(&self.cloud_config()?).await?)
    }
}

/// DNS registration service options
#[derive(Args, Debug, Clone)]
pub struct DnsServiceArgs {
    /// Base URL of the DNS registration service
    #[arg(long, env = "STRATUS_DNS_SERVICE_URL")]
    pub dns_service_url: String,

    /// Bearer token for the DNS registration service
    #[arg(long, env = "STRATUS_DNS_SERVICE_TOKEN", hide_env_values = true)]
    pub dns_service_token: String,
}

impl DnsServiceArgs {
    /// Service config
    pub fn config(&self) -> DnsServiceConfig {
        DnsServiceConfig {
            base_url: self.dns_service_url.clone(),
            token: self.dns_service_token.clone(),
        }
    }
}

/// Parse a duration such as `1h`, `30m`, `600s` or plain seconds
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let invalid = || {
        Error::validation(format!(
            "invalid duration '{}', expected e.g. 1h, 30m, 600s",
            s
        ))
    };
    let (digits, unit) = match s.char_indices().last() {
        Some((i, 'h')) => (&s[..i], 3600),
        Some((i, 'm')) => (&s[..i], 60),
        Some((i, 's')) => (&s[..i], 1),
        _ => (s, 1),
    };
    let n: u64 = digits.parse().map_err(|_| invalid())?;
    if n == 0 {
        return Err(invalid());
    }
    let secs = n.checked_mul(unit).ok_or_else(invalid)?;
    Ok(Duration::from_secs(secs))
}
