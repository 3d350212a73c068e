//! User-given instance config
//!
//! ```yaml
//! name: prod
//! cloud_provider: aws
//! region: us-west-2
//! dns_name: stratus.example.com
//! custom_dns_name: observe.example.com   # optional
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use stratus_upgrade::ConfigOverrides;

use crate::{Error, Result};

/// Cloud an instance runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudProvider {
    /// Amazon Web Services
    Aws,
    /// Google Cloud
    Gcp,
}

/// Instance config file contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// Instance name; also the DNS label of the subzone
    pub name: String,
    /// Cloud the instance runs on
    pub cloud_provider: CloudProvider,
    /// Primary region
    pub region: String,
    /// Parent DNS zone the instance subzone lives under
    pub dns_name: String,
    /// Settings copied into the controller config on upgrade
    #[serde(flatten)]
    pub overrides: ConfigOverrides,
}

impl InstanceConfig {
    /// Read and validate a config file
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            Error::command_failed(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_yaml::from_str(&data).map_err(|source| Error::Yaml {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject names that cannot become a DNS label
    pub fn validate(&self) -> Result<()> {
        let label_ok = !self.name.is_empty()
            && self.name.len() <= 63
            && self
                .name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            && !self.name.starts_with('-')
            && !self.name.ends_with('-');
        if !label_ok {
            return Err(Error::validation(format!(
                "instance name '{}' must be a lowercase DNS label",
                self.name
            )));
        }
        if self.dns_name.trim_end_matches('.').is_empty() {
            return Err(Error::validation("dns_name must not be empty"));
        }
        if self.region.is_empty() {
            return Err(Error::validation("region must not be empty"));
        }
        Ok(())
    }

    /// Fail unless the instance runs on AWS
    pub fn require_aws(&self) -> Result<()> {
        match self.cloud_provider {
            CloudProvider::Aws => Ok(()),
            other => Err(Error::validation(format!(
                "instance {} runs on {:?}, this command supports AWS only",
                self.name, other
            ))),
        }
    }
}
