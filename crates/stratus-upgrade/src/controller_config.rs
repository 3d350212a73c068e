//! Controller config stored in the controller ConfigMap
//!
//! Older controllers wrote configs without `cliMetadata`; those read as an
//! empty version history. Fields this build does not know about are kept
//! and written back untouched.

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::ConfigMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use stratus_common::{Error, Result, CONTROLLER_CONFIG_KEY};

/// Timestamp format of version history entries
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// One CLI version that installed or upgraded the instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliVersion {
    /// Build version
    pub version: String,
    /// UTC time, `YYYY-MM-DDTHH:MM:SSZ`
    pub timestamp: String,
}

/// Version history
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliMetadata {
    /// Every CLI version applied to this instance, oldest first
    #[serde(rename = "allCLIVersions", default)]
    pub all_cli_versions: Vec<CliVersion>,
}

/// The controller config, latest schema
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Version history; absent in configs written by old controllers
    #[serde(rename = "cliMetadata", default)]
    pub cli_metadata: CliMetadata,
    /// DNS name override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_dns_name: Option<String>,
    /// Auth0 client id override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_auth0_client_id: Option<String>,
    /// Auth0 domain override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_auth0_domain: Option<String>,
    /// Everything else, preserved as-is
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ControllerConfig {
    /// Parse and migrate a stored config
    pub fn parse(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json).map_err(|e| {
            Error::invariant(
                "controller_config",
                format!("invalid controller config map: {}", e),
            )
        })?;
        if !value.is_object() {
            return Err(Error::invariant(
                "controller_config",
                "invalid controller config map: not a JSON object",
            ));
        }
        serde_json::from_value(value).map_err(|e| {
            Error::invariant(
                "controller_config",
                format!("failed to migrate controller config: {}", e),
            )
        })
    }

    /// Read the config out of the controller ConfigMap
    pub fn from_config_map(cm: &ConfigMap) -> Result<Self> {
        let json = cm
            .data
            .as_ref()
            .and_then(|d| d.get(CONTROLLER_CONFIG_KEY))
            .ok_or_else(|| {
                Error::invariant(
                    "controller_config",
                    format!("controller config map has no {} key", CONTROLLER_CONFIG_KEY),
                )
            })?;
        Self::parse(json)
    }

    /// Serialize for storage
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Most recently recorded CLI version
    pub fn last_cli_version(&self) -> Option<&str> {
        self.cli_metadata
            .all_cli_versions
            .last()
            .map(|v| v.version.as_str())
    }

    /// Append `version` to the history
    pub fn record_version(&mut self, version: &str, at: DateTime<Utc>) {
        self.cli_metadata.all_cli_versions.push(CliVersion {
            version: version.to_string(),
            timestamp: at.format(TIMESTAMP_FORMAT).to_string(),
        });
    }
}
