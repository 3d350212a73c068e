//! DNS subzone reconcilers
//!
//! Setting up DNS for an instance bridges two systems: the cloud DNS zone
//! `<instance>.<domain>.` and the registration service that delegates that
//! name to the zone's name servers. Both are eventually consistent.

use std::time::Duration;

use stratus_common::{converge, Classification, ConvergeConfig, Error, Observed, Result};
use tracing::{debug, info, instrument};

use crate::api::{DnsRegistrationApi, DnsZoneApi};

/// Poll interval while waiting for a created zone
pub const CREATE_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Poll interval between delete attempts
pub const DELETE_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Append the root dot if missing
pub fn fqdn(name: &str) -> String {
    if name.ends_with('.') {
        name.to_string()
    } else {
        format!("{}.", name)
    }
}

/// Subzone name for an instance, e.g. `prod.stratus.io.`
pub fn subdomain(instance: &str, dns_name: &str) -> String {
    fqdn(&format!("{}.{}", instance, dns_name.trim_end_matches('.')))
}

/// A zone created concurrently is as good as one we created
pub fn classify_create(e: &Error) -> Classification {
    match e.status_code() {
        Some(409) => Classification::Conflict,
        _ => Classification::Fatal,
    }
}

/// A zone deleted concurrently is as good as one we deleted
pub fn classify_delete(e: &Error) -> Classification {
    match e.status_code() {
        Some(404) => Classification::Conflict,
        _ => Classification::Fatal,
    }
}

/// Register the instance, ensure its subzone exists and delegate to it.
///
/// Returns the subzone name. A zone that exists without NS records is an
/// invariant violation and fails immediately.
#[instrument(skip(registration, zones, config))]
pub async fn ensure_dns_exists(
    registration: &dyn DnsRegistrationApi,
    zones: &dyn DnsZoneApi,
    instance: &str,
    dns_name: &str,
    config: &ConvergeConfig,
) -> Result<String> {
    ensure_registered(registration, instance).await?;

    let zone_name = subdomain(instance, dns_name);
    let name = zone_name.as_str();
    let nameservers = converge(
        config,
        "ensure_dns_exists",
        move || async move {
            let Some(zone) = zones.find_zone(name).await? else {
                return Ok(Observed::Diverged(()));
            };
            match zone.nameservers() {
                Some(ns) => Ok(Observed::Converged(ns.to_vec())),
                None => Err(Error::invariant(
                    "ensure_dns_exists",
                    format!("Could not detect NS records for DNS zone {}", zone.zone.name),
                )),
            }
        },
        move |()| async move {
            info!(zone = %name, "creating DNS zone");
            zones.create_zone(name).await
        },
        classify_create,
    )
    .await?;

    info!(
        zone = %zone_name,
        nameservers = ?nameservers,
        "passing authoritative name servers to DNS registration service"
    );
    registration.set_nameservers(instance, &nameservers).await?;
    Ok(zone_name)
}

async fn ensure_registered(registration: &dyn DnsRegistrationApi, instance: &str) -> Result<()> {
    let entries = registration.list_entries().await?;
    if entries.iter().any(|e| e.clustername == instance) {
        debug!(instance = %instance, "already registered with DNS service");
        return Ok(());
    }

    info!(instance = %instance, "registering with DNS service");
    match registration.create_entry(instance).await {
        Err(e) if e.is_conflict() => {
            info!(instance = %instance, error = %e, "registration already exists");
            Ok(())
        }
        other => other,
    }
}

/// Delete the zone named `zone_name` if it exists
#[instrument(skip(zones, config))]
pub async fn destroy_dns_zone(
    zones: &dyn DnsZoneApi,
    zone_name: &str,
    config: &ConvergeConfig,
) -> Result<()> {
    converge(
        config,
        "destroy_dns_zone",
        move || async move {
            Ok(match zones.find_zone(zone_name).await? {
                Some(zone) => Observed::Diverged(zone.zone.id),
                None => Observed::Converged(()),
            })
        },
        move |id: String| async move {
            info!(zone = %zone_name, id = %id, "deleting DNS zone");
            zones.delete_zone(&id).await
        },
        classify_delete,
    )
    .await
}
