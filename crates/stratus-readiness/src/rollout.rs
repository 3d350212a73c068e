//! Rollout diagnostics per resource kind
//!
//! Each function returns `None` when the resource has finished rolling out,
//! otherwise a one-line diagnostic prefixed with `namespace/name`. The checks
//! mirror `kubectl rollout status`.

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;

fn qualified_name(meta: &ObjectMeta) -> String {
    format!(
        "{}/{}",
        meta.namespace.as_deref().unwrap_or("default"),
        meta.name.as_deref().unwrap_or("<unnamed>")
    )
}

fn generation_pending(meta: &ObjectMeta, observed: Option<i64>) -> bool {
    meta.generation.unwrap_or(0) > observed.unwrap_or(0)
}

/// Deployment rollout diagnostic
pub fn deployment(d: &Deployment) -> Option<String> {
    let name = qualified_name(&d.metadata);
    let Some(status) = &d.status else {
        return Some(format!("{}: waiting for deployment status", name));
    };
    if generation_pending(&d.metadata, status.observed_generation) {
        return Some(format!(
            "{}: waiting for deployment spec update to be observed",
            name
        ));
    }

    let progress_deadline_exceeded = status.conditions.iter().flatten().any(|c| {
        c.type_ == "Progressing" && c.reason.as_deref() == Some("ProgressDeadlineExceeded")
    });
    if progress_deadline_exceeded {
        return Some(format!("{}: deployment exceeded its progress deadline", name));
    }

    let desired = d.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let replicas = status.replicas.unwrap_or(0);
    let updated = status.updated_replicas.unwrap_or(0);
    let available = status.available_replicas.unwrap_or(0);

    if updated < desired {
        return Some(format!(
            "{}: {} out of {} new replicas have been updated",
            name, updated, desired
        ));
    }
    if replicas > updated {
        return Some(format!(
            "{}: {} old replicas are pending termination",
            name,
            replicas - updated
        ));
    }
    if available < updated {
        return Some(format!(
            "{}: {} of {} updated replicas are available",
            name, available, updated
        ));
    }
    None
}

/// DaemonSet rollout diagnostic
pub fn daemon_set(ds: &DaemonSet) -> Option<String> {
    let name = qualified_name(&ds.metadata);
    let Some(status) = &ds.status else {
        return Some(format!("{}: waiting for daemon set status", name));
    };
    if generation_pending(&ds.metadata, status.observed_generation) {
        return Some(format!(
            "{}: waiting for daemon set spec update to be observed",
            name
        ));
    }

    let desired = status.desired_number_scheduled;
    let updated = status.updated_number_scheduled.unwrap_or(0);
    let available = status.number_available.unwrap_or(0);

    if updated < desired {
        return Some(format!(
            "{}: {} out of {} new pods have been updated",
            name, updated, desired
        ));
    }
    if available < desired {
        return Some(format!(
            "{}: {} of {} updated pods are available",
            name, available, desired
        ));
    }
    None
}

/// StatefulSet rollout diagnostic
pub fn stateful_set(sts: &StatefulSet) -> Option<String> {
    let name = qualified_name(&sts.metadata);
    let Some(status) = &sts.status else {
        return Some(format!("{}: waiting for stateful set status", name));
    };
    if generation_pending(&sts.metadata, status.observed_generation) {
        return Some(format!(
            "{}: waiting for stateful set spec update to be observed",
            name
        ));
    }

    let spec = sts.spec.as_ref();
    let strategy = spec.and_then(|s| s.update_strategy.as_ref());
    // OnDelete sets never roll on their own
    if strategy.and_then(|s| s.type_.as_deref()) == Some("OnDelete") {
        return None;
    }

    let desired = spec.and_then(|s| s.replicas).unwrap_or(1);
    let ready = status.ready_replicas.unwrap_or(0);
    if ready < desired {
        return Some(format!("{}: {} of {} pods are ready", name, ready, desired));
    }

    let partition = strategy
        .and_then(|s| s.rolling_update.as_ref())
        .and_then(|r| r.partition)
        .unwrap_or(0);
    if partition > 0 {
        let updated = status.updated_replicas.unwrap_or(0);
        let target = desired - partition;
        if updated < target {
            return Some(format!(
                "{}: partitioned roll out: {} out of {} new pods have been updated",
                name, updated, target
            ));
        }
        return None;
    }

    if status.update_revision != status.current_revision {
        return Some(format!(
            "{}: waiting for rolling update to complete {} pods at revision {}",
            name,
            status.updated_replicas.unwrap_or(0),
            status.update_revision.as_deref().unwrap_or("<unknown>")
        ));
    }
    None
}

/// Certificate diagnostic: active until the `Ready` condition is `True`
pub fn certificate(cert: &DynamicObject) -> Option<String> {
    let name = qualified_name(&cert.metadata);
    let ready = cert
        .data
        .pointer("/status/conditions")
        .and_then(|c| c.as_array())
        .and_then(|conditions| {
            conditions
                .iter()
                .find(|c| c.get("type").and_then(|t| t.as_str()) == Some("Ready"))
        });

    match ready {
        Some(c) if c.get("status").and_then(|s| s.as_str()) == Some("True") => None,
        Some(c) => Some(format!(
            "{}: certificate not ready: {}",
            name,
            c.get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("no message")
        )),
        None => Some(format!("{}: certificate has no Ready condition yet", name)),
    }
}
