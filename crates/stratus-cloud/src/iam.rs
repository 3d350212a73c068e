//! IAM role reconcilers

use std::time::Duration;

use stratus_common::{converge, Classification, ConvergeConfig, Error, Observed, Result};
use tracing::{info, instrument};

use crate::api::{IamApi, Role, RoleSpec};

/// Poll interval while waiting for a created role to become visible
pub const CREATE_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Poll interval between delete attempts
pub const DELETE_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Find a role by name, draining ListRoles pagination until found
pub async fn find_role(iam: &dyn IamApi, name: &str) -> Result<Option<Role>> {
    let mut marker = None;
    loop {
        let page = iam.list_roles(marker).await?;
        if let Some(role) = page.items.into_iter().find(|r| r.name == name) {
            return Ok(Some(role));
        }
        match page.next {
            Some(next) => marker = Some(next),
            None => return Ok(None),
        }
    }
}

/// Creating a role that already exists means a concurrent caller won
pub fn classify_create(e: &Error) -> Classification {
    match e.status_code() {
        Some(409) => Classification::Conflict,
        _ => Classification::Fatal,
    }
}

/// Deleting a role with attached policies is retried until they are gone
pub fn classify_delete(e: &Error) -> Classification {
    if e.error_code() == Some("DeleteConflict") {
        return Classification::Transient;
    }
    match e.status_code() {
        Some(404) => Classification::Conflict,
        _ => Classification::Fatal,
    }
}

/// Ensure the role described by `spec` exists and return it
#[instrument(skip(iam, spec, config), fields(role = %spec.name))]
pub async fn ensure_role_exists(
    iam: &dyn IamApi,
    spec: &RoleSpec,
    config: &ConvergeConfig,
) -> Result<Role> {
    converge(
        config,
        "ensure_role_exists",
        move || async move {
            Ok(match find_role(iam, &spec.name).await? {
                Some(role) => Observed::Converged(role),
                None => Observed::Diverged(()),
            })
        },
        move |()| async move {
            info!(role = %spec.name, "creating IAM role");
            match iam.create_role(spec).await? {
                Some(_) => Ok(()),
                None => Err(Error::invariant(
                    "ensure_role_exists",
                    format!("Role creation failed: no role returned for {}", spec.name),
                )),
            }
        },
        classify_create,
    )
    .await
}

/// Ensure no role named `name` exists
#[instrument(skip(iam, config))]
pub async fn ensure_role_does_not_exist(
    iam: &dyn IamApi,
    name: &str,
    config: &ConvergeConfig,
) -> Result<()> {
    converge(
        config,
        "ensure_role_does_not_exist",
        move || async move {
            Ok(match find_role(iam, name).await? {
                Some(role) => Observed::Diverged(role),
                None => Observed::Converged(()),
            })
        },
        move |role: Role| async move {
            info!(role = %role.name, "deleting IAM role");
            iam.delete_role(&role.name).await
        },
        classify_delete,
    )
    .await
}

/// Attach a managed policy to a role
pub async fn attach_policy(iam: &dyn IamApi, role: &str, policy_arn: &str) -> Result<()> {
    info!(role = %role, policy = %policy_arn, "attaching policy");
    iam.attach_policy(role, policy_arn).await
}

/// Detach a managed policy from a role; a missing attachment is success
pub async fn detach_policy(iam: &dyn IamApi, role: &str, policy_arn: &str) -> Result<()> {
    info!(role = %role, policy = %policy_arn, "detaching policy");
    match iam.detach_policy(role, policy_arn).await {
        Err(e) if e.is_not_found() => {
            info!(role = %role, policy = %policy_arn, error = %e, "policy already detached");
            Ok(())
        }
        other => other,
    }
}
