//! Role commands - IAM roles and their managed policies

use std::path::PathBuf;

use clap::{Args, Subcommand};
use stratus_cloud::iam::{
    attach_policy, detach_policy, ensure_role_does_not_exist, ensure_role_exists,
    CREATE_POLL_INTERVAL, DELETE_POLL_INTERVAL,
};
use stratus_cloud::RoleSpec;

use super::{AwsArgs, Context};
use crate::{Error, Result};

/// Role subcommands
#[derive(Subcommand, Debug)]
pub enum RoleCommand {
    /// Create the role if missing and attach policies
    Ensure(RoleEnsureArgs),
    /// Detach policies and delete the role
    Delete(RoleDeleteArgs),
}

/// `role ensure` arguments
#[derive(Args, Debug)]
pub struct RoleEnsureArgs {
    /// Role name
    pub name: String,

    /// JSON trust policy document
    #[arg(long)]
    pub assume_role_policy: PathBuf,

    /// Managed policy to attach (repeatable)
    #[arg(long = "policy-arn")]
    pub policy_arns: Vec<String>,

    #[command(flatten)]
    pub aws: AwsArgs,
}

/// `role delete` arguments
#[derive(Args, Debug)]
pub struct RoleDeleteArgs {
    /// Role name
    pub name: String,

    /// Managed policy to detach first (repeatable)
    #[arg(long = "policy-arn")]
    pub policy_arns: Vec<String>,

    #[command(flatten)]
    pub aws: AwsArgs,
}

/// Run a role subcommand
pub async fn run(cmd: RoleCommand, ctx: &Context) -> Result<()> {
    match cmd {
        RoleCommand::Ensure(args) => ensure(args, ctx).await,
        RoleCommand::Delete(args) => delete(args, ctx).await,
    }
}

/// Read a trust policy and check it is a JSON object
pub fn load_policy_document(path: &std::path::Path) -> Result<String> {
    let document = std::fs::read_to_string(path).map_err(|e| {
        Error::command_failed(format!("failed to read {}: {}", path.display(), e))
    })?;
    match serde_json::from_str::<serde_json::Value>(&document) {
        Ok(v) if v.is_object() => Ok(document),
        Ok(_) => Err(Error::validation(format!(
            "{} is not a JSON policy object",
            path.display()
        ))),
        Err(e) => Err(Error::validation(format!(
            "{} is not valid JSON: {}",
            path.display(),
            e
        ))),
    }
}

async fn ensure(args: RoleEnsureArgs, ctx: &Context) -> Result<()> {
    let spec = RoleSpec {
        name: args.name,
        assume_role_policy_document: load_policy_document(&args.assume_role_policy)?,
    };
    let iam = args.aws.clients().await?.iam();

    let role = ensure_role_exists(&iam, &spec, &ctx.converge(CREATE_POLL_INTERVAL)).await?;
    for arn in &args.policy_arns {
        attach_policy(&iam, &role.name, arn).await?;
    }
    println!("{}", role.arn);
    Ok(())
}

async fn delete(args: RoleDeleteArgs, ctx: &Context) -> Result<()> {
    let iam = args.aws.clients().await?.iam();
    for arn in &args.policy_arns {
        detach_policy(&iam, &args.name, arn).await?;
    }
    ensure_role_does_not_exist(&iam, &args.name, &ctx.converge(DELETE_POLL_INTERVAL)).await?;
    Ok(())
}
