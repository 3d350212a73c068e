//! Controller upgrade for stratus instances
//!
//! [`upgrade::run_upgrade`] compares the installed controller with this
//! build, hands the cortex workloads to the cortex operator
//! ([`transfer`]), records the new version in the controller config and
//! rolls the controller deployment.

#![warn(missing_docs)]

pub mod build_info;
pub mod controller_config;
pub mod transfer;
pub mod upgrade;
pub mod writer;

pub use build_info::{controller_image, VERSION};
pub use controller_config::{CliMetadata, CliVersion, ControllerConfig};
pub use transfer::{
    operator_preamble, PlannedAction, Selector, TransferAction, TransferPlan, TransferStep,
};
pub use upgrade::{
    requires_upgrade, run_upgrade, upgrade_controller_config_map, upgrade_controller_deployment,
    ConfigOverrides, UpgradeOutcome,
};
pub use writer::{ClusterWriter, KubeClusterWriter, ResourceKind, ResourceRef};
