//! Shared types for stratus: errors, the convergence loop, cluster snapshots

#![warn(missing_docs)]

pub mod cluster_state;
pub mod converge;
pub mod error;
pub mod kube_utils;
pub mod telemetry;

pub use cluster_state::{ClusterReader, ClusterSnapshot, KubeClusterReader};
pub use converge::{converge, poll_until, Classification, ConvergeConfig, Observed};
pub use error::{ApiError, Error};

#[cfg(any(test, feature = "testing"))]
pub use cluster_state::MockClusterReader;

/// Result type alias using stratus's Error type
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Name of the controller deployment
pub const CONTROLLER_NAME: &str = "stratus-controller";

/// Namespace the controller runs in
pub const CONTROLLER_NAMESPACE: &str = "kube-system";

/// ConfigMap holding the controller config
pub const CONTROLLER_CONFIGMAP_NAME: &str = "stratus-controller-config";

/// Key in the controller ConfigMap holding the JSON config
pub const CONTROLLER_CONFIG_KEY: &str = "config.json";

/// Annotation telling a controller to leave a resource alone
pub const IMMUTABLE_ANNOTATION: &str = "stratus.io/immutable";

/// Tag carried by cloud resources that belong to a stratus instance
pub const INSTANCE_TAG: &str = "stratus_cluster_name";
