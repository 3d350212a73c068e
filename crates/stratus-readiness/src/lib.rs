//! Readiness reporting for stratus instances
//!
//! [`reporter`] observes rollouts and volume release and reports only on
//! change. [`wait`] blocks callers on the same observations.

#![warn(missing_docs)]

pub mod reporter;
pub mod rollout;
pub mod wait;

pub use reporter::{
    status_message, ChangeDetector, ChangeHandler, ChangeLogger, DestroyingChangeEvent,
    ReadinessReporter, ReporterEvent, RunningChangeEvent, ACTIVE_NAMES_MAX,
};
pub use wait::{
    classify_read, wait_for_controller_deployment, wait_until_destroyed, wait_until_ready,
    WAIT_POLL_INTERVAL,
};
