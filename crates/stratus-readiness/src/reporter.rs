//! Edge-triggered readiness reporting
//!
//! The reporter turns each [`ClusterSnapshot`] into a change event and hands
//! it to a [`ChangeHandler`] only when the per-kind counts differ from the
//! previous event. [`ChangeLogger`] then logs only the kinds whose count
//! moved, so an idle cluster produces no log lines at all.

use std::time::Duration;

use stratus_common::{ClusterReader, ClusterSnapshot, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::rollout;

/// Up to this many remaining items, log messages list them
pub const ACTIVE_NAMES_MAX: usize = 5;

/// Resources still rolling out while the instance is running
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunningChangeEvent {
    /// Diagnostics of Deployments not yet rolled out
    pub active_deployments: Vec<String>,
    /// Diagnostics of DaemonSets not yet rolled out
    pub active_daemon_sets: Vec<String>,
    /// Diagnostics of StatefulSets not yet rolled out
    pub active_stateful_sets: Vec<String>,
    /// Diagnostics of Certificates not yet ready
    pub active_certificates: Vec<String>,
}

impl RunningChangeEvent {
    /// Build the event from a snapshot
    pub fn from_snapshot(snapshot: &ClusterSnapshot) -> Self {
        Self {
            active_deployments: snapshot
                .deployments
                .iter()
                .filter_map(rollout::deployment)
                .collect(),
            active_daemon_sets: snapshot
                .daemon_sets
                .iter()
                .filter_map(rollout::daemon_set)
                .collect(),
            active_stateful_sets: snapshot
                .stateful_sets
                .iter()
                .filter_map(rollout::stateful_set)
                .collect(),
            active_certificates: snapshot
                .certificates
                .iter()
                .filter_map(rollout::certificate)
                .collect(),
        }
    }

    /// Nothing is rolling out
    pub fn is_ready(&self) -> bool {
        self.active_deployments.is_empty()
            && self.active_daemon_sets.is_empty()
            && self.active_stateful_sets.is_empty()
            && self.active_certificates.is_empty()
    }

    fn counts(&self) -> [usize; 4] {
        [
            self.active_deployments.len(),
            self.active_daemon_sets.len(),
            self.active_stateful_sets.len(),
            self.active_certificates.len(),
        ]
    }
}

/// PersistentVolumes still present while the instance is being destroyed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DestroyingChangeEvent {
    /// Names of remaining PersistentVolumes
    pub remaining_persistent_volumes: Vec<String>,
}

impl DestroyingChangeEvent {
    /// Build the event from a snapshot
    pub fn from_snapshot(snapshot: &ClusterSnapshot) -> Self {
        Self {
            remaining_persistent_volumes: snapshot
                .persistent_volumes
                .iter()
                .filter_map(|pv| pv.metadata.name.clone())
                .collect(),
        }
    }

    /// All volumes are gone
    pub fn is_complete(&self) -> bool {
        self.remaining_persistent_volumes.is_empty()
    }
}

/// A change event in either mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReporterEvent {
    /// Instance running; tracks rollouts
    Running(RunningChangeEvent),
    /// Instance being destroyed; tracks volume release
    Destroying(DestroyingChangeEvent),
}

/// Receives change events from the reporter
pub trait ChangeHandler: Send {
    /// Called when rollout counts changed
    fn on_running_change(&mut self, event: &RunningChangeEvent);
    /// Called when the remaining volume count changed
    fn on_destroying_change(&mut self, event: &DestroyingChangeEvent);
}

/// Forwards events to a channel; a closed receiver drops them
impl ChangeHandler for mpsc::UnboundedSender<ReporterEvent> {
    fn on_running_change(&mut self, event: &RunningChangeEvent) {
        if self.send(ReporterEvent::Running(event.clone())).is_err() {
            debug!("reporter event receiver dropped, discarding running change");
        }
    }

    fn on_destroying_change(&mut self, event: &DestroyingChangeEvent) {
        if self.send(ReporterEvent::Destroying(event.clone())).is_err() {
            debug!("reporter event receiver dropped, discarding destroying change");
        }
    }
}

/// `Waiting for N active {kind}s`, listing the items when only a few remain
pub fn status_message(kind: &str, active: &[String]) -> String {
    if !active.is_empty() && active.len() <= ACTIVE_NAMES_MAX {
        format!(
            "Waiting for {} active {}s:\n- {}",
            active.len(),
            kind,
            active.join("\n- ")
        )
    } else {
        format!("Waiting for {} active {}s", active.len(), kind)
    }
}

/// Logs per kind, only when that kind's count changed since the last event
#[derive(Debug, Default)]
pub struct ChangeLogger {
    deployments: Option<usize>,
    daemon_sets: Option<usize>,
    stateful_sets: Option<usize>,
    certificates: Option<usize>,
    persistent_volumes: Option<usize>,
}

impl ChangeLogger {
    /// A logger that has observed nothing yet
    pub fn new() -> Self {
        Self::default()
    }

    fn log_if_changed(last: &mut Option<usize>, kind: &str, active: &[String]) {
        if *last != Some(active.len()) {
            info!("{}", status_message(kind, active));
            *last = Some(active.len());
        }
    }
}

impl ChangeHandler for ChangeLogger {
    fn on_running_change(&mut self, event: &RunningChangeEvent) {
        Self::log_if_changed(&mut self.deployments, "Deployment", &event.active_deployments);
        Self::log_if_changed(&mut self.daemon_sets, "DaemonSet", &event.active_daemon_sets);
        Self::log_if_changed(
            &mut self.stateful_sets,
            "StatefulSet",
            &event.active_stateful_sets,
        );
        Self::log_if_changed(
            &mut self.certificates,
            "Certificate",
            &event.active_certificates,
        );
    }

    fn on_destroying_change(&mut self, event: &DestroyingChangeEvent) {
        let remaining = event.remaining_persistent_volumes.len();
        if self.persistent_volumes != Some(remaining) {
            info!("Waiting for {} PersistentVolumes to be released", remaining);
            self.persistent_volumes = Some(remaining);
        }
    }
}

/// Compares successive snapshots and forwards only changes
#[derive(Debug, Default)]
pub struct ChangeDetector {
    running: Option<[usize; 4]>,
    destroying: Option<usize>,
}

impl ChangeDetector {
    /// A detector that has seen nothing; the first event always fires
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one running-mode event; returns whether the handler fired
    pub fn running<H: ChangeHandler + ?Sized>(
        &mut self,
        event: &RunningChangeEvent,
        handler: &mut H,
    ) -> bool {
        let counts = event.counts();
        if self.running == Some(counts) {
            return false;
        }
        self.running = Some(counts);
        handler.on_running_change(event);
        true
    }

    /// Feed one destroying-mode event; returns whether the handler fired
    pub fn destroying<H: ChangeHandler + ?Sized>(
        &mut self,
        event: &DestroyingChangeEvent,
        handler: &mut H,
    ) -> bool {
        let count = event.remaining_persistent_volumes.len();
        if self.destroying == Some(count) {
            return false;
        }
        self.destroying = Some(count);
        handler.on_destroying_change(event);
        true
    }
}

/// Continuously observes the cluster and reports changes
pub struct ReadinessReporter<'a> {
    reader: &'a dyn ClusterReader,
    poll_interval: Duration,
}

impl<'a> ReadinessReporter<'a> {
    /// Reporter polling `reader` every `poll_interval`
    pub fn new(reader: &'a dyn ClusterReader, poll_interval: Duration) -> Self {
        Self {
            reader,
            poll_interval,
        }
    }

    /// One observation; returns the event and whether the handler fired
    pub async fn tick<H: ChangeHandler + ?Sized>(
        &self,
        detector: &mut ChangeDetector,
        handler: &mut H,
        destroying: bool,
    ) -> Result<(ReporterEvent, bool)> {
        let snapshot = self.reader.snapshot().await?;
        if destroying {
            let event = DestroyingChangeEvent::from_snapshot(&snapshot);
            let fired = detector.destroying(&event, handler);
            Ok((ReporterEvent::Destroying(event), fired))
        } else {
            let event = RunningChangeEvent::from_snapshot(&snapshot);
            let fired = detector.running(&event, handler);
            Ok((ReporterEvent::Running(event), fired))
        }
    }

    /// Report until `cancel` fires.
    ///
    /// `should_destroy` is consulted every cycle and switches the reporter
    /// into destroying mode. Snapshot failures are logged and retried.
    pub async fn run<H, F>(&self, handler: &mut H, should_destroy: F, cancel: CancellationToken)
    where
        H: ChangeHandler + ?Sized,
        F: Fn() -> bool,
    {
        let mut detector = ChangeDetector::new();
        loop {
            if cancel.is_cancelled() {
                debug!("readiness reporter stopped");
                return;
            }
            if let Err(e) = self.tick(&mut detector, handler, should_destroy()).await {
                warn!(error = %e, "failed to read cluster state, will retry");
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("readiness reporter stopped");
                    return;
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}
