//! The convergence loop engine
//!
//! Every reconciler in stratus is an instance of the same loop: observe the
//! remote state, stop if it already matches, otherwise issue one mutating
//! call, classify any failure, sleep one poll interval and observe again.
//!
//! The engine enforces no retry ceiling. A loop without a deadline or a
//! cancellation token runs until it converges or hits a fatal error, so
//! classification completeness is a correctness requirement for callers.
//! Every sleep races the cancellation token and is capped at the deadline.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{Error, Result};

/// Default poll interval between loop iterations
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How a failed query or mutation affects the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Expected to resolve with time; sleep and observe again
    Transient,
    /// The desired state was reached by someone else; observe again
    Conflict,
    /// Abort the loop and propagate the error
    Fatal,
}

/// One observation of the remote state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observed<T, D> {
    /// Desired state reached; carries the converged resource
    Converged(T),
    /// Not there yet; carries what the mutation needs to act on
    Diverged(D),
}

/// Timing and interruption settings for one convergence loop
#[derive(Debug, Clone)]
pub struct ConvergeConfig {
    /// Sleep between iterations that did not converge
    pub poll_interval: Duration,
    /// Optional deadline, measured from the start of the loop
    pub timeout: Option<Duration>,
    /// Optional cancellation token, checked before every observation
    pub cancel: Option<CancellationToken>,
}

impl Default for ConvergeConfig {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl ConvergeConfig {
    /// Loop with the given poll interval, no deadline and no cancellation
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            timeout: None,
            cancel: None,
        }
    }

    /// Replace the poll interval, keeping deadline and cancellation
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Give up with [`Error::Timeout`] once `timeout` has elapsed
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Give up with [`Error::Cancelled`] once `token` is cancelled
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Drive a resource to its desired state.
///
/// `observe` must be side-effect free and must drain any pagination before
/// deciding. When it reports [`Observed::Diverged`], `mutate` receives the
/// divergent observation. Errors from either closure go through `classify`,
/// except [`Error::Invariant`], [`Error::Timeout`] and [`Error::Cancelled`]
/// which always abort.
///
/// Exactly one sleep of `poll_interval` happens per iteration that did not
/// converge, whichever branch it took.
pub async fn converge<T, D, O, OFut, M, MFut, C>(
    config: &ConvergeConfig,
    operation: &str,
    mut observe: O,
    mut mutate: M,
    classify: C,
) -> Result<T>
where
    O: FnMut() -> OFut,
    OFut: Future<Output = Result<Observed<T, D>>>,
    M: FnMut(D) -> MFut,
    MFut: Future<Output = Result<()>>,
    C: Fn(&Error) -> Classification,
{
    // A timeout too large to represent is no deadline at all
    let deadline = config.timeout.and_then(|t| Instant::now().checked_add(t));
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        check_interrupted(config, operation, deadline)?;

        match observe().await {
            Ok(Observed::Converged(value)) => {
                debug!(operation = %operation, attempt, "converged");
                return Ok(value);
            }
            Ok(Observed::Diverged(divergence)) => {
                debug!(operation = %operation, attempt, "not converged, mutating");
                if let Err(e) = mutate(divergence).await {
                    settle(operation, attempt, e, &classify)?;
                }
            }
            Err(e) => settle(operation, attempt, e, &classify)?,
        }

        pause(config, operation, deadline).await?;
    }
}

/// Observe-only variant of [`converge`]: wait until `check` yields a value.
pub async fn poll_until<T, F, Fut, C>(
    config: &ConvergeConfig,
    operation: &str,
    mut check: F,
    classify: C,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
    C: Fn(&Error) -> Classification,
{
    converge(
        config,
        operation,
        move || {
            let fut = check();
            async move {
                Ok(match fut.await? {
                    Some(value) => Observed::Converged(value),
                    None => Observed::Diverged(()),
                })
            }
        },
        |()| std::future::ready(Ok(())),
        classify,
    )
    .await
}

/// Classifier for loops where any API error is worth retrying
pub fn retry_all(_: &Error) -> Classification {
    Classification::Transient
}

/// Classifier for loops where every API error aborts
pub fn fail_all(_: &Error) -> Classification {
    Classification::Fatal
}

fn settle<C>(operation: &str, attempt: u32, e: Error, classify: &C) -> Result<()>
where
    C: Fn(&Error) -> Classification,
{
    let classification = match e {
        Error::Invariant { .. } | Error::Timeout { .. } | Error::Cancelled { .. } => {
            Classification::Fatal
        }
        _ => classify(&e),
    };

    match classification {
        Classification::Transient => {
            info!(operation = %operation, attempt, error = %e, "transient failure, will retry");
            Ok(())
        }
        Classification::Conflict => {
            info!(operation = %operation, attempt, error = %e, "already in desired state, re-checking");
            Ok(())
        }
        Classification::Fatal => {
            error!(operation = %operation, attempt, error = %e, "fatal failure, giving up");
            Err(e)
        }
    }
}

fn check_interrupted(
    config: &ConvergeConfig,
    operation: &str,
    deadline: Option<Instant>,
) -> Result<()> {
    if config.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
        return Err(Error::cancelled(operation));
    }
    if let (Some(deadline), Some(timeout)) = (deadline, config.timeout) {
        if Instant::now() >= deadline {
            return Err(Error::timeout(operation, timeout.as_secs()));
        }
    }
    Ok(())
}

async fn pause(config: &ConvergeConfig, operation: &str, deadline: Option<Instant>) -> Result<()> {
    let wake = match (Instant::now().checked_add(config.poll_interval), deadline) {
        (Some(wake), Some(deadline)) => Some(wake.min(deadline)),
        (wake, None) => wake,
        (None, deadline) => deadline,
    };
    let sleep = match wake {
        Some(wake) => tokio::time::sleep_until(wake),
        None => tokio::time::sleep(config.poll_interval),
    };

    match &config.cancel {
        Some(token) => tokio::select! {
            _ = token.cancelled() => Err(Error::cancelled(operation)),
            _ = sleep => Ok(()),
        },
        None => {
            sleep.await;
            Ok(())
        }
    }
}
