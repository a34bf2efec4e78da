//! Wait-until-settled loop shared by every resource kind.
//!
//! The first fetch happens immediately and exactly one sleep separates two
//! fetches. The loop ends as soon as a fetch reports a status outside the
//! pending set. Failure states end the loop too; deciding what a failure
//! means is up to the caller.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use modelops_core::{PollEvent, ResourceStatus};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SdkError;

/// Latest status reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub status: ResourceStatus,
    pub message: Option<String>,
}

impl StatusReport {
    pub fn new(status: ResourceStatus) -> Self {
        Self {
            status,
            message: None,
        }
    }

    pub fn with_message(mut self, message: Option<String>) -> Self {
        self.message = message;
        self
    }
}

/// Something whose status can be fetched from the server.
///
/// Each call to [`fetch_status`](StatusSource::fetch_status) is one request
/// and may update the implementor's cached state.
#[async_trait]
pub trait StatusSource: Send {
    /// Human-readable name used in logs and errors.
    fn target(&self) -> String;

    /// Fetch the current status.
    async fn fetch_status(&mut self) -> Result<StatusReport, SdkError>;
}

/// Callback invoked once per pending observation.
pub type ProgressCallback = Arc<dyn Fn(&PollEvent) + Send + Sync>;

/// Fixed-interval poller.
///
/// No backoff and no jitter. Waiting is unbounded unless a maximum wait or a
/// cancellation token is supplied.
#[derive(Clone)]
pub struct StatusPoller {
    interval: Duration,
    max_wait: Option<Duration>,
    cancel: Option<CancellationToken>,
    on_tick: Option<ProgressCallback>,
}

impl StatusPoller {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            max_wait: None,
            cancel: None,
            on_tick: None,
        }
    }

    /// Give up with [`SdkError::WaitTimeout`] once this much time has passed.
    pub fn with_max_wait(mut self, max_wait: Option<Duration>) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Stop with [`SdkError::WaitCancelled`] when the token is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Report every pending observation to `f`.
    pub fn with_progress<F>(mut self, f: F) -> Self
    where
        F: Fn(&PollEvent) + Send + Sync + 'static,
    {
        self.on_tick = Some(Arc::new(f));
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_wait(&self) -> Option<Duration> {
        self.max_wait
    }

    /// Poll `source` until it reports a non-pending status.
    pub async fn wait<S>(&self, source: &mut S) -> Result<StatusReport, SdkError>
    where
        S: StatusSource + ?Sized,
    {
        let target = source.target();
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            if self.is_cancelled() {
                return Err(SdkError::WaitCancelled { target });
            }

            attempt += 1;
            let report = source.fetch_status().await?;
            let elapsed = started.elapsed();

            if !report.status.is_pending() {
                debug!(
                    resource = %target,
                    attempt,
                    status = %report.status,
                    elapsed_secs = elapsed.as_secs(),
                    "Wait finished"
                );
                return Ok(report);
            }

            let delay = match self.max_wait {
                Some(max_wait) if elapsed >= max_wait => {
                    warn!(
                        resource = %target,
                        status = %report.status,
                        waited_secs = elapsed.as_secs(),
                        "Giving up waiting"
                    );
                    return Err(SdkError::WaitTimeout {
                        target,
                        waited: elapsed,
                    });
                }
                Some(max_wait) => self.interval.min(max_wait - elapsed),
                None => self.interval,
            };

            let event = PollEvent::new(target.clone(), attempt, report.status, elapsed, delay)
                .with_message(report.message);
            info!(
                resource = %event.target,
                attempt = event.attempt,
                status = %event.status,
                elapsed_secs = event.elapsed.as_secs(),
                next_poll_secs = event.next_poll_in.as_secs(),
                "Waiting"
            );
            if let Some(on_tick) = &self.on_tick {
                on_tick(&event);
            }

            self.sleep(delay, &target).await?;
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }

    async fn sleep(&self, delay: Duration, target: &str) -> Result<(), SdkError> {
        let Some(token) = &self.cancel else {
            tokio::time::sleep(delay).await;
            return Ok(());
        };

        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = token.cancelled() => {
                info!(resource = %target, "Wait cancelled");
                Err(SdkError::WaitCancelled {
                    target: target.to_string(),
                })
            }
        }
    }
}

impl fmt::Debug for StatusPoller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusPoller")
            .field("interval", &self.interval)
            .field("max_wait", &self.max_wait)
            .field("cancellable", &self.cancel.is_some())
            .field("progress", &self.on_tick.is_some())
            .finish()
    }
}
