//! Waiting on long-running operations.

use crate::client::{OperationHandle, VeoClient};
use crate::error::VeoError;
use crate::types::{FailureKind, OperationState};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

/// How often to poll and how long to keep trying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    /// Fixed delay between polls.
    pub interval: Duration,
    /// Total time budget before giving up with `VeoError::Timeout`.
    pub max_wait: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_wait: Duration::from_secs(300),
        }
    }
}

/// A snapshot handed to a [`PollObserver`] after every poll.
#[derive(Debug, Clone)]
pub struct PollProgress<'a> {
    pub operation: &'a OperationHandle,
    pub attempt: u32,
    pub elapsed: Duration,
    pub done: bool,
}

/// Receives progress while an operation is polled. Purely presentational:
/// nothing an observer does can change the outcome of the poll loop.
pub trait PollObserver: Send + Sync {
    fn on_poll(&self, _progress: &PollProgress<'_>) {}

    fn on_complete(&self, _succeeded: bool) {}
}

/// An observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl PollObserver for NoProgress {}

impl VeoClient {
    /// Polls an operation until it produces a video locator.
    ///
    /// # Returns
    ///
    /// The URI of the generated video.
    ///
    /// # Errors
    ///
    /// - `VeoError::SafetyFiltered` when the service withheld the video.
    /// - `VeoError::OperationFailed` when the service reported an error.
    /// - `VeoError::Protocol` when a finished operation carries no result.
    /// - `VeoError::Timeout` once `options.max_wait` has elapsed.
    /// - `VeoError::Cancelled` if `cancel` fires while polling or sleeping.
    pub async fn wait_for_operation(
        &self,
        handle: &OperationHandle,
        options: &PollOptions,
        cancel: &CancellationToken,
        observer: &dyn PollObserver,
    ) -> Result<String, VeoError> {
        let started = Instant::now();
        let request_timeout = options.interval + Duration::from_secs(5);
        let mut attempt = 0;

        let result = loop {
            let elapsed = started.elapsed();
            if elapsed > options.max_wait {
                break Err(VeoError::Timeout {
                    waited: options.max_wait,
                    operation: handle.to_string(),
                });
            }

            attempt += 1;
            let operation = tokio::select! {
                _ = cancel.cancelled() => break Err(VeoError::Cancelled),
                operation = self.get_operation(handle, request_timeout) => operation,
            };
            let operation = match operation {
                Ok(operation) => operation,
                Err(err) => break Err(err),
            };

            observer.on_poll(&PollProgress {
                operation: handle,
                attempt,
                elapsed: started.elapsed(),
                done: operation.done,
            });
            tracing::debug!(
                operation = %handle,
                attempt,
                elapsed_secs = started.elapsed().as_secs(),
                done = operation.done,
                "polled operation"
            );

            match operation.state() {
                OperationState::Running => {
                    tokio::select! {
                        _ = cancel.cancelled() => break Err(VeoError::Cancelled),
                        _ = sleep(options.interval) => {}
                    }
                }
                OperationState::Succeeded { video_uri } => break Ok(video_uri),
                OperationState::Filtered { reasons, count } => {
                    tracing::warn!(operation = %handle, ?reasons, count, "blocked by safety filters");
                    break Err(VeoError::SafetyFiltered { reasons, count });
                }
                OperationState::Failed {
                    kind: FailureKind::Remote,
                    message,
                } => break Err(VeoError::OperationFailed(message)),
                OperationState::Failed {
                    kind: FailureKind::MissingResult,
                    message,
                } => break Err(VeoError::Protocol(message)),
            }
        };

        observer.on_complete(result.is_ok());
        match &result {
            Ok(_) => tracing::info!(operation = %handle, attempts = attempt, "operation completed"),
            Err(err) => tracing::warn!(operation = %handle, error = %err, "operation did not complete"),
        }
        result
    }
}
