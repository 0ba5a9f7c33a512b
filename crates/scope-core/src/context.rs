//! Execution context handed to every action callable.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::assignation::LogLevel;
use crate::error::ActionError;
use crate::reporter::Reporter;
use crate::state::StateProxy;

/// Per-assignation context.
///
/// Cancellation is cooperative. A cancel request only fires the token; the
/// callable keeps running until [`ActionContext::sleep`],
/// [`ActionContext::checkpoint`], [`ActionContext::progress`] or
/// [`ActionContext::cancelled`] reports it, and the assignation ends
/// CANCELLED once the callable returns [`ActionError::Cancelled`]. Safe-stop
/// code belongs on that path. A callable that never checks runs to its own
/// outcome.
#[derive(Clone)]
pub struct ActionContext {
    pub assignation_id: Uuid,
    pub action: String,
    /// Shared instrument state tree.
    pub state: StateProxy,
    cancellation_token: CancellationToken,
    reporter: Reporter,
}

impl ActionContext {
    pub(crate) fn new(
        assignation_id: Uuid,
        action: impl Into<String>,
        state: StateProxy,
        cancellation_token: CancellationToken,
        reporter: Reporter,
    ) -> Self {
        Self {
            assignation_id,
            action: action.into(),
            state,
            cancellation_token,
            reporter,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        self.cancellation_token.cancelled().await
    }

    /// Yield to the scheduler and fail with [`ActionError::Cancelled`] if a
    /// cancel request is pending.
    pub async fn checkpoint(&self) -> Result<(), ActionError> {
        tokio::task::yield_now().await;
        if self.is_cancelled() {
            return Err(ActionError::Cancelled);
        }
        Ok(())
    }

    /// Sleep for `duration`, waking early with [`ActionError::Cancelled`].
    pub async fn sleep(&self, duration: Duration) -> Result<(), ActionError> {
        tokio::select! {
            biased;
            _ = self.cancellation_token.cancelled() => Err(ActionError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Report progress (clamped to 0–100). Also a cancellation checkpoint.
    pub async fn progress(&self, percent: u8, message: Option<&str>) -> Result<(), ActionError> {
        self.checkpoint().await?;
        self.reporter
            .progress(self.assignation_id, percent, message.map(str::to_string))
            .await;
        Ok(())
    }

    /// Attach a log line to the assignation and broadcast it.
    pub async fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.reporter
            .log(self.assignation_id, level, message.into())
            .await;
    }
}

impl std::fmt::Debug for ActionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionContext")
            .field("assignation_id", &self.assignation_id)
            .field("action", &self.action)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}
