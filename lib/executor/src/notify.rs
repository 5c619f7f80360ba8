//! Completion notifications.

use crate::error::NotifyError;
use async_trait::async_trait;

/// Receives a message after an execution finalizes.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delivers one notification.
    async fn notify(&self, title: &str, message: &str, success: bool) -> Result<(), NotifyError>;
}

/// Writes notifications to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, title: &str, message: &str, success: bool) -> Result<(), NotifyError> {
        if success {
            tracing::info!(title, message, "task notification");
        } else {
            tracing::warn!(title, message, "task notification");
        }
        Ok(())
    }
}
