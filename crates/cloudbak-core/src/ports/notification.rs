//! Operator side channels (driven/secondary ports)
//!
//! ## Design Notes
//!
//! - Notifications are fire-and-forget from the caller's perspective: a
//!   delivery error is logged, never propagated into a session outcome.
//! - Confirmation is only requested by interactive flows such as restore.

/// Sends short status messages to the operator (chat webhook, etc.)
#[async_trait::async_trait]
pub trait INotifier: Send + Sync {
    async fn notify(&self, text: &str) -> anyhow::Result<()>;
}

/// Notifier that drops every message
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait::async_trait]
impl INotifier for NoopNotifier {
    async fn notify(&self, _text: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Asks the operator a yes/no question
#[async_trait::async_trait]
pub trait IConfirm: Send + Sync {
    async fn confirm(&self, question: &str) -> anyhow::Result<bool>;
}

/// Confirmation source that always answers yes
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeYes;

#[async_trait::async_trait]
impl IConfirm for AssumeYes {
    async fn confirm(&self, _question: &str) -> anyhow::Result<bool> {
        Ok(true)
    }
}
