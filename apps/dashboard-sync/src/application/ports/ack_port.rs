//! Acknowledgement Port (Driven Port)
//!
//! Delivers read receipts to the notification server. Calls are made at
//! most once per notification and never retried.

use async_trait::async_trait;

/// Acknowledgement delivery error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AckError {
    /// Server answered with a non-success status.
    #[error("ack rejected with status {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// Request never reached the server.
    #[error("ack transport error: {message}")]
    Transport {
        /// Underlying error.
        message: String,
    },
}

/// Port for acknowledging notifications upstream.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AckPort: Send + Sync {
    /// Mark one notification read on the server.
    async fn acknowledge(&self, notification_id: &str) -> Result<(), AckError>;
}
