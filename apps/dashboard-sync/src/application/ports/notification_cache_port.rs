//! Notification Cache Port (Driven Port)
//!
//! Local persistence of the notification list so read state survives a
//! restart. The whole list is rewritten on every change; it is bounded and
//! small.

use crate::domain::notification::Notification;

/// Cache error.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// File could not be read or written.
    #[error("notification cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File contents are not a notification list.
    #[error("notification cache is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Port for persisting the notification list.
pub trait NotificationCachePort: Send + Sync {
    /// Load the stored list. A missing cache is an empty list.
    ///
    /// # Errors
    ///
    /// Returns `CacheError` if the cache exists but cannot be read.
    fn load(&self) -> Result<Vec<Notification>, CacheError>;

    /// Replace the stored list.
    ///
    /// # Errors
    ///
    /// Returns `CacheError` if the cache cannot be written.
    fn store(&self, notifications: &[Notification]) -> Result<(), CacheError>;
}

/// Cache that keeps nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpNotificationCache;

impl NotificationCachePort for NoOpNotificationCache {
    fn load(&self) -> Result<Vec<Notification>, CacheError> {
        Ok(Vec::new())
    }

    fn store(&self, _notifications: &[Notification]) -> Result<(), CacheError> {
        Ok(())
    }
}
