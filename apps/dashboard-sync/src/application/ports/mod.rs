//! Port Interfaces
//!
//! Contracts between the notification service and the outside world.
//!
//! ## Driven Ports (Outbound)
//!
//! - `AckPort`: tells the notification server a notification was read
//! - `NotificationCachePort`: keeps the notification list across restarts

mod ack_port;
mod notification_cache_port;

pub use ack_port::{AckError, AckPort};
#[cfg(test)]
pub use ack_port::MockAckPort;
pub use notification_cache_port::{CacheError, NoOpNotificationCache, NotificationCachePort};
