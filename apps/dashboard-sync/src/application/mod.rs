//! Application Layer - Services and port definitions.
//!
//! This layer holds the notification service and the port interfaces it
//! uses to reach the notification server and the local cache.

/// Port interfaces for external systems (acks, cache).
pub mod ports;

/// Application services for notification delivery.
pub mod services;
