//! Configuration Module
//!
//! Environment-driven settings for feeds, polling, notification delivery
//! and the local snapshot server.

mod settings;

pub use settings::{
    ConfigError, FeedSettings, NotificationSettings, PollSettings, ServiceUrls, SyncConfig,
};
