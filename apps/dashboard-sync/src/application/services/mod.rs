//! Application Services
//!
//! Long-lived services that sit between the feeds and the domain stores.

mod notification;

pub use notification::{Delivery, NotificationService};
