//! Live Feed Adapters
//!
//! WebSocket plumbing for the order, quote, and notification feeds:
//!
//! - `connection`: one transport, one reader task, events over a channel
//! - `supervisor`: reconnecting owner that feeds a single store writer
//! - `backoff`: reconnect delays and the give-up ceiling
//! - `watchdog`: optional idle detection
//! - `codec`: frame to JSON decoding

pub mod backoff;
pub mod codec;
pub mod connection;
pub mod supervisor;
pub mod watchdog;

pub use backoff::{BackoffConfig, BackoffScheduler, ReconnectDecision};
pub use codec::{CodecError, JsonCodec};
pub use connection::{
    ConnectionConfig, ConnectionError, ConnectionEvent, ConnectionEventKind, StreamConnection,
};
pub use supervisor::{FeedHandler, FeedOutcome, FeedStatus, FeedSupervisor};
pub use watchdog::{ActivityState, IdleWatchdog, WatchdogConfig, WatchdogEvent};
