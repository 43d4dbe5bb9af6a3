//! Domain Layer - Canonical records and in-memory stores.
//!
//! Pure types with no I/O: the bounded event log, the quote table, the
//! live order board, and the notification center. Each store is written by
//! exactly one owner and read through copies.

/// Bounded, newest-first event log.
pub mod event_log;

/// Feed identity and connection state.
pub mod feed;

/// Notification read-state machine.
pub mod notification;

/// Order records and the live order board.
pub mod order;

/// Quote records and the quote table.
pub mod quote;
