//! Offline outbox for outbound telemetry
//!
//! This module keeps telemetry from being silently dropped while offline:
//! - Direct send with fallback to a durable (or ephemeral) store
//! - Atomic drain-and-clear per store tier
//! - Background flushing on timer, reconnect and request
//! - Rate-limited sharing of the device position

mod queue;
mod sharer;
mod store;
mod worker;

#[cfg(test)]
mod tests;

pub use queue::{
    Delivery, FlushReport, FlushTrigger, OutboxQueue, OutboxStats, TelemetrySender,
};
pub use sharer::{LocationSharer, DEFAULT_SHARE_INTERVAL};
pub use store::{open_store, FileStore, MemoryStore, OutboxRecord, OutboxStore, StoreTier};
pub use worker::{OutboxHandle, OutboxWorker, DEFAULT_FLUSH_INTERVAL};
