//! Local persistence layer for Selah
//!
//! A single SQLite database holds annotations, reading logs, the
//! outbound sync queue, and sync bookkeeping. Every mutating store
//! operation commits its entity write and its queue entry in one
//! transaction, so a committed local change can never be missing from
//! the queue.

mod connection;
pub(crate) mod meta;
mod migrations;
pub mod queue;
mod store;

pub use connection::Database;
pub use queue::{ChangeAction, EntityKind, SyncQueueItem, RETRY_CEILING};
pub use store::EventStore;
