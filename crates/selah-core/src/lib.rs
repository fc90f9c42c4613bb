//! selah-core - Core library for Selah
//!
//! This crate contains the shared models, the local event store, and the
//! offline-first sync engine used by all Selah clients. Local writes are
//! committed to SQLite together with an outbound change queue entry, and
//! the sync orchestrator drains that queue against the remote API when a
//! connection is available.

pub mod db;
pub mod error;
pub mod models;
pub mod streak;
pub mod sync;

pub use error::{Error, Result};
pub use models::{Annotation, AnnotationId, AnnotationKind, ReadingLogEntry};
pub use streak::StreakState;
