//! Offline-first synchronization engine
//!
//! Wire protocol types, the transport that executes queued changes
//! against the remote API, the last-write-wins resolver shared with the
//! server, and the orchestrator that drives push-then-pull cycles.

pub mod lww;
pub mod orchestrator;
pub mod protocol;
pub mod transport;

pub use lww::{resolve, Resolution};
pub use orchestrator::{SyncOrchestrator, SyncPhase, SyncReport, SyncStatus, SyncSummary};
pub use protocol::{
    AnnotationRecord, PullResponse, PushRequest, PushResponse, ReadingLogRecord, SyncedCounts,
};
pub use transport::{HttpSyncTransport, SendOutcome, SyncTransport, TransportError};
