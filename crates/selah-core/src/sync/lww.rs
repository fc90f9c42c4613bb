//! Last-write-wins resolution
//!
//! The single place where two versions of a record are compared. Both
//! the client (applying pulled deltas) and the server (applying pushed
//! batches) call through here, so the conflict policy cannot drift
//! between the two sides.

/// Outcome of comparing a local row against an incoming record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    KeepLocal,
    TakeIncoming,
}

/// Compare modification timestamps (Unix ms); the later write fully
/// replaces the earlier one.
///
/// Ties go to the incoming record: re-applying an already-applied
/// record must be a no-op in effect, which an overwrite with identical
/// data is. No field-level merge is attempted.
#[must_use]
pub const fn resolve(local_updated_at: i64, incoming_updated_at: i64) -> Resolution {
    if incoming_updated_at >= local_updated_at {
        Resolution::TakeIncoming
    } else {
        Resolution::KeepLocal
    }
}
