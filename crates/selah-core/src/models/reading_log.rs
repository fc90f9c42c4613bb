//! Daily reading log model

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One day's reading activity
///
/// Keyed by calendar date: there is at most one entry per day, and the
/// passage set accumulates idempotently (logging the same passage twice
/// does not duplicate it). An entry with zero passages still counts as
/// a read day for streak purposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadingLogEntry {
    /// Calendar date this entry belongs to
    pub date: NaiveDate,
    /// Distinct passage references read that day
    pub passages: BTreeSet<String>,
    /// Optional total reading duration
    pub duration_minutes: Option<u32>,
    /// Optional reading plan this day was logged against
    pub plan_id: Option<String>,
    /// Optional free-text note
    pub note: Option<String>,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
}

impl ReadingLogEntry {
    /// Create an empty entry for the given date
    #[must_use]
    pub fn new(date: NaiveDate) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            date,
            passages: BTreeSet::new(),
            duration_minutes: None,
            plan_id: None,
            note: None,
            created_at: now,
            updated_at: now,
        }
    }
}
