//! Reading streak and progress derivation
//!
//! Pure functions over the set of logged reading dates. The cached
//! longest streak is fed back in so it can only grow; everything else is
//! recomputed from scratch on every call and must never be stored as an
//! independent source of truth.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

/// Derived reading progress, reproducible from the log dates alone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakState {
    /// Consecutive days read, counting back from today (or yesterday,
    /// while today's grace period is still open)
    pub current_streak: u32,
    /// Longest streak ever observed; monotonically non-decreasing
    pub longest_streak: u32,
    /// Most recent date with a log entry
    pub last_read_date: Option<NaiveDate>,
    /// Count of distinct dates with an entry
    pub total_days_read: u32,
}

/// Compute the streak state from logged dates.
///
/// `dates_desc` must be distinct calendar dates sorted descending
/// (newest first); `prior_longest` is the previously recorded longest
/// streak, which the result never shrinks below.
///
/// A day with no entry does not break the streak until it is over: if
/// today has no entry but yesterday does, the streak is still alive and
/// counted from yesterday. Only a full missed day resets it to zero.
#[must_use]
pub fn compute_streak(
    dates_desc: &[NaiveDate],
    today: NaiveDate,
    prior_longest: u32,
) -> StreakState {
    let last_read_date = dates_desc.first().copied();
    let total_days_read = u32::try_from(dates_desc.len()).unwrap_or(u32::MAX);

    let current_streak = current_streak(dates_desc, today);

    StreakState {
        current_streak,
        longest_streak: current_streak.max(prior_longest),
        last_read_date,
        total_days_read,
    }
}

fn current_streak(dates_desc: &[NaiveDate], today: NaiveDate) -> u32 {
    let has_entry = |date: NaiveDate| {
        // Descending order, so invert the comparison for binary search.
        dates_desc.binary_search_by(|probe| date.cmp(probe)).is_ok()
    };

    let mut check_date = if has_entry(today) {
        today
    } else {
        // Grace period: yesterday's streak survives until today ends.
        match today.checked_sub_days(Days::new(1)) {
            Some(yesterday) if has_entry(yesterday) => yesterday,
            _ => return 0,
        }
    };

    let mut streak = 0u32;
    for &date in dates_desc {
        if date > check_date {
            // Future-dated entries (clock skew) do not affect the walk.
            continue;
        }
        if date != check_date {
            break;
        }
        streak += 1;
        match check_date.checked_sub_days(Days::new(1)) {
            Some(previous) => check_date = previous,
            None => break,
        }
    }
    streak
}
