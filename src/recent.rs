// Recent-Period Resolver
//
// Every "recent data" chart endpoint needs the same thing: the latest
// calendar month that actually contains rows, so a dashboard does not show
// an empty chart just because the current month has no data yet. This walks
// backward from a reference month, one month at a time, probing the store
// with half-open [month_start, next_month_start) interval queries, and
// returns the first non-empty month within a bounded lookback window.

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

/// How many months back a recent-data lookup will walk before giving up.
/// This is a cap on the search, not a statement about what exists in the
/// store; callers treat it as configuration.
pub const DEFAULT_LOOKBACK_MONTHS: u32 = 12;

// ============================================================================
// Month Arithmetic
// ============================================================================

/// A calendar month. Stepping handles the Dec/Jan year rollover explicitly
/// instead of relying on day-count arithmetic, which can skip or repeat a
/// month because month lengths vary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Month {
    pub year: i32,
    /// 1-based, January = 1
    pub month: u32,
}

impl Month {
    pub fn new(year: i32, month: u32) -> Self {
        debug_assert!((1..=12).contains(&month));
        Month { year, month }
    }

    /// The month containing a given date.
    pub fn containing(date: NaiveDate) -> Self {
        Month {
            year: date.year(),
            month: date.month(),
        }
    }

    /// First day of this month.
    pub fn start(&self) -> NaiveDate {
        // Valid by construction: month is always in 1..=12 and day 1 exists
        // in every month.
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
            .unwrap_or_else(|| panic!("invalid month {}-{}", self.year, self.month))
    }

    /// Following month (January of the next year after December).
    pub fn next(&self) -> Month {
        if self.month == 12 {
            Month::new(self.year + 1, 1)
        } else {
            Month::new(self.year, self.month + 1)
        }
    }

    /// Preceding month (December of the prior year before January).
    pub fn prev(&self) -> Month {
        if self.month == 1 {
            Month::new(self.year - 1, 12)
        } else {
            Month::new(self.year, self.month - 1)
        }
    }

    /// Whether a date falls inside this month.
    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }
}

impl std::fmt::Display for Month {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// A successful resolution: the closest month to the reference (walking
/// backward) that has at least one row, plus exactly that month's rows.
#[derive(Debug, Clone, Serialize)]
pub struct RecentPeriod<T> {
    pub month: Month,
    pub rows: Vec<T>,
}

/// Find the most recent calendar month with data, walking backward from the
/// reference date at most `lookback` months (the reference month counts as
/// the first probe).
///
/// `query` is the data-access capability: given a half-open `[start, end)`
/// date interval, return the rows whose date falls inside it.
///
/// Returns:
/// - `Ok(Some(period))` - first non-empty month, probed newest-first
/// - `Ok(None)` - every month in the window was empty ("no recent data",
///   an expected state of a sparse dataset, not an error)
/// - `Err(e)` - the first query failure, propagated immediately with no
///   partial results; retries are caller policy
pub fn resolve_recent_period<T, E, Q>(
    reference: NaiveDate,
    lookback: u32,
    mut query: Q,
) -> Result<Option<RecentPeriod<T>>, E>
where
    Q: FnMut(NaiveDate, NaiveDate) -> Result<Vec<T>, E>,
{
    let mut cursor = Month::containing(reference);

    for _ in 0..lookback {
        let rows = query(cursor.start(), cursor.next().start())?;
        if !rows.is_empty() {
            return Ok(Some(RecentPeriod {
                month: cursor,
                rows,
            }));
        }
        cursor = cursor.prev();
    }

    Ok(None)
}
