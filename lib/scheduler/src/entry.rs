//! In-memory scheduler entries.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use marketbeat_schedule::{CronExpr, Schedule, ScheduleError};

/// One schedule as the beat tracks it: the record, its compiled cron, and
/// the last instant the beat emitted a dispatch for it.
#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    /// The schedule record from the latest snapshot.
    pub schedule: Schedule,
    /// Compiled cron expression in the beat's timezone.
    pub cron: CronExpr,
    /// Advanced each time a dispatch is successfully enqueued. Seeded with
    /// the boot (or insertion) instant so past firings are never replayed.
    pub last_fire_at: DateTime<Utc>,
}

impl ScheduleEntry {
    /// Compiles a snapshot record into a trackable entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the cron expression does not compile; the caller
    /// excludes the entry from firing and logs.
    pub fn new(
        schedule: Schedule,
        timezone: Tz,
        last_fire_at: DateTime<Utc>,
    ) -> Result<Self, ScheduleError> {
        let cron = CronExpr::parse(&schedule.cron_expression, timezone)?;
        Ok(Self {
            schedule,
            cron,
            last_fire_at,
        })
    }
}
