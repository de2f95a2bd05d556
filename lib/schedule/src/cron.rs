//! Five-field cron parsing and next-fire computation.
//!
//! Expressions use the classic five fields (minute, hour, day-of-month,
//! month, day-of-week) and are evaluated in a configurable timezone. The
//! `cron` crate wants a seconds field, so a parsed expression is normalized
//! by pinning seconds to zero before compilation.

use crate::error::ScheduleError;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::str::FromStr;

/// A validated, compiled cron expression bound to a timezone.
#[derive(Debug, Clone)]
pub struct CronExpr {
    expression: String,
    compiled: cron::Schedule,
    timezone: Tz,
}

impl CronExpr {
    /// Parses a five-field cron expression for evaluation in `timezone`.
    ///
    /// # Errors
    ///
    /// Returns an error if the expression does not have exactly five fields
    /// or any field fails to parse.
    pub fn parse(expression: &str, timezone: Tz) -> Result<Self, ScheduleError> {
        let trimmed = expression.trim();
        let normalized = Self::normalize(trimmed)?;

        let compiled = cron::Schedule::from_str(&normalized).map_err(|e| {
            ScheduleError::InvalidCronExpression {
                expression: trimmed.to_string(),
                reason: e.to_string(),
            }
        })?;

        Ok(Self {
            expression: trimmed.to_string(),
            compiled,
            timezone,
        })
    }

    /// Validates a five-field cron expression without keeping the compiled form.
    ///
    /// Used by the schedule store to reject bad expressions at write time, so
    /// the scheduler never sees an invalid expression.
    ///
    /// # Errors
    ///
    /// Returns an error if the expression is invalid.
    pub fn validate(expression: &str) -> Result<(), ScheduleError> {
        Self::parse(expression, Tz::UTC).map(|_| ())
    }

    /// Parses a timezone name into a [`Tz`].
    ///
    /// # Errors
    ///
    /// Returns an error if the name is not an IANA zone.
    pub fn parse_timezone(name: &str) -> Result<Tz, ScheduleError> {
        name.parse::<Tz>()
            .map_err(|_| ScheduleError::InvalidTimezone {
                timezone: name.to_string(),
            })
    }

    /// Prepends the seconds field the `cron` crate expects.
    fn normalize(expression: &str) -> Result<String, ScheduleError> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ScheduleError::InvalidCronExpression {
                expression: expression.to_string(),
                reason: format!("expected 5 fields, got {}", fields.len()),
            });
        }
        Ok(format!("0 {expression}"))
    }

    /// Returns the original five-field expression.
    #[must_use]
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Returns the evaluation timezone.
    #[must_use]
    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Returns the smallest matching instant strictly greater than `after`.
    ///
    /// Returns `None` when the expression has no future match (possible with
    /// e.g. an impossible day-of-month/month combination).
    #[must_use]
    pub fn next_fire(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.compiled
            .after(&after.with_timezone(&self.timezone))
            .next()
            .map(|local| local.with_timezone(&Utc))
    }

    /// Returns whether the expression is due at `now` given the last fire,
    /// plus the number of whole seconds until the fire after that.
    ///
    /// Due means the first match after `last_fire` is at or before `now`.
    /// The second value is the scheduler's sleep hint: seconds from `now`
    /// until the next match that is still in the future.
    #[must_use]
    pub fn is_due(&self, last_fire: DateTime<Utc>, now: DateTime<Utc>) -> (bool, i64) {
        let due = match self.next_fire(last_fire) {
            Some(next) => next <= now,
            None => false,
        };

        let until_next = self
            .next_fire(now)
            .map_or(i64::MAX, |next| (next - now).num_seconds().max(0));

        (due, until_next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn parse_accepts_five_fields() {
        assert!(CronExpr::parse("0 9 * * *", Tz::UTC).is_ok());
        assert!(CronExpr::parse("*/5 8-18 * * 1-5", Tz::UTC).is_ok());
        assert!(CronExpr::parse("0,30 9 1,15 * *", Tz::UTC).is_ok());
    }

    #[test]
    fn parse_rejects_wrong_field_count() {
        let err = CronExpr::parse("0 9 * *", Tz::UTC).unwrap_err();
        match err {
            ScheduleError::InvalidCronExpression { reason, .. } => {
                assert!(reason.contains("5 fields"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn parse_rejects_garbage_field() {
        assert!(CronExpr::parse("0 9 * * moon", Tz::UTC).is_err());
        assert!(CronExpr::validate("not a cron").is_err());
    }

    #[test]
    fn next_fire_is_strictly_after_reference() {
        let expr = CronExpr::parse("0 9 * * *", Tz::UTC).unwrap();

        // Exactly at the match: the next fire is tomorrow.
        let at_match = utc(2024, 3, 4, 9, 0, 0);
        let next = expr.next_fire(at_match).unwrap();
        assert_eq!(next, utc(2024, 3, 5, 9, 0, 0));

        // Just before the match: the next fire is today.
        let before = utc(2024, 3, 4, 8, 59, 55);
        assert_eq!(expr.next_fire(before).unwrap(), at_match);
    }

    #[test]
    fn is_due_across_boundary() {
        let expr = CronExpr::parse("0 9 * * *", Tz::UTC).unwrap();
        let last_fire = utc(2024, 3, 4, 8, 59, 55);

        let (due, _) = expr.is_due(last_fire, utc(2024, 3, 4, 8, 59, 58));
        assert!(!due);

        let (due, until_next) = expr.is_due(last_fire, utc(2024, 3, 4, 9, 0, 5));
        assert!(due);
        // Sleep hint points at tomorrow's fire, not the one just consumed.
        assert!(until_next > 23 * 3600);
    }

    #[test]
    fn is_due_every_minute() {
        let expr = CronExpr::parse("* * * * *", Tz::UTC).unwrap();
        let last_fire = utc(2024, 3, 4, 10, 0, 30);

        let (due, _) = expr.is_due(last_fire, utc(2024, 3, 4, 10, 0, 45));
        assert!(!due);

        let (due, until_next) = expr.is_due(last_fire, utc(2024, 3, 4, 10, 1, 0));
        assert!(due);
        assert!(until_next <= 60);
    }

    #[test]
    fn evaluates_in_configured_timezone() {
        let tokyo = CronExpr::parse_timezone("Asia/Tokyo").unwrap();
        let expr = CronExpr::parse("0 9 * * *", tokyo).unwrap();

        // 09:00 JST is 00:00 UTC.
        let next = expr.next_fire(utc(2024, 3, 4, 12, 0, 0)).unwrap();
        assert_eq!(next, utc(2024, 3, 5, 0, 0, 0));
    }

    #[test]
    fn invalid_timezone_name() {
        assert!(CronExpr::parse_timezone("Mars/Olympus").is_err());
        assert!(CronExpr::parse_timezone("Asia/Tokyo").is_ok());
    }
}
