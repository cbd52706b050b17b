//! Persisted scheduling state and the value types shared across crates.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone};
use serde::{Deserialize, Serialize};

use crate::error::LoginPushError;

/// Default cap on short-term attempts per sequence.
pub const MAX_SHORT_TERM_PUSH: u32 = 5;

/// Default delay between two short-term attempts.
pub const SHORT_TERM_PUSH_INTERVAL: Duration = Duration::from_secs(10 * 60);

// ── Sequence state ────────────────────────────────────────────

/// Progress of the bounded retry sequence. Persisted so it can cross a reload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceState {
    pub in_short_term_sequence: bool,
    pub short_term_push_count: u32,
    /// A reload was requested to refresh the artifact before the next attempt.
    pub pending_reload: bool,
}

impl SequenceState {
    /// State at the start of a fresh sequence.
    pub fn started() -> Self {
        Self {
            in_short_term_sequence: true,
            short_term_push_count: 0,
            pending_reload: false,
        }
    }

    /// Restore the invariants after reading possibly stale or tampered values.
    ///
    /// Outside a sequence the count is always zero, and the count never
    /// exceeds `max`.
    pub fn normalized(mut self, max: u32) -> Self {
        if !self.in_short_term_sequence {
            self.short_term_push_count = 0;
        }
        self.short_term_push_count = self.short_term_push_count.min(max);
        self
    }

    /// Whether another attempt may still be made in this sequence.
    pub fn has_attempts_left(&self, max: u32) -> bool {
        self.in_short_term_sequence && self.short_term_push_count < max
    }
}

// ── Push record ───────────────────────────────────────────────

/// History of the last push, used for daily gating and first-launch detection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushRecord {
    pub last_push_epoch_millis: Option<i64>,
    pub last_push_date: Option<NaiveDate>,
}

impl PushRecord {
    /// Record built for a push attempted at `at`.
    pub fn at<Tz: TimeZone>(at: &DateTime<Tz>) -> Self {
        Self {
            last_push_epoch_millis: Some(at.timestamp_millis()),
            last_push_date: Some(at.date_naive()),
        }
    }

    /// Nothing has ever been pushed from this installation.
    pub fn is_first_launch(&self) -> bool {
        self.last_push_epoch_millis.is_none()
    }

    pub fn pushed_on(&self, date: NaiveDate) -> bool {
        self.last_push_date == Some(date)
    }
}

// ── Time of day ───────────────────────────────────────────────

/// Wall-clock time of the daily push, parsed from `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeOfDay {
    pub hour: u8,
    pub minute: u8,
}

impl TimeOfDay {
    /// Used whenever the configured value is missing or malformed.
    pub const FALLBACK: TimeOfDay = TimeOfDay { hour: 8, minute: 0 };

    pub fn new(hour: u8, minute: u8) -> Result<Self, LoginPushError> {
        if hour > 23 || minute > 59 {
            return Err(LoginPushError::MalformedConfig(format!(
                "time of day out of range: {hour:02}:{minute:02}"
            )));
        }
        Ok(Self { hour, minute })
    }

    /// Parse `HH:MM`, falling back to 08:00 with a warning.
    pub fn parse_or_default(raw: Option<&str>) -> Self {
        match raw {
            None => Self::FALLBACK,
            Some(s) => s.parse().unwrap_or_else(|e| {
                tracing::warn!(value = %s, error = %e, "invalid push time, using 08:00");
                Self::FALLBACK
            }),
        }
    }

    pub fn as_naive_time(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(u32::from(self.hour), u32::from(self.minute), 0)
            .unwrap_or(NaiveTime::MIN)
    }

    /// This time of day on the calendar date of `now`.
    pub fn on_same_day(&self, now: &DateTime<FixedOffset>) -> DateTime<FixedOffset> {
        let naive = now.date_naive().and_time(self.as_naive_time());
        now.offset()
            .from_local_datetime(&naive)
            .single()
            .unwrap_or(*now)
    }

    /// Next occurrence at or after `now`, rolling to tomorrow when today's
    /// instant has already passed.
    pub fn next_occurrence(&self, now: &DateTime<FixedOffset>) -> DateTime<FixedOffset> {
        let today = self.on_same_day(now);
        if *now > today {
            today + chrono::Duration::days(1)
        } else {
            today
        }
    }

    /// Next daily fire given the push history. A day that already saw a
    /// push is skipped, so the instant that just fired is never re-armed.
    pub fn next_unpushed(
        &self,
        now: &DateTime<FixedOffset>,
        record: &PushRecord,
    ) -> DateTime<FixedOffset> {
        let next = self.next_occurrence(now);
        if record.pushed_on(next.date_naive()) {
            next + chrono::Duration::days(1)
        } else {
            next
        }
    }
}

impl Default for TimeOfDay {
    fn default() -> Self {
        Self::FALLBACK
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for TimeOfDay {
    type Err = LoginPushError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (h, m) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| LoginPushError::MalformedConfig(format!("expected HH:MM, got '{s}'")))?;
        let hour = h
            .parse::<u8>()
            .map_err(|_| LoginPushError::MalformedConfig(format!("invalid hour in '{s}'")))?;
        let minute = m
            .parse::<u8>()
            .map_err(|_| LoginPushError::MalformedConfig(format!("invalid minute in '{s}'")))?;
        Self::new(hour, minute)
    }
}

// ── Sequence policy ───────────────────────────────────────────

/// Bounds of the short-term retry sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencePolicy {
    pub max_short_term_push: u32,
    #[serde(with = "duration_secs")]
    pub short_term_interval: Duration,
}

impl Default for SequencePolicy {
    fn default() -> Self {
        Self {
            max_short_term_push: MAX_SHORT_TERM_PUSH,
            short_term_interval: SHORT_TERM_PUSH_INTERVAL,
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(s).unwrap()
    }

    #[test]
    fn normalized_clears_count_outside_sequence() {
        let state = SequenceState {
            in_short_term_sequence: false,
            short_term_push_count: 3,
            pending_reload: false,
        };
        assert_eq!(state.normalized(5).short_term_push_count, 0);
    }

    #[test]
    fn normalized_clamps_to_max() {
        let state = SequenceState {
            in_short_term_sequence: true,
            short_term_push_count: 42,
            pending_reload: true,
        };
        let n = state.normalized(5);
        assert_eq!(n.short_term_push_count, 5);
        assert!(n.pending_reload);
    }

    #[test]
    fn attempts_left_only_inside_sequence() {
        assert!(!SequenceState::default().has_attempts_left(5));
        assert!(SequenceState::started().has_attempts_left(5));
        let mut full = SequenceState::started();
        full.short_term_push_count = 5;
        assert!(!full.has_attempts_left(5));
    }

    #[test]
    fn parse_time_of_day() {
        let t: TimeOfDay = "07:45".parse().unwrap();
        assert_eq!(t, TimeOfDay { hour: 7, minute: 45 });
        assert_eq!(t.to_string(), "07:45");
        assert_eq!(" 9:05 ".parse::<TimeOfDay>().unwrap().to_string(), "09:05");
    }

    #[test]
    fn parse_time_of_day_rejects_garbage() {
        assert!("25:00".parse::<TimeOfDay>().is_err());
        assert!("12:60".parse::<TimeOfDay>().is_err());
        assert!("noon".parse::<TimeOfDay>().is_err());
        assert!("".parse::<TimeOfDay>().is_err());
    }

    #[test]
    fn malformed_time_falls_back_to_eight() {
        assert_eq!(TimeOfDay::parse_or_default(Some("8h")), TimeOfDay::FALLBACK);
        assert_eq!(TimeOfDay::parse_or_default(None), TimeOfDay::FALLBACK);
        assert_eq!(
            TimeOfDay::parse_or_default(Some("21:30")),
            TimeOfDay { hour: 21, minute: 30 }
        );
    }

    #[test]
    fn next_occurrence_later_today() {
        let now = at("2026-03-10T06:00:00+08:00");
        let next = TimeOfDay::new(8, 0).unwrap().next_occurrence(&now);
        assert_eq!(next, at("2026-03-10T08:00:00+08:00"));
    }

    #[test]
    fn next_occurrence_rolls_to_tomorrow() {
        let now = at("2026-03-10T08:00:01+08:00");
        let next = TimeOfDay::new(8, 0).unwrap().next_occurrence(&now);
        assert_eq!(next, at("2026-03-11T08:00:00+08:00"));
    }

    #[test]
    fn next_occurrence_exact_instant_is_today() {
        let now = at("2026-03-10T08:00:00+08:00");
        let next = TimeOfDay::new(8, 0).unwrap().next_occurrence(&now);
        assert_eq!(next, now);
    }

    #[test]
    fn next_unpushed_skips_a_day_already_pushed() {
        let now = at("2026-03-10T08:00:00+08:00");
        let time = TimeOfDay::new(8, 0).unwrap();

        let pushed = PushRecord::at(&now);
        assert_eq!(time.next_unpushed(&now, &pushed), at("2026-03-11T08:00:00+08:00"));

        let yesterday = PushRecord::at(&at("2026-03-09T08:00:00+08:00"));
        assert_eq!(time.next_unpushed(&now, &yesterday), now);
        assert_eq!(time.next_unpushed(&now, &PushRecord::default()), now);
    }

    #[test]
    fn push_record_tracks_date() {
        let now = at("2026-03-10T23:59:00+08:00");
        let record = PushRecord::at(&now);
        assert!(!record.is_first_launch());
        assert!(record.pushed_on(NaiveDate::from_ymd_opt(2026, 3, 10).unwrap()));
        assert!(PushRecord::default().is_first_launch());
    }

    #[test]
    fn policy_defaults() {
        let p = SequencePolicy::default();
        assert_eq!(p.max_short_term_push, 5);
        assert_eq!(p.short_term_interval, Duration::from_secs(600));
    }
}
