//! Time roll-up: `Duration`/`Granularity` and deterministic truncation,
//! used both for ingest-time truncation (spec §3, §4.3 step 2) and
//! query-time bucketing (spec §4.5 step 2).

use crate::error::{Error, Result};
use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

/// A unit of time, used by both `Duration` ("after") and `Granularity`
/// (truncation target). `Week` only ever appears in a `Duration` — there
/// is no well-defined truncation to a week boundary, mirroring the
/// reference implementation's `Truncator`, which has no `WEEK`
/// specialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Year,
    Month,
    Week,
    Day,
    Hour,
    Minute,
    Second,
}

impl TimeUnit {
    fn by_name(name: &str) -> Result<TimeUnit> {
        Ok(match name {
            "year" => TimeUnit::Year,
            "month" => TimeUnit::Month,
            "week" => TimeUnit::Week,
            "day" => TimeUnit::Day,
            "hour" => TimeUnit::Hour,
            "minute" => TimeUnit::Minute,
            "second" => TimeUnit::Second,
            other => return Err(Error::config(format!("unsupported time unit: {}", other))),
        })
    }
}

/// A granularity is just the truncation target of a `TimeUnit`; it is
/// restricted to the subset `TimeUnit` supports truncating to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Granularity(TimeUnit);

impl Granularity {
    /// Parse a granularity by name (`"year"`, `"month"`, `"day"`, `"hour"`,
    /// `"minute"`, `"second"`)
    pub fn parse(name: &str) -> Result<Granularity> {
        let unit = TimeUnit::by_name(name)?;
        if unit == TimeUnit::Week {
            return Err(Error::config("granularity cannot be 'week'"));
        }
        Ok(Granularity(unit))
    }

    pub fn time_unit(self) -> TimeUnit {
        self.0
    }

    /// Truncate a seconds-since-epoch timestamp to this granularity's
    /// boundary (the boundary the timestamp falls within).
    pub fn truncate(self, ts_secs: i64) -> i64 {
        let dt = NaiveDateTime::from_timestamp_opt(ts_secs, 0)
            .unwrap_or_else(|| NaiveDateTime::from_timestamp_opt(0, 0).unwrap());
        let truncated = match self.0 {
            TimeUnit::Year => dt
                .date()
                .with_month(1)
                .and_then(|d| d.with_day(1))
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            TimeUnit::Month => dt.date().with_day(1).unwrap().and_hms_opt(0, 0, 0).unwrap(),
            TimeUnit::Week | TimeUnit::Day => dt.date().and_hms_opt(0, 0, 0).unwrap(),
            TimeUnit::Hour => dt.date().and_hms_opt(dt.hour(), 0, 0).unwrap(),
            TimeUnit::Minute => dt.date().and_hms_opt(dt.hour(), dt.minute(), 0).unwrap(),
            TimeUnit::Second => dt,
        };
        truncated.and_utc().timestamp()
    }
}

/// `count` repetitions of a `TimeUnit`, e.g. "2 hours" (`Duration{count:
/// 2, unit: Hour}`). Used for rollup-rule `after` thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Duration {
    pub count: u32,
    pub unit: TimeUnit,
}

impl Duration {
    /// Parse a duration description like `"1 day"` / `"2 weeks"`
    /// (trailing plural `s` is tolerated and stripped, matching the
    /// reference's `"<n> <unit>s"` convention).
    pub fn parse(desc: &str) -> Result<Duration> {
        let mut parts = desc.split_whitespace();
        let count: u32 = parts
            .next()
            .ok_or_else(|| Error::config(format!("wrong duration description: {}", desc)))?
            .parse()
            .map_err(|_| Error::config(format!("wrong duration description: {}", desc)))?;
        let mut unit_name = parts
            .next()
            .ok_or_else(|| Error::config(format!("wrong duration description: {}", desc)))?
            .to_string();
        if unit_name.ends_with('s') {
            unit_name.pop();
        }
        if count == 0 {
            return Err(Error::config(format!("wrong duration description: {}", desc)));
        }
        let unit = TimeUnit::by_name(&unit_name)?;
        Ok(Duration { count, unit })
    }

    /// Subtract this duration from a seconds-since-epoch timestamp,
    /// calendar-aware for year/month (matching `gmtime`-based arithmetic
    /// in the reference rather than a fixed-seconds approximation).
    pub fn subtract_from(self, ts_secs: i64) -> i64 {
        let dt = NaiveDateTime::from_timestamp_opt(ts_secs, 0)
            .unwrap_or_else(|| NaiveDateTime::from_timestamp_opt(0, 0).unwrap());
        let result = match self.unit {
            TimeUnit::Year => {
                let year = dt.year() - self.count as i32;
                dt.with_year(year).unwrap_or(dt)
            }
            TimeUnit::Month => {
                let total_months = dt.year() as i64 * 12 + (dt.month() as i64 - 1) - self.count as i64;
                let year = (total_months.div_euclid(12)) as i32;
                let month = (total_months.rem_euclid(12)) as u32 + 1;
                dt.with_year(year).and_then(|d| d.with_month(month)).unwrap_or(dt)
            }
            TimeUnit::Week => dt - chrono::Duration::weeks(self.count as i64),
            TimeUnit::Day => dt - chrono::Duration::days(self.count as i64),
            TimeUnit::Hour => dt - chrono::Duration::hours(self.count as i64),
            TimeUnit::Minute => dt - chrono::Duration::minutes(self.count as i64),
            TimeUnit::Second => dt - chrono::Duration::seconds(self.count as i64),
        };
        result.and_utc().timestamp()
    }
}

/// One roll-up rule: records older than `after` get truncated to
/// `granularity`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RollupRule {
    pub granularity: Granularity,
    pub after: Duration,
}

impl RollupRule {
    pub fn new(granularity: Granularity, after: Duration) -> Self {
        Self { granularity, after }
    }
}

/// Apply a set of roll-up rules to a raw seconds-since-epoch timestamp,
/// relative to a reference "now".
///
/// Rules are tried in descending order of `after` (coarsest threshold
/// first): the first rule whose threshold the timestamp has aged past
/// wins, and the timestamp is truncated to that rule's granularity. This
/// matters when a timestamp is old enough to satisfy more than one
/// rule's threshold simultaneously — e.g. a record older than a year is
/// also older than a week and a day, and must still land in the coarsest
/// (month) bucket rather than the finest (hour) one. If no rule's
/// threshold is exceeded, the raw timestamp passes through unchanged
/// (spec §3 "Invariants", confirmed against
/// `original_source/src/codegen/db/rollup.cc`'s generated if/else-if
/// chain and worked example in spec §8 scenario 5).
pub fn apply_rollup(raw: i64, rules: &[RollupRule], now: i64) -> i64 {
    let mut sorted: Vec<&RollupRule> = rules.iter().collect();
    sorted.sort_by(|a, b| duration_seconds_approx(b.after).cmp(&duration_seconds_approx(a.after)));
    for rule in sorted {
        let boundary = rule.after.subtract_from(now);
        if raw < boundary {
            return rule.granularity.truncate(raw);
        }
    }
    raw
}

/// Rough ordering key for sorting rules by `after` magnitude; only used
/// to pick evaluation order, never for the boundary arithmetic itself
/// (which stays calendar-aware via `Duration::subtract_from`).
fn duration_seconds_approx(d: Duration) -> i64 {
    let unit_secs = match d.unit {
        TimeUnit::Year => 365 * 86_400,
        TimeUnit::Month => 30 * 86_400,
        TimeUnit::Week => 7 * 86_400,
        TimeUnit::Day => 86_400,
        TimeUnit::Hour => 3_600,
        TimeUnit::Minute => 60,
        TimeUnit::Second => 1,
    };
    unit_secs * d.count as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_parse() {
        let d = Duration::parse("1 day").unwrap();
        assert_eq!(d.count, 1);
        assert_eq!(d.unit, TimeUnit::Day);

        let d = Duration::parse("2 weeks").unwrap();
        assert_eq!(d.count, 2);
        assert_eq!(d.unit, TimeUnit::Week);
    }

    #[test]
    fn test_truncate_hour_day_month() {
        // 2014-11-12 10:15:30 UTC
        let ts = 1_415_787_330;
        let g_hour = Granularity::parse("hour").unwrap();
        let g_day = Granularity::parse("day").unwrap();
        assert_eq!(g_hour.truncate(ts), 1_415_786_400);
        assert_eq!(g_day.truncate(ts), 1_415_750_400);
    }

    #[test]
    fn test_scenario_time_rollup() {
        // spec §8 scenario 5
        let now = 1_496_570_140i64;
        let rules = vec![
            RollupRule::new(Granularity::parse("hour").unwrap(), Duration::parse("1 day").unwrap()),
            RollupRule::new(Granularity::parse("day").unwrap(), Duration::parse("1 week").unwrap()),
            RollupRule::new(Granularity::parse("month").unwrap(), Duration::parse("1 year").unwrap()),
        ];

        // recent timestamps: untouched
        for raw in [1_496_566_539i64, 1_496_555_739, 1_496_555_700] {
            assert_eq!(apply_rollup(raw, &rules, now), raw);
        }

        // older than a day but within a week: hourly bucket
        assert_eq!(apply_rollup(1_496_408_066, &rules, now), 1_496_404_800);
        assert_eq!(apply_rollup(1_496_405_460, &rules, now), 1_496_404_800);

        // older than a week but within a year: daily bucket
        assert_eq!(apply_rollup(1_495_948_331, &rules, now), 1_495_929_600);
        assert_eq!(apply_rollup(1_495_941_131, &rules, now), 1_495_929_600);

        // older than a year: monthly bucket
        assert_eq!(apply_rollup(1_461_801_600, &rules, now), 1_459_468_800);
    }
}
