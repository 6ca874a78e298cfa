//! Time-delta and timestamp parsing for workflow `stop-after` fields.
//!
//! A relative delta uses the grammar `+<n><unit>(<n><unit>)*` with units of
//! hours (`h`), days (`d`), weeks (`w`), and months (`mo`). Units may appear
//! at most once and nothing smaller than an hour is accepted. Absolute
//! timestamps accept a short list of ISO and human-readable forms.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Hours assumed per month when bounding combined deltas.
pub const HOURS_PER_MONTH: u64 = 730;
/// Hours per week.
pub const HOURS_PER_WEEK: u64 = 168;
/// Hours per day.
pub const HOURS_PER_DAY: u64 = 24;
/// Upper bound for any delta: twelve months.
pub const MAX_TOTAL_HOURS: u64 = 12 * HOURS_PER_MONTH;

/// One unit of the time-delta grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaUnit {
    Hours,
    Days,
    Weeks,
    Months,
}

impl DeltaUnit {
    pub fn suffix(self) -> &'static str {
        match self {
            DeltaUnit::Hours => "h",
            DeltaUnit::Days => "d",
            DeltaUnit::Weeks => "w",
            DeltaUnit::Months => "mo",
        }
    }

    fn hours(self) -> u64 {
        match self {
            DeltaUnit::Hours => 1,
            DeltaUnit::Days => HOURS_PER_DAY,
            DeltaUnit::Weeks => HOURS_PER_WEEK,
            DeltaUnit::Months => HOURS_PER_MONTH,
        }
    }

    /// Per-unit cap: 8760h, 365d, 52w, 12mo.
    fn max_count(self) -> u64 {
        match self {
            DeltaUnit::Hours => 8760,
            DeltaUnit::Days => 365,
            DeltaUnit::Weeks => 52,
            DeltaUnit::Months => 12,
        }
    }
}

/// A parsed relative delta, e.g. `+1d12h`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeDelta {
    /// Components in source order. Each unit appears at most once.
    pub components: Vec<(u64, DeltaUnit)>,
}

impl TimeDelta {
    pub fn total_hours(&self) -> u64 {
        self.components
            .iter()
            .map(|(n, unit)| n * unit.hours())
            .sum()
    }

    /// Absolute deadline reached by applying this delta to `from`.
    pub fn resolve(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        from + Duration::hours(self.total_hours() as i64)
    }
}

impl std::fmt::Display for TimeDelta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "+")?;
        for (n, unit) in &self.components {
            write!(f, "{n}{}", unit.suffix())?;
        }
        Ok(())
    }
}

/// A `stop-after` value: either relative to workflow creation or absolute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StopAfter {
    Relative { delta: TimeDelta },
    Absolute { at: NaiveDateTime },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeltaError {
    #[error("empty time delta; expected something like +24h")]
    Empty,

    #[error("time delta must start with '+', got {input:?}")]
    MissingPlus { input: String },

    #[error(
        "minute unit 'm' is not allowed; the minimum unit is hours 'h'. \
         Instead of +{minutes}m use +{suggested_hours}h"
    )]
    MinutesNotAllowed { minutes: u64, suggested_hours: u64 },

    #[error("unknown unit {unit:?} in time delta; allowed units are h, d, w, mo")]
    UnknownUnit { unit: String },

    #[error("unit '{unit}' appears more than once in time delta")]
    DuplicateUnit { unit: &'static str },

    #[error("missing count before unit '{unit}' in time delta")]
    MissingCount { unit: &'static str },

    #[error("{count}{unit} exceeds the maximum of {max}{unit}")]
    UnitOutOfRange {
        count: u64,
        unit: &'static str,
        max: u64,
    },

    #[error("time delta totals {total_hours}h which exceeds the 12-month maximum ({max}h)")]
    TotalOutOfRange { total_hours: u64, max: u64 },

    #[error("time delta must be at least one hour")]
    TooSmall,

    #[error(
        "unable to parse {input:?} as a timestamp; expected formats like \
         \"2025-12-31 23:59:59\", \"12/31/2025\", or \"December 31, 2025\""
    )]
    UnparsableTimestamp { input: String },
}

/// Parse the relative-delta grammar `+<n><unit>(<n><unit>)*`.
pub fn parse_time_delta(input: &str) -> Result<TimeDelta, DeltaError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(DeltaError::Empty);
    }
    let Some(rest) = trimmed.strip_prefix('+') else {
        return Err(DeltaError::MissingPlus {
            input: trimmed.to_string(),
        });
    };
    if rest.is_empty() {
        return Err(DeltaError::Empty);
    }

    let mut components: Vec<(u64, DeltaUnit)> = Vec::new();
    let mut chars = rest.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if !c.is_ascii_digit() {
            // A leading unit with no count, e.g. `+h`.
            let unit = read_unit_token(rest, start);
            return Err(match parse_unit(&unit) {
                Some(u) => DeltaError::MissingCount { unit: u.suffix() },
                None => DeltaError::UnknownUnit { unit },
            });
        }

        let mut end = start;
        while let Some(&(i, c)) = chars.peek() {
            if c.is_ascii_digit() {
                end = i + c.len_utf8();
                chars.next();
            } else {
                break;
            }
        }
        let count: u64 = rest[start..end]
            .parse()
            .map_err(|_| DeltaError::UnknownUnit {
                unit: rest[start..end].to_string(),
            })?;

        let unit_start = end;
        let mut unit_end = unit_start;
        while let Some(&(i, c)) = chars.peek() {
            if c.is_ascii_alphabetic() {
                unit_end = i + c.len_utf8();
                chars.next();
            } else {
                break;
            }
        }
        let unit_str = &rest[unit_start..unit_end];

        if unit_str == "m" {
            // Minutes are the most common mistake; suggest the rounded-up hour form.
            return Err(DeltaError::MinutesNotAllowed {
                minutes: count,
                suggested_hours: count.div_ceil(60).max(1),
            });
        }

        let unit = parse_unit(unit_str).ok_or_else(|| DeltaError::UnknownUnit {
            unit: unit_str.to_string(),
        })?;

        if components.iter().any(|(_, u)| *u == unit) {
            return Err(DeltaError::DuplicateUnit {
                unit: unit.suffix(),
            });
        }
        if count > unit.max_count() {
            return Err(DeltaError::UnitOutOfRange {
                count,
                unit: unit.suffix(),
                max: unit.max_count(),
            });
        }
        components.push((count, unit));
    }

    if components.is_empty() {
        return Err(DeltaError::Empty);
    }

    let delta = TimeDelta { components };
    let total = delta.total_hours();
    if total > MAX_TOTAL_HOURS {
        return Err(DeltaError::TotalOutOfRange {
            total_hours: total,
            max: MAX_TOTAL_HOURS,
        });
    }
    if total < 1 {
        return Err(DeltaError::TooSmall);
    }
    Ok(delta)
}

fn parse_unit(s: &str) -> Option<DeltaUnit> {
    match s {
        "h" => Some(DeltaUnit::Hours),
        "d" => Some(DeltaUnit::Days),
        "w" => Some(DeltaUnit::Weeks),
        "mo" => Some(DeltaUnit::Months),
        _ => None,
    }
}

fn read_unit_token(rest: &str, start: usize) -> String {
    rest[start..]
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect()
}

/// Accepted absolute formats, tried in order.
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S"];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%B %d, %Y", "%B %d %Y", "%d %B %Y"];

/// Parse an absolute timestamp in one of the documented forms. Date-only
/// forms resolve to midnight.
pub fn parse_absolute(input: &str) -> Result<NaiveDateTime, DeltaError> {
    let trimmed = input.trim();
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Ok(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(trimmed, fmt) {
            return Ok(d.and_hms_opt(0, 0, 0).expect("midnight is valid"));
        }
    }
    Err(DeltaError::UnparsableTimestamp {
        input: trimmed.to_string(),
    })
}

/// Parse a `stop-after` value: `+` deltas are relative, anything else must
/// be an absolute timestamp.
pub fn parse_stop_after(input: &str) -> Result<StopAfter, DeltaError> {
    let trimmed = input.trim();
    if trimmed.starts_with('+') {
        parse_time_delta(trimmed).map(|delta| StopAfter::Relative { delta })
    } else {
        parse_absolute(trimmed).map(|at| StopAfter::Absolute { at })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_single_unit() {
        let d = parse_time_delta("+24h").unwrap();
        assert_eq!(d.components, vec![(24, DeltaUnit::Hours)]);
        assert_eq!(d.total_hours(), 24);
    }

    #[test]
    fn parses_compound_delta() {
        let d = parse_time_delta("+1d12h").unwrap();
        assert_eq!(d.total_hours(), 36);
        assert_eq!(d.to_string(), "+1d12h");
    }

    #[test]
    fn rejects_minutes_with_suggestion() {
        let err = parse_time_delta("+90m").unwrap_err();
        assert_eq!(
            err,
            DeltaError::MinutesNotAllowed {
                minutes: 90,
                suggested_hours: 2
            }
        );
        assert!(err.to_string().contains("+2h"));
    }

    #[test]
    fn rejects_duplicate_unit() {
        let err = parse_time_delta("+1d2d").unwrap_err();
        assert_eq!(err, DeltaError::DuplicateUnit { unit: "d" });
    }

    #[test]
    fn rejects_out_of_range_days() {
        let err = parse_time_delta("+400d").unwrap_err();
        assert_eq!(
            err,
            DeltaError::UnitOutOfRange {
                count: 400,
                unit: "d",
                max: 365
            }
        );
    }

    #[test]
    fn rejects_combined_total_beyond_twelve_months() {
        // 12mo + 52w individually pass the per-unit caps but overflow combined.
        let err = parse_time_delta("+12mo52w").unwrap_err();
        assert!(matches!(err, DeltaError::TotalOutOfRange { .. }));
    }

    #[test]
    fn rejects_unknown_unit() {
        let err = parse_time_delta("+3y").unwrap_err();
        assert_eq!(
            err,
            DeltaError::UnknownUnit {
                unit: "y".to_string()
            }
        );
    }

    #[test]
    fn rejects_missing_plus() {
        assert!(matches!(
            parse_time_delta("24h").unwrap_err(),
            DeltaError::MissingPlus { .. }
        ));
    }

    #[test]
    fn parses_absolute_formats() {
        assert!(parse_absolute("2025-12-31 23:59:59").is_ok());
        assert!(parse_absolute("2025-12-31").is_ok());
        assert!(parse_absolute("12/31/2025").is_ok());
        assert!(parse_absolute("December 31, 2025").is_ok());
        assert!(parse_absolute("31 December 2025").is_ok());
    }

    #[test]
    fn stop_after_dispatches_on_plus_prefix() {
        assert!(matches!(
            parse_stop_after("+2h").unwrap(),
            StopAfter::Relative { .. }
        ));
        assert!(matches!(
            parse_stop_after("2025-06-01").unwrap(),
            StopAfter::Absolute { .. }
        ));
    }

    #[test]
    fn resolve_adds_hours() {
        let d = parse_time_delta("+2h").unwrap();
        let from = DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(d.resolve(from) - from, Duration::hours(2));
    }

    proptest! {
        /// Any in-range single-unit delta parses and round-trips through Display.
        #[test]
        fn single_unit_roundtrip(count in 1u64..=12, unit in prop_oneof![
            Just(DeltaUnit::Hours),
            Just(DeltaUnit::Days),
            Just(DeltaUnit::Weeks),
            Just(DeltaUnit::Months),
        ]) {
            let text = format!("+{count}{}", unit.suffix());
            let parsed = parse_time_delta(&text).unwrap();
            prop_assert_eq!(parsed.to_string(), text);
        }

        /// Parsed deltas never exceed the twelve-month ceiling.
        #[test]
        fn parsed_total_is_bounded(h in 0u64..10000, d in 0u64..500) {
            let text = format!("+{h}h{d}d");
            if let Ok(delta) = parse_time_delta(&text) {
                prop_assert!(delta.total_hours() <= MAX_TOTAL_HOURS);
                prop_assert!(delta.total_hours() >= 1);
            }
        }

        /// Arbitrary garbage never panics.
        #[test]
        fn parser_total(input in ".{0,40}") {
            let _ = parse_stop_after(&input);
        }
    }
}
