// SPDX-License-Identifier: MIT OR Apache-2.0
//! Canonical duration type for Opal decorator parameters.
//!
//! A [`Duration`] is a non-negative count of nanoseconds capped at
//! `2^63 − 1`. Its canonical text form is a descending sequence of
//! `<N><unit>` components over the units `y, w, d, h, m, s, ms, us, ns`
//! (`y = 365d`, `w = 7d`): each unit at most once, strictly descending,
//! integer counts, at least one component. Parsing normalises, so
//! `"90s"` parses to the same value that formats back as `"1m30s"`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

const NANOS_PER_US: u64 = 1_000;
const NANOS_PER_MS: u64 = 1_000_000;
const NANOS_PER_SEC: u64 = 1_000_000_000;
const NANOS_PER_MIN: u64 = 60 * NANOS_PER_SEC;
const NANOS_PER_HOUR: u64 = 60 * NANOS_PER_MIN;
const NANOS_PER_DAY: u64 = 24 * NANOS_PER_HOUR;
const NANOS_PER_WEEK: u64 = 7 * NANOS_PER_DAY;
const NANOS_PER_YEAR: u64 = 365 * NANOS_PER_DAY;

/// Units in canonical (strictly descending) order.
const UNITS: &[(&str, u64)] = &[
    ("y", NANOS_PER_YEAR),
    ("w", NANOS_PER_WEEK),
    ("d", NANOS_PER_DAY),
    ("h", NANOS_PER_HOUR),
    ("m", NANOS_PER_MIN),
    ("s", NANOS_PER_SEC),
    ("ms", NANOS_PER_MS),
    ("us", NANOS_PER_US),
    ("ns", 1),
];

// ---------------------------------------------------------------------------
// Duration
// ---------------------------------------------------------------------------

/// A non-negative duration with clamped arithmetic and a canonical
/// text form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Duration {
    nanos: u64,
}

impl Duration {
    /// The zero duration (formats as `"0s"`).
    pub const ZERO: Duration = Duration { nanos: 0 };

    /// The largest representable duration (`2^63 − 1` nanoseconds).
    pub const MAX: Duration = Duration {
        nanos: i64::MAX as u64,
    };

    /// Construct from a nanosecond count, clamping to [`Duration::MAX`].
    #[must_use]
    pub fn from_nanos(nanos: u64) -> Self {
        Self {
            nanos: nanos.min(Self::MAX.nanos),
        }
    }

    /// Construct from whole seconds, clamping to [`Duration::MAX`].
    #[must_use]
    pub fn from_secs(secs: u64) -> Self {
        Self::from_nanos(secs.saturating_mul(NANOS_PER_SEC))
    }

    /// Construct from whole milliseconds, clamping to [`Duration::MAX`].
    #[must_use]
    pub fn from_millis(millis: u64) -> Self {
        Self::from_nanos(millis.saturating_mul(NANOS_PER_MS))
    }

    /// The raw nanosecond count.
    #[must_use]
    pub fn as_nanos(&self) -> u64 {
        self.nanos
    }

    /// Whole milliseconds, truncating.
    #[must_use]
    pub fn as_millis(&self) -> u64 {
        self.nanos / NANOS_PER_MS
    }

    /// Returns `true` for the zero duration.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.nanos == 0
    }

    /// Addition clamped to [`Duration::MAX`].
    #[must_use]
    pub fn add(self, rhs: Duration) -> Duration {
        Self::from_nanos(self.nanos.saturating_add(rhs.nanos))
    }

    /// Subtraction clamped to [`Duration::ZERO`].
    #[must_use]
    pub fn sub(self, rhs: Duration) -> Duration {
        Duration {
            nanos: self.nanos.saturating_sub(rhs.nanos),
        }
    }

    /// Scalar multiplication clamped to [`Duration::MAX`].
    ///
    /// Used for linear/exponential retry backoff scaling.
    #[must_use]
    pub fn saturating_mul(self, factor: u64) -> Duration {
        Self::from_nanos(self.nanos.saturating_mul(factor))
    }

    /// Convert to a [`std::time::Duration`] for use with timers.
    #[must_use]
    pub fn to_std(&self) -> std::time::Duration {
        std::time::Duration::from_nanos(self.nanos)
    }
}

impl From<Duration> for std::time::Duration {
    fn from(d: Duration) -> Self {
        d.to_std()
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Error produced when parsing a duration string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DurationParseError {
    /// The input was empty.
    #[error("empty duration")]
    Empty,
    /// A component was missing its integer count (e.g. `"s"`).
    #[error("expected an integer count at byte {0}")]
    MissingCount(usize),
    /// A count was not followed by a unit (e.g. `"1"` or `"1.5s"`).
    #[error("expected a unit after the count at byte {0}")]
    MissingUnit(usize),
    /// An unrecognised unit name.
    #[error("unknown duration unit `{0}`")]
    UnknownUnit(String),
    /// The same unit appeared more than once.
    #[error("duplicate duration unit `{0}`")]
    DuplicateUnit(String),
    /// Units were not in strictly descending order.
    #[error("duration units must be strictly descending; `{0}` is out of order")]
    OutOfOrder(String),
    /// The total exceeded `2^63 − 1` nanoseconds.
    #[error("duration overflows the 2^63-1 nanosecond cap")]
    Overflow,
}

impl FromStr for Duration {
    type Err = DurationParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(DurationParseError::Empty);
        }
        let bytes = s.as_bytes();
        let mut pos = 0usize;
        let mut total: u64 = 0;
        // Index into UNITS of the last unit seen; components must move
        // strictly forward through the table.
        let mut last_unit: Option<usize> = None;

        while pos < bytes.len() {
            let digits_start = pos;
            while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                pos += 1;
            }
            if pos == digits_start {
                return Err(DurationParseError::MissingCount(pos));
            }
            let count: u64 = s[digits_start..pos]
                .parse()
                .map_err(|_| DurationParseError::Overflow)?;

            let unit_start = pos;
            while pos < bytes.len() && bytes[pos].is_ascii_alphabetic() {
                pos += 1;
            }
            if pos == unit_start {
                return Err(DurationParseError::MissingUnit(pos));
            }
            let unit = &s[unit_start..pos];
            let idx = UNITS
                .iter()
                .position(|(name, _)| *name == unit)
                .ok_or_else(|| DurationParseError::UnknownUnit(unit.to_string()))?;

            match last_unit {
                Some(prev) if idx == prev => {
                    return Err(DurationParseError::DuplicateUnit(unit.to_string()));
                }
                Some(prev) if idx < prev => {
                    return Err(DurationParseError::OutOfOrder(unit.to_string()));
                }
                _ => {}
            }
            last_unit = Some(idx);

            let component = count
                .checked_mul(UNITS[idx].1)
                .ok_or(DurationParseError::Overflow)?;
            total = total
                .checked_add(component)
                .ok_or(DurationParseError::Overflow)?;
            if total > Duration::MAX.nanos {
                return Err(DurationParseError::Overflow);
            }
        }

        Ok(Duration { nanos: total })
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nanos == 0 {
            return f.write_str("0s");
        }
        let mut rest = self.nanos;
        for (name, nanos) in UNITS {
            let count = rest / nanos;
            if count > 0 {
                write!(f, "{count}{name}")?;
                rest -= count * nanos;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Serde & schema
// ---------------------------------------------------------------------------

impl Serialize for Duration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Duration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl schemars::JsonSchema for Duration {
    fn schema_name() -> Cow<'static, str> {
        "Duration".into()
    }

    fn json_schema(_: &mut schemars::SchemaGenerator) -> schemars::Schema {
        schemars::json_schema!({
            "type": "string",
            "format": "duration",
            "examples": ["30s", "1m30s", "1d1h"]
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
