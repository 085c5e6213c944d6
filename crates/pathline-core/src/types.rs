//! Custom types for common data structures and validation

use chrono::{DateTime as ChronoDateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::ops::Deref;
use utoipa::ToSchema;

/// Standard UTC DateTime type used across all Pathline crates
///
/// This is the canonical datetime type for:
/// - API responses (serializes as ISO 8601 with 'Z' suffix)
/// - Event-log TIMESTAMPTZ columns and query parameters
///
/// # Example
/// ```rust
/// use pathline_core::UtcDateTime;
/// use serde::Serialize;
///
/// #[derive(Serialize)]
/// pub struct Response {
///     pub created_at: UtcDateTime,
/// }
/// ```
pub type UtcDateTime = ChronoDateTime<Utc>;

/// Wrapper type for DateTime<Utc> that automatically parses ISO 8601 format
/// Accepts multiple formats:
/// - `2024-01-15T14:30:00` (naive datetime, assumes UTC)
/// - `2024-01-15T14:30:00Z` (UTC)
/// - `2024-01-15T14:30:00+00:00` (with timezone offset)
///
/// All formats are converted to DateTime<Utc>. Serializes with 'Z' suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, ToSchema)]
#[schema(value_type = String, example = "2024-01-15T14:30:00Z")]
pub struct DateTime(pub ChronoDateTime<Utc>);

impl<'de> Deserialize<'de> for DateTime {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;

        // Try parsing as RFC3339 (with timezone) first
        if let Ok(dt) = s.parse::<ChronoDateTime<Utc>>() {
            return Ok(DateTime(dt));
        }

        // Try parsing as naive datetime (YYYY-MM-DDTHH:MM:SS) and assume UTC
        if let Ok(naive_dt) = NaiveDateTime::parse_from_str(&s, "%Y-%m-%dT%H:%M:%S") {
            let dt = ChronoDateTime::<Utc>::from_naive_utc_and_offset(naive_dt, Utc);
            return Ok(DateTime(dt));
        }

        Err(serde::de::Error::custom(
            "Invalid datetime format. Use ISO 8601: YYYY-MM-DDTHH:MM:SSZ",
        ))
    }
}

impl Serialize for DateTime {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        // Serialize as RFC3339 with 'Z' suffix
        let formatted = self.0.to_rfc3339();
        serializer.serialize_str(&formatted)
    }
}

// Allow using DateTime like DateTime<Utc>
impl Deref for DateTime {
    type Target = ChronoDateTime<Utc>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<ChronoDateTime<Utc>> for DateTime {
    fn from(dt: ChronoDateTime<Utc>) -> Self {
        DateTime(dt)
    }
}

impl From<DateTime> for ChronoDateTime<Utc> {
    fn from(dt: DateTime) -> Self {
        dt.0
    }
}

/// Inclusive date range applied to every compiled query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DateRange {
    pub start: DateTime,
    pub end: DateTime,
}

impl DateRange {
    pub fn new(start: UtcDateTime, end: UtcDateTime) -> Self {
        Self {
            start: DateTime(start),
            end: DateTime(end),
        }
    }

    /// Length of the range in whole seconds, never negative
    pub fn duration_seconds(&self) -> i64 {
        self.end.0.signed_duration_since(self.start.0).num_seconds().max(0)
    }
}
