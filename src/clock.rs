//! Clock-value helpers. Every time of day in the scheduler is a minute offset
//! from local midnight; `HH:MM` strings only exist at the serde boundary.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use crate::model::{Minutes, Span};

pub const MINUTES_PER_DAY: Minutes = 1440;

/// Parse `HH:MM` or `HH:MM:SS` into a minute offset. `24:00` is accepted as
/// the end-of-day bound; seconds are truncated.
pub fn parse_clock(raw: &str) -> Option<Minutes> {
    let mut parts = raw.trim().split(':');
    let hours: u16 = parts.next()?.trim().parse().ok()?;
    let minutes: u16 = parts.next()?.trim().parse().ok()?;
    if let Some(seconds) = parts.next() {
        let seconds: u16 = seconds.trim().parse().ok()?;
        if seconds > 59 {
            return None;
        }
    }
    if parts.next().is_some() || minutes > 59 {
        return None;
    }
    let total = hours.checked_mul(60)?.checked_add(minutes)?;
    (total <= MINUTES_PER_DAY).then_some(total)
}

pub fn format_clock(m: Minutes) -> String {
    format!("{:02}:{:02}", m / 60, m % 60)
}

pub fn minutes_of(time: NaiveTime) -> Minutes {
    (time.hour() * 60 + time.minute()) as Minutes
}

/// Wall-clock instant of a minute offset on `date`. `24:00` rolls to the next midnight.
pub fn at(date: NaiveDate, m: Minutes) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN) + Duration::minutes(i64::from(m))
}

/// Interval from two clock strings; `None` if either fails to parse or start >= end.
pub fn span_of(start: &str, end: &str) -> Option<Span> {
    Span::try_new(parse_clock(start)?, parse_clock(end)?)
}

/// Fixed-granularity slots covering `[open, close)`. A trailing partial slot is dropped.
pub fn slots(open: Minutes, close: Minutes, granularity: Minutes) -> Vec<Span> {
    if granularity == 0 || open >= close {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(((close - open) / granularity) as usize);
    let mut start = open;
    while let Some(end) = start.checked_add(granularity).filter(|e| *e <= close) {
        out.push(Span::new(start, end));
        start = end;
    }
    out
}

/// Serde adapter for a required `HH:MM` field.
pub mod hhmm {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::{format_clock, parse_clock};
    use crate::model::Minutes;

    pub fn serialize<S: Serializer>(value: &Minutes, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_clock(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Minutes, D::Error> {
        let raw = String::deserialize(d)?;
        parse_clock(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid clock value: {raw:?}")))
    }
}

/// Serde adapter for an optional `HH:MM` field. Empty strings read as absent.
pub mod hhmm_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::{format_clock, parse_clock};
    use crate::model::Minutes;

    pub fn serialize<S: Serializer>(value: &Option<Minutes>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(m) => s.serialize_str(&format_clock(*m)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Minutes>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(s) => parse_clock(s)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid clock value: {s:?}"))),
        }
    }
}
