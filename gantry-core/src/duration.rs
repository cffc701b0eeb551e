//! The compact duration grammar used in table-print cells.
//!
//! Server-side printers render ages and restart times as strings like
//! `"5d"`, `"3h38m"` or `"4 (3h38m ago)"`. Transforms parse these back into
//! absolute values so clients can re-render without the server's clock.
//!
//! The grammar is `(\d+d)?(\d+h)?(\d+m)?(\d+s)?` with at least one unit
//! present, units strictly in that order, and `d` meaning 24 hours. Unit
//! sums saturate rather than overflow.

use std::time::Duration;
use thiserror::Error;

/// Errors returned when parsing a duration or restart cell.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// The string had no units at all.
    #[error("empty duration")]
    Empty,

    /// A unit other than 'd', 'h', 'm' or 's' was found.
    #[error("invalid unit {0:?}: expected one of 'd', 'h', 'm', 's'")]
    InvalidUnit(char),

    /// Units appeared out of order or more than once.
    #[error("unit {0:?} out of order: units must appear once, in d h m s order")]
    OutOfOrder(char),

    /// A digit run did not parse as a number.
    #[error("invalid number: {0}")]
    NotANumber(#[from] std::num::ParseIntError),

    /// The cell did not look like `count` or `count (duration ago)`.
    #[error("malformed restart cell {0:?}")]
    MalformedCell(String),
}

const UNITS: [(char, u64); 4] = [('d', 86_400), ('h', 3_600), ('m', 60), ('s', 1)];

fn unit_rank(unit: char) -> Option<usize> {
    UNITS.iter().position(|(u, _)| *u == unit)
}

/// Parse a duration in the `d h m s` grammar.
///
/// ```
/// # use gantry_core::duration::parse_duration;
/// # use std::time::Duration;
/// assert_eq!(parse_duration("3h38m").unwrap(), Duration::from_secs(3 * 3600 + 38 * 60));
/// assert_eq!(parse_duration("0s").unwrap(), Duration::ZERO);
/// assert!(parse_duration("10x").is_err());
/// ```
///
/// # Errors
///
/// Fails on an empty string, unknown units, repeated or out-of-order units,
/// or digit runs that do not parse.
pub fn parse_duration(s: &str) -> Result<Duration, ParseError> {
    let mut secs: u64 = 0;
    let mut last_rank: Option<usize> = None;
    let mut rest = s;

    if rest.is_empty() {
        return Err(ParseError::Empty);
    }
    while !rest.is_empty() {
        let digits_end = rest
            .char_indices()
            .find(|(_, c)| !c.is_ascii_digit())
            .map_or(rest.len(), |(i, _)| i);
        let unit = rest[digits_end..]
            .chars()
            .next()
            .ok_or(ParseError::Empty)?;
        if digits_end == 0 {
            return Err(ParseError::InvalidUnit(unit));
        }
        let rank = unit_rank(unit).ok_or(ParseError::InvalidUnit(unit))?;
        if last_rank.is_some_and(|last| rank <= last) {
            return Err(ParseError::OutOfOrder(unit));
        }
        last_rank = Some(rank);

        let value: u64 = rest[..digits_end].parse()?;
        secs = secs.saturating_add(value.saturating_mul(UNITS[rank].1));
        rest = &rest[digits_end + unit.len_utf8()..];
    }
    Ok(Duration::from_secs(secs))
}

/// Format a duration in the same grammar, largest unit first, zero units
/// omitted. The zero duration renders as `"0s"`.
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let mut secs = duration.as_secs();
    let mut out = String::new();
    for (unit, unit_secs) in UNITS {
        let value = secs / unit_secs;
        if value > 0 {
            out.push_str(&value.to_string());
            out.push(unit);
            secs %= unit_secs;
        }
    }
    if out.is_empty() {
        out.push_str("0s");
    }
    out
}

/// Parse a restart-count cell like `"4 (3h38m ago)"` into the count and the
/// absolute epoch-millisecond time of the last restart.
///
/// A bare count (`"4"`) yields no restart time.
///
/// # Errors
///
/// Fails when the count is not a number or the parenthesized suffix does not
/// match `(<duration> ago)`.
pub fn parse_restart_cell(cell: &str, now_ms: i64) -> Result<(i64, Option<i64>), ParseError> {
    match cell.split_once(' ') {
        None => Ok((cell.trim().parse()?, None)),
        Some((count, rest)) => {
            let ago = rest
                .strip_prefix('(')
                .and_then(|r| r.strip_suffix(" ago)"))
                .ok_or_else(|| ParseError::MalformedCell(cell.to_string()))?;
            let elapsed = parse_duration(ago)?;
            let elapsed_ms = i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX);
            Ok((count.parse()?, Some(now_ms - elapsed_ms)))
        }
    }
}

/// The inverse of [`parse_restart_cell`], at second resolution.
#[must_use]
pub fn format_restart_cell(count: i64, last_restart_ms: Option<i64>, now_ms: i64) -> String {
    match last_restart_ms {
        None => count.to_string(),
        Some(last) => {
            let elapsed_ms = now_ms.saturating_sub(last).max(0);
            let elapsed = Duration::from_secs(elapsed_ms as u64 / 1000);
            format!("{} ({} ago)", count, format_duration(elapsed))
        }
    }
}
