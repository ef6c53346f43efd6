//! Relative-time expressions accepted by [`WorkflowContext::wait`](crate::WorkflowContext::wait).
//!
//! The grammar is a closed set: `"N seconds|minutes|hours|days|weeks"`, with
//! the singular unit forms also accepted (`"1 day"`). The expression is
//! converted to an absolute wake timestamp against the store's clock, never
//! the process clock.

use std::str::FromStr;

use crate::error::Error;

/// A parsed `wait` duration.
///
/// # Example
///
/// ```
/// use duraflow::WaitDuration;
///
/// let d: WaitDuration = "7 days".parse().unwrap();
/// assert_eq!(d.as_seconds(), 7 * 24 * 60 * 60);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitDuration {
    seconds: u64,
}

impl WaitDuration {
    const MAX_SECONDS: u64 = i64::MAX as u64;

    /// Total length in whole seconds.
    pub fn as_seconds(self) -> u64 {
        self.seconds
    }

    /// The duration as `time::Duration`, for wake-time arithmetic.
    pub fn as_time_duration(self) -> time::Duration {
        time::Duration::seconds(self.seconds as i64)
    }

    fn unit_seconds(unit: &str) -> Option<u64> {
        match unit {
            "second" | "seconds" => Some(1),
            "minute" | "minutes" => Some(60),
            "hour" | "hours" => Some(60 * 60),
            "day" | "days" => Some(24 * 60 * 60),
            "week" | "weeks" => Some(7 * 24 * 60 * 60),
            _ => None,
        }
    }
}

impl FromStr for WaitDuration {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let invalid = |reason| Error::InvalidWaitDuration {
            input: s.to_owned(),
            reason,
        };

        let mut parts = s.split_whitespace();
        let amount = parts.next().ok_or_else(|| invalid("empty expression"))?;
        let unit = parts
            .next()
            .ok_or_else(|| invalid("missing unit, expected e.g. \"3 days\""))?;
        if parts.next().is_some() {
            return Err(invalid("trailing input after unit"));
        }

        let amount: u64 = amount
            .parse()
            .map_err(|_| invalid("amount is not a non-negative integer"))?;
        let unit_seconds =
            Self::unit_seconds(unit).ok_or_else(|| invalid("unknown unit, expected seconds|minutes|hours|days|weeks"))?;

        let seconds = amount
            .checked_mul(unit_seconds)
            .filter(|&s| s <= Self::MAX_SECONDS)
            .ok_or_else(|| invalid("duration overflows"))?;

        Ok(WaitDuration { seconds })
    }
}
