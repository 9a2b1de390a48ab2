//! Millisecond-resolution time used for every position on the output and
//! source axes.
//!
//! Beat timestamps arrive as real seconds; once they enter the scheduler they
//! are rounded to the nearest millisecond. Keeping segment bounds integral makes
//! the length invariants exact and lets project files written with
//! `HH:MM:SS.mmm` timecodes be read back without loss.

use std::{
    fmt,
    ops::{Add, AddAssign, Sub},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::ClipperError;

const MILLIS_PER_SECOND: u64 = 1_000;
const MILLIS_PER_MINUTE: u64 = 60 * MILLIS_PER_SECOND;
const MILLIS_PER_HOUR: u64 = 60 * MILLIS_PER_MINUTE;

/// A non-negative instant or duration in whole milliseconds.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timecode(u64);

impl Timecode {
    pub const ZERO: Timecode = Timecode(0);

    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Rounds `seconds` to the nearest millisecond. Negative and non-finite
    /// inputs saturate to zero.
    pub fn from_secs_f64(seconds: f64) -> Self {
        if !seconds.is_finite() || seconds <= 0.0 {
            return Self::ZERO;
        }
        Self((seconds * MILLIS_PER_SECOND as f64).round() as u64)
    }

    pub const fn as_millis(self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / MILLIS_PER_SECOND as f64
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn saturating_sub(self, rhs: Timecode) -> Timecode {
        Timecode(self.0.saturating_sub(rhs.0))
    }
}

impl Add for Timecode {
    type Output = Timecode;

    fn add(self, rhs: Timecode) -> Timecode {
        Timecode(self.0 + rhs.0)
    }
}

impl AddAssign for Timecode {
    fn add_assign(&mut self, rhs: Timecode) {
        self.0 += rhs.0;
    }
}

impl Sub for Timecode {
    type Output = Timecode;

    fn sub(self, rhs: Timecode) -> Timecode {
        self.saturating_sub(rhs)
    }
}

/// Formats as the `HH:MM:SS.mmm` clock string understood by MLT.
impl fmt::Display for Timecode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hours = self.0 / MILLIS_PER_HOUR;
        let minutes = (self.0 % MILLIS_PER_HOUR) / MILLIS_PER_MINUTE;
        let seconds = (self.0 % MILLIS_PER_MINUTE) / MILLIS_PER_SECOND;
        let millis = self.0 % MILLIS_PER_SECOND;
        write!(f, "{hours:02}:{minutes:02}:{seconds:02}.{millis:03}")
    }
}

/// Parses `HH:MM:SS[.mmm]`, `MM:SS[.mmm]` or plain `SS[.mmm]`.
impl FromStr for Timecode {
    type Err = ClipperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ClipperError::invalid("empty timecode"));
        }

        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() > 3 {
            return Err(ClipperError::invalid(format!("malformed timecode `{s}`")));
        }

        let (whole, seconds) = parts.split_at(parts.len() - 1);
        let seconds: f64 = seconds[0]
            .parse()
            .map_err(|_| ClipperError::invalid(format!("malformed seconds in `{s}`")))?;
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(ClipperError::invalid(format!("negative timecode `{s}`")));
        }

        let out_of_range = || ClipperError::invalid(format!("timecode `{s}` is out of range"));
        if seconds > (u64::MAX / MILLIS_PER_SECOND) as f64 {
            return Err(out_of_range());
        }

        let mut millis = (seconds * MILLIS_PER_SECOND as f64).round() as u64;
        let units = [MILLIS_PER_MINUTE, MILLIS_PER_HOUR];
        for (part, unit) in whole.iter().rev().zip(units) {
            let value: u64 = part
                .parse()
                .map_err(|_| ClipperError::invalid(format!("malformed timecode `{s}`")))?;
            millis = value
                .checked_mul(unit)
                .and_then(|part| millis.checked_add(part))
                .ok_or_else(out_of_range)?;
        }

        Ok(Self(millis))
    }
}
