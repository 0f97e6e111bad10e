//! Various small helper functions

use std::num::ParseFloatError;
use std::time::{Duration, TryFromFloatSecsError};
use thiserror::Error;

/// Reasons why a string could not be turned into a timeout
#[derive(Error, Debug, PartialEq)]
pub enum SecondsParseError {
    /// Input is not a number
    #[error("not a number of seconds")]
    Malformed(#[from] ParseFloatError),
    /// Input is negative, infinite or too large to be represented
    #[error("number of seconds is out of range")]
    OutOfRange(#[from] TryFromFloatSecsError),
    /// Input is zero
    #[error("number of seconds has to be positive")]
    NotPositive,
}

/// Parses a Duration from a string containing (possibly fractional) seconds.
/// Useful for command line parsing
pub fn parse_seconds(src: &str) -> Result<Duration, SecondsParseError> {
    let seconds = src.trim().parse::<f64>()?;
    let duration = Duration::try_from_secs_f64(seconds)?;

    if duration.is_zero() {
        return Err(SecondsParseError::NotPositive);
    }

    Ok(duration)
}
