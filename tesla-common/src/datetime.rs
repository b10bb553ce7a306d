//! Duration helpers for display and configuration.

/// Format and parse durations as `HH:MM:SS` strings.
pub mod duration {
    use std::time::Duration;
    use thiserror::Error;

    /// Create a new Duration from minutes.
    #[must_use]
    pub const fn minutes(minutes: u64) -> Duration {
        Duration::from_secs(minutes * 60)
    }

    /// Create a new Duration from seconds.
    #[must_use]
    pub const fn seconds(seconds: u64) -> Duration {
        Duration::from_secs(seconds)
    }

    const fn div_rem_u64(a: u64, b: u64) -> (u64, u64) {
        (a / b, a % b)
    }

    /// Convert a duration to a `HH:MM:SS` string.
    #[must_use]
    pub fn to_string(duration: &Duration) -> String {
        let (minutes, seconds) = div_rem_u64(duration.as_secs(), 60);
        let (hours, minutes) = div_rem_u64(minutes, 60);
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    }

    /// An error that can occur when parsing a duration.
    #[derive(Error, Debug)]
    pub enum ParseError {
        /// The string is not in `HH:MM:SS` or `MM:SS` form.
        #[error("Invalid duration: {0}")]
        InvalidDuration(String),
    }

    /// Parse a `HH:MM:SS` or `MM:SS` string into a duration.
    ///
    /// # Errors
    ///
    /// If the string is not in `HH:MM:SS` or `MM:SS` form.
    pub fn from_str(s: &str) -> Result<Duration, ParseError> {
        let invalid = || ParseError::InvalidDuration(s.to_string());

        let parts: Vec<u64> = s
            .split(':')
            .map(str::parse)
            .collect::<Result<_, _>>()
            .map_err(|_| invalid())?;

        let seconds = match parts[..] {
            [hours, minutes, seconds] => (hours * 60 + minutes) * 60 + seconds,
            [minutes, seconds] => minutes * 60 + seconds,
            _ => return Err(invalid()),
        };

        Ok(Duration::from_secs(seconds))
    }
}

/// Serde serialization deserialization for a duration.
pub mod with_duration {
    use serde::{Deserialize, Deserializer, Serializer};

    /// Deserialize a duration.
    ///
    /// # Errors
    ///
    /// If the duration is invalid.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<std::time::Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        let d = super::duration::from_str(&s)
            .map_err(|_| serde::de::Error::custom(format!("Invalid duration {s}")))?;
        Ok(d)
    }

    /// Serialize a duration.
    ///
    /// # Errors
    ///
    /// If the duration is invalid.
    pub fn serialize<S>(duration: &std::time::Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = super::duration::to_string(duration);
        serializer.serialize_str(&s)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::time::Duration;

    use super::*;

    #[test]
    fn test_duration_to_string() {
        assert_eq!(duration::to_string(&Duration::from_secs(0)), "00:00:00");
        assert_eq!(duration::to_string(&Duration::from_secs(661)), "00:11:01");
        assert_eq!(duration::to_string(&Duration::from_secs(3661)), "01:01:01");
    }

    #[test]
    fn test_duration_from_str() {
        assert_eq!(
            duration::from_str("00:05:00").unwrap(),
            Duration::from_secs(300)
        );
        assert_eq!(duration::from_str("11:01").unwrap(), Duration::from_secs(661));
        duration::from_str("five minutes").unwrap_err();
        duration::from_str("1:2:3:4").unwrap_err();
    }
}
