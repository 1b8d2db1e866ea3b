//! Execution points.
//!
//! Every piece of recorded data is indexed by an execution point: an
//! unbounded, non-negative integer transported as a decimal string.
//! Recordings can exceed 2^63 distinct points, so points are never parsed
//! into a native integer. Ordering compares magnitudes: first the number of
//! significant digits, then the digits themselves.

use crate::*;
use std::cmp::Ordering;
use std::sync::Arc;

/// A position on the recorded timeline.
///
/// Internally this is the canonical decimal representation (no leading
/// zeros, `"0"` for zero), so equality of the string is equality of the
/// magnitude.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ExecutionPoint(Arc<str>);

impl ExecutionPoint {
    /// The zero point, the start of every recording.
    pub fn zero() -> Self {
        Self(Arc::from("0"))
    }

    /// Parse a decimal string into an execution point.
    ///
    /// Leading zeros are accepted and stripped. Empty strings and any
    /// non-digit characters are rejected.
    pub fn parse(s: &str) -> ReplayResult<Self> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ReplayError::invariant(format!(
                "invalid execution point {s:?}"
            )));
        }
        let trimmed = s.trim_start_matches('0');
        if trimmed.is_empty() {
            Ok(Self::zero())
        } else {
            Ok(Self(Arc::from(trimmed)))
        }
    }

    /// The canonical decimal representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The point immediately after this one.
    pub fn successor(&self) -> Self {
        let mut digits = self.0.as_bytes().to_vec();
        let mut i = digits.len();
        loop {
            if i == 0 {
                // every digit carried
                digits.insert(0, b'1');
                break;
            }
            i -= 1;
            if digits[i] == b'9' {
                digits[i] = b'0';
            } else {
                digits[i] += 1;
                break;
            }
        }
        // only ascii digits were written
        Self(Arc::from(String::from_utf8_lossy(&digits).as_ref()))
    }

    /// Three-way comparison by numeric magnitude.
    pub fn compare(&self, other: &Self) -> Ordering {
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.as_bytes().cmp(other.0.as_bytes()))
    }
}

impl Ord for ExecutionPoint {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl PartialOrd for ExecutionPoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Debug for ExecutionPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for ExecutionPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ExecutionPoint {
    type Err = ReplayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<u64> for ExecutionPoint {
    fn from(value: u64) -> Self {
        Self(Arc::from(value.to_string()))
    }
}

impl From<u128> for ExecutionPoint {
    fn from(value: u128) -> Self {
        Self(Arc::from(value.to_string()))
    }
}

impl serde::Serialize for ExecutionPoint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for ExecutionPoint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s: std::borrow::Cow<'de, str> =
            serde::Deserialize::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
