use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// `{MAJOR, MINOR, PATCH}`. Parsing is lenient: `"2"` and `"2.1"` are
/// accepted with the missing components defaulting to zero, matching the
/// original registry's wire format (it only ever requires the parts a
/// caller bothered to specify).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Semver {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

/// Each component's upper bound: 10 bits, matching the original registry's
/// `strconv.ParseUint(sv, 10, 10)`.
const MAX_PART: u32 = 1023;

#[derive(Debug, thiserror::Error)]
pub enum SemverParseError {
    #[error("semver has too many dot-separated parts: {0:?}")]
    TooManyParts(Vec<String>),
    #[error("semver part is not a valid non-negative integer: {0}")]
    InvalidPart(String),
    #[error("semver part {0} exceeds the 10-bit maximum of {MAX_PART}")]
    PartOutOfRange(u32),
}

impl FromStr for Semver {
    type Err = SemverParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() > 3 {
            return Err(SemverParseError::TooManyParts(
                parts.into_iter().map(String::from).collect(),
            ));
        }

        let parse = |p: &str| -> Result<u32, SemverParseError> {
            let value: u32 = p
                .parse::<u32>()
                .map_err(|_| SemverParseError::InvalidPart(p.to_string()))?;
            if value > MAX_PART {
                return Err(SemverParseError::PartOutOfRange(value));
            }
            Ok(value)
        };

        let major = parse(parts.first().copied().unwrap_or("0"))?;
        let minor = match parts.get(1) {
            Some(p) => parse(p)?,
            None => 0,
        };
        let patch = match parts.get(2) {
            Some(p) => parse(p)?,
            None => 0,
        };

        Ok(Self { major, minor, patch })
    }
}

impl fmt::Display for Semver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_triple() {
        let v: Semver = "1.2.3".parse().unwrap();
        assert_eq!(v, Semver { major: 1, minor: 2, patch: 3 });
    }

    #[test]
    fn parses_major_only() {
        let v: Semver = "4".parse().unwrap();
        assert_eq!(v, Semver { major: 4, minor: 0, patch: 0 });
    }

    #[test]
    fn rejects_too_many_parts() {
        assert!("1.2.3.4".parse::<Semver>().is_err());
    }

    #[test]
    fn rejects_non_numeric_part() {
        assert!("1.x.3".parse::<Semver>().is_err());
    }

    #[test]
    fn rejects_part_wider_than_10_bits() {
        assert!("99999.0.0".parse::<Semver>().is_err());
        assert!("1024.0.0".parse::<Semver>().is_err());
    }

    #[test]
    fn accepts_max_10_bit_part() {
        let v: Semver = "1023.0.0".parse().unwrap();
        assert_eq!(v.major, 1023);
    }

    #[test]
    fn displays_as_dotted_triple() {
        let v = Semver { major: 1, minor: 0, patch: 0 };
        assert_eq!(v.to_string(), "1.0.0");
    }
}
