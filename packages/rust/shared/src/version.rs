//! OSGi-style versions and version ranges.
//!
//! Versions are `major.minor.micro.qualifier`; missing numeric parts default to
//! zero and the qualifier compares as a plain string. Ranges use interval
//! notation (`[1.0,2.0)`) or a bare version meaning "at least".

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{P2IndexError, Result};

// ---------------------------------------------------------------------------
// Version
// ---------------------------------------------------------------------------

/// A parsed OSGi version.
///
/// Field order matters: the derived `Ord` compares numerically first, then by
/// qualifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub micro: u64,
    pub qualifier: String,
}

impl Version {
    /// `0.0.0`, the lowest version.
    pub const fn zero() -> Self {
        Self {
            major: 0,
            minor: 0,
            micro: 0,
            qualifier: String::new(),
        }
    }

    pub fn new(major: u64, minor: u64, micro: u64) -> Self {
        Self {
            major,
            minor,
            micro,
            qualifier: String::new(),
        }
    }

    /// Parse a version string. An empty string yields `0.0.0`.
    pub fn parse(input: &str) -> Result<Self> {
        let s = input.trim();
        if s.is_empty() {
            return Ok(Self::zero());
        }

        let mut parts = s.splitn(4, '.');
        let mut numbers = [0u64; 3];
        for (i, slot) in numbers.iter_mut().enumerate() {
            match parts.next() {
                Some(part) => {
                    *slot = part.parse().map_err(|_| {
                        P2IndexError::parse(format!(
                            "invalid version '{input}': component {} is not a number",
                            i + 1
                        ))
                    })?;
                }
                None => break,
            }
        }

        let qualifier = parts.next().unwrap_or("").to_string();
        if !qualifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(P2IndexError::parse(format!(
                "invalid version '{input}': bad qualifier '{qualifier}'"
            )));
        }

        Ok(Self {
            major: numbers[0],
            minor: numbers[1],
            micro: numbers[2],
            qualifier,
        })
    }

    /// The same version without its qualifier.
    pub fn without_qualifier(&self) -> Self {
        Self::new(self.major, self.minor, self.micro)
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::zero()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.micro)?;
        if !self.qualifier.is_empty() {
            write!(f, ".{}", self.qualifier)?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = P2IndexError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Version {
    type Error = P2IndexError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Version> for String {
    fn from(value: Version) -> Self {
        value.to_string()
    }
}

// ---------------------------------------------------------------------------
// VersionRange
// ---------------------------------------------------------------------------

/// A version interval. `high == None` means unbounded above.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionRange {
    pub low: Version,
    pub low_inclusive: bool,
    pub high: Option<Version>,
    pub high_inclusive: bool,
}

impl VersionRange {
    /// `[low, ∞)`.
    pub fn at_least(low: Version) -> Self {
        Self {
            low,
            low_inclusive: true,
            high: None,
            high_inclusive: false,
        }
    }

    /// `[low, high)`.
    pub fn half_open(low: Version, high: Version) -> Self {
        Self {
            low,
            low_inclusive: true,
            high: Some(high),
            high_inclusive: false,
        }
    }

    /// `[version, version]`.
    pub fn exact(version: Version) -> Self {
        Self {
            low: version.clone(),
            low_inclusive: true,
            high: Some(version),
            high_inclusive: true,
        }
    }

    /// Parse `[a,b)`, `(a,b]`, `[a,b]`, `(a,b)` or a bare version `a`.
    pub fn parse(input: &str) -> Result<Self> {
        let s = input.trim();
        let bad = || P2IndexError::parse(format!("invalid version range '{input}'"));

        let Some(first) = s.chars().next() else {
            return Ok(Self::at_least(Version::zero()));
        };

        if first != '[' && first != '(' {
            return Ok(Self::at_least(Version::parse(s)?));
        }

        let last = s.chars().last().ok_or_else(bad)?;
        if s.len() < 2 || (last != ']' && last != ')') {
            return Err(bad());
        }

        let inner = &s[1..s.len() - 1];
        let (low, high) = inner.split_once(',').ok_or_else(bad)?;
        let range = Self {
            low: Version::parse(low)?,
            low_inclusive: first == '[',
            high: Some(Version::parse(high)?),
            high_inclusive: last == ']',
        };

        if range.is_empty() {
            return Err(P2IndexError::parse(format!("empty version range '{input}'")));
        }
        Ok(range)
    }

    /// Whether the range admits no version at all.
    pub fn is_empty(&self) -> bool {
        match &self.high {
            None => false,
            Some(high) => {
                high < &self.low
                    || (high == &self.low && !(self.low_inclusive && self.high_inclusive))
            }
        }
    }

    /// Whether this range is `[0.0.0, ∞)`, i.e. no constraint.
    pub fn is_unbounded(&self) -> bool {
        self.low.is_zero() && self.low_inclusive && self.high.is_none()
    }

    pub fn includes(&self, version: &Version) -> bool {
        let above_low = if self.low_inclusive {
            version >= &self.low
        } else {
            version > &self.low
        };
        let below_high = match &self.high {
            None => true,
            Some(high) if self.high_inclusive => version <= high,
            Some(high) => version < high,
        };
        above_low && below_high
    }

    /// Render as an LDAP filter over `attr`.
    pub fn to_filter(&self, attr: &str) -> String {
        let Some(high) = &self.high else {
            return format!("({attr}>={})", self.low);
        };

        if self.low_inclusive && self.high_inclusive && high == &self.low {
            return format!("({attr}={})", self.low);
        }

        let low = if self.low_inclusive {
            format!("({attr}>={})", self.low)
        } else {
            format!("(!({attr}<={}))", self.low)
        };
        let high = if self.high_inclusive {
            format!("({attr}<={high})")
        } else {
            format!("(!({attr}>={high}))")
        };
        format!("(&{low}{high})")
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.high {
            None if self.low_inclusive => write!(f, "{}", self.low),
            None => write!(f, "({},)", self.low),
            Some(high) => write!(
                f,
                "{}{},{}{}",
                if self.low_inclusive { '[' } else { '(' },
                self.low,
                high,
                if self.high_inclusive { ']' } else { ')' }
            ),
        }
    }
}

impl FromStr for VersionRange {
    type Err = P2IndexError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn parse_fills_missing_components() {
        assert_eq!(v("1"), Version::new(1, 0, 0));
        assert_eq!(v("1.2"), Version::new(1, 2, 0));
        assert_eq!(v(""), Version::zero());
        let q = v("1.2.3.v20251201-1234");
        assert_eq!(q.qualifier, "v20251201-1234");
        assert_eq!(q.to_string(), "1.2.3.v20251201-1234");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Version::parse("1.x.0").is_err());
        assert!(Version::parse("1.0.0.bad qualifier").is_err());
    }

    #[test]
    fn ordering_is_numeric_then_qualifier() {
        assert!(v("1.10.0") > v("1.9.0"));
        assert!(v("1.0.0.b") > v("1.0.0.a"));
        assert!(v("1.0.0.a") > v("1.0.0"));
    }

    #[test]
    fn serde_uses_string_form() {
        let json = serde_json::to_string(&v("4.38.0.I2025")).unwrap();
        assert_eq!(json, "\"4.38.0.I2025\"");
        let back: Version = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v("4.38.0.I2025"));
    }

    #[test]
    fn range_parse_and_includes() {
        let r = VersionRange::parse("[1.2.0,1.3.0)").unwrap();
        assert!(r.includes(&v("1.2.0")));
        assert!(r.includes(&v("1.2.9.q")));
        assert!(!r.includes(&v("1.3.0")));

        let bare = VersionRange::parse("2.0").unwrap();
        assert!(bare.includes(&v("7.0")));
        assert!(!bare.includes(&v("1.9")));

        assert!(VersionRange::parse("[2.0,1.0]").is_err());
        assert!(VersionRange::parse("[1.0").is_err());
    }

    #[test]
    fn range_filters() {
        assert_eq!(
            VersionRange::parse("[1.2.0,1.3.0)").unwrap().to_filter("version"),
            "(&(version>=1.2.0)(!(version>=1.3.0)))"
        );
        assert_eq!(
            VersionRange::parse("[4.38.0,4.38.0]").unwrap().to_filter("version"),
            "(version=4.38.0)"
        );
        assert_eq!(
            VersionRange::parse("(1.0,2.0]").unwrap().to_filter("version"),
            "(&(!(version<=1.0.0))(version<=2.0.0))"
        );
        assert_eq!(
            VersionRange::parse("3.1").unwrap().to_filter("version"),
            "(version>=3.1.0)"
        );
    }

    #[test]
    fn unbounded_detection() {
        assert!(VersionRange::parse("0.0.0").unwrap().is_unbounded());
        assert!(!VersionRange::parse("[0.0.0,1.0.0)").unwrap().is_unbounded());
    }
}
