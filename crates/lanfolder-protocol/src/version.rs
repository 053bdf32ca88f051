//! File version tokens and their ordering.
//!
//! Versions travel as opaque text. Tokens made only of ASCII digits compare
//! numerically (so "10" is newer than "9") and sort before any other token;
//! other tokens compare lexicographically. Numeric ties with different
//! spelling ("02" vs "2") fall back to lexicographic order, which keeps the
//! order strict: two versions are equal only when their tokens are identical.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{ProtocolError, DELIMITER};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version(String);

impl Version {
    /// The version assigned to a path seen for the first time locally.
    pub fn initial() -> Self {
        Self("1".into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric value of the token, if it is made only of digits.
    pub fn numeric(&self) -> Option<u128> {
        if self.0.bytes().all(|b| b.is_ascii_digit()) {
            self.0.parse().ok()
        } else {
            None
        }
    }

    /// Smallest convenient version strictly newer than `self`.
    pub fn next(&self) -> Self {
        match self.numeric().and_then(|n| n.checked_add(1)) {
            Some(n) => Self(n.to_string()),
            None => Self(format!("{}.1", self.0)),
        }
    }

    /// Whether `self` should replace `other` under newer-wins.
    pub fn is_newer_than(&self, other: &Version) -> bool {
        self > other
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.numeric(), other.numeric()) {
            (Some(a), Some(b)) => a.cmp(&b).then_with(|| self.0.cmp(&other.0)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl TryFrom<String> for Version {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() || value.contains(DELIMITER) || value.trim() != value {
            return Err(ProtocolError::InvalidField {
                field: "ver",
                value,
            });
        }
        Ok(Self(value))
    }
}

impl FromStr for Version {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s.to_string())
    }
}

impl From<Version> for String {
    fn from(value: Version) -> Self {
        value.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    #[test]
    fn test_numeric_order_beats_lexicographic() {
        assert!(v("10").is_newer_than(&v("9")));
        assert!(v("2").is_newer_than(&v("1")));
        assert!(!v("1").is_newer_than(&v("2")));
    }

    #[test]
    fn test_equal_is_not_newer() {
        assert!(!v("2").is_newer_than(&v("2")));
        assert_eq!(v("2").cmp(&v("2")), Ordering::Equal);
    }

    #[test]
    fn test_non_numeric_sorts_after_numeric() {
        assert!(v("abc").is_newer_than(&v("999999")));
        assert!(v("b").is_newer_than(&v("a")));
    }

    #[test]
    fn test_spelling_tiebreak() {
        assert_ne!(v("02"), v("2"));
        assert!(v("2").is_newer_than(&v("02")));
    }

    #[test]
    fn test_next() {
        assert_eq!(v("9").next(), v("10"));
        assert_eq!(Version::initial().next(), v("2"));
        let tagged = v("rc");
        assert!(tagged.next().is_newer_than(&tagged));
    }

    #[test]
    fn test_rejects_bad_tokens() {
        assert!("".parse::<Version>().is_err());
        assert!("1;2".parse::<Version>().is_err());
        assert!(" 1".parse::<Version>().is_err());
    }

    #[test]
    fn test_serde_as_plain_string() {
        let json = serde_json::to_string(&v("7")).unwrap();
        assert_eq!(json, "\"7\"");
        let back: Version = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v("7"));
        assert!(serde_json::from_str::<Version>("\"\"").is_err());
    }

    fn token() -> impl Strategy<Value = Version> {
        prop_oneof![
            (0u64..1000).prop_map(|n| Version(n.to_string())),
            "0{0,2}[0-9]{1,3}".prop_map(Version),
            "[a-z0-9.]{1,6}".prop_map(Version),
        ]
    }

    proptest! {
        #[test]
        fn prop_order_is_antisymmetric(a in token(), b in token()) {
            let ab = a.cmp(&b);
            prop_assert_eq!(ab, b.cmp(&a).reverse());
            prop_assert_eq!(ab == Ordering::Equal, a == b);
        }

        #[test]
        fn prop_order_is_transitive(a in token(), b in token(), c in token()) {
            if a <= b && b <= c {
                prop_assert!(a <= c);
            }
        }

        #[test]
        fn prop_next_is_newer(a in token()) {
            prop_assert!(a.next().is_newer_than(&a));
        }

        #[test]
        fn prop_numbers_compare_numerically(x in 0u64..1_000_000, y in 0u64..1_000_000) {
            let (a, b) = (Version(x.to_string()), Version(y.to_string()));
            prop_assert_eq!(a.cmp(&b), x.cmp(&y));
        }
    }
}
