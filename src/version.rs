//! Package versions and version ranges.
//!
//! Versions have one to four numeric parts, an optional `-prerelease` label and
//! ignored `+metadata`. A prerelease sorts before its release. Ranges accept a
//! bare minimum (`1.0.0` means `>= 1.0.0`), exact `[1.0.0]`, interval notation
//! (`[1.0,2.0)`, `(,3.0]`), comparator sets (`>=1.0.0 <2.0.0`) and `*`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::error::VersionError;

#[derive(Debug, Clone)]
pub struct Version {
    parts: [u64; 4],
    /// Number of numeric parts as written, for display.
    len: usize,
    pre: Vec<String>,
}

impl Version {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            parts: [major, minor, patch, 0],
            len: 3,
            pre: Vec::new(),
        }
    }

    pub fn parse(text: &str) -> Result<Self, VersionError> {
        let invalid = || VersionError::InvalidVersion(text.to_string());
        let trimmed = text.trim();
        let core = trimmed.split('+').next().unwrap_or_default();
        let (numbers, pre) = match core.split_once('-') {
            Some((numbers, pre)) => (numbers, Some(pre)),
            None => (core, None),
        };

        let mut parts = [0u64; 4];
        let mut len = 0;
        for piece in numbers.split('.') {
            if len == 4 || piece.is_empty() || !piece.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            parts[len] = piece.parse().map_err(|_| invalid())?;
            len += 1;
        }

        let pre = match pre {
            Some(label) => {
                let ids: Vec<String> = label.split('.').map(str::to_string).collect();
                let valid = ids.iter().all(|id| {
                    !id.is_empty() && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
                });
                if !valid {
                    return Err(invalid());
                }
                ids
            }
            None => Vec::new(),
        };

        Ok(Self { parts, len, pre })
    }

    pub fn is_prerelease(&self) -> bool {
        !self.pre.is_empty()
    }

    /// Lowercase normalized text, as used in registry URLs.
    pub fn normalized(&self) -> String {
        self.to_string().to_ascii_lowercase()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self.len.max(3);
        let numbers: Vec<String> = self.parts[..len].iter().map(u64::to_string).collect();
        write!(f, "{}", numbers.join("."))?;
        if !self.pre.is_empty() {
            write!(f, "-{}", self.pre.join("."))?;
        }
        Ok(())
    }
}

fn compare_pre_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.to_ascii_lowercase().cmp(&b.to_ascii_lowercase()),
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parts.cmp(&other.parts).then_with(|| {
            match (self.pre.is_empty(), other.pre.is_empty()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => {
                    for (a, b) in self.pre.iter().zip(other.pre.iter()) {
                        let ord = compare_pre_ids(a, b);
                        if ord != Ordering::Equal {
                            return ord;
                        }
                    }
                    self.pre.len().cmp(&other.pre.len())
                }
            }
        })
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.parts.hash(state);
        for id in &self.pre {
            id.to_ascii_lowercase().hash(state);
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Version::parse(&text).map_err(serde::de::Error::custom)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RANGES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bound {
    pub version: Version,
    pub inclusive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    pub min: Option<Bound>,
    pub max: Option<Bound>,
    text: String,
}

impl VersionRange {
    pub fn any() -> Self {
        Self {
            min: None,
            max: None,
            text: "*".to_string(),
        }
    }

    /// `>= version`
    pub fn at_least(version: Version) -> Self {
        Self {
            text: version.to_string(),
            min: Some(Bound {
                version,
                inclusive: true,
            }),
            max: None,
        }
    }

    pub fn exact(version: Version) -> Self {
        Self {
            text: format!("[{}]", version),
            min: Some(Bound {
                version: version.clone(),
                inclusive: true,
            }),
            max: Some(Bound {
                version,
                inclusive: true,
            }),
        }
    }

    pub fn parse(text: &str) -> Result<Self, VersionError> {
        let invalid = || VersionError::InvalidRange(text.to_string());
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(invalid());
        }
        if trimmed == "*" {
            return Ok(Self::any());
        }

        let mut range = if trimmed.starts_with('[') || trimmed.starts_with('(') {
            Self::parse_interval(trimmed).ok_or_else(invalid)?
        } else if trimmed.starts_with(['>', '<', '=']) {
            Self::parse_comparators(trimmed).ok_or_else(invalid)?
        } else {
            Self::at_least(Version::parse(trimmed).map_err(|_| invalid())?)
        };

        if let (Some(min), Some(max)) = (&range.min, &range.max) {
            let empty = match min.version.cmp(&max.version) {
                Ordering::Greater => true,
                Ordering::Equal => !(min.inclusive && max.inclusive),
                Ordering::Less => false,
            };
            if empty {
                return Err(invalid());
            }
        }
        range.text = trimmed.to_string();
        Ok(range)
    }

    fn parse_interval(text: &str) -> Option<Self> {
        let open_inclusive = text.starts_with('[');
        let close_inclusive = text.ends_with(']');
        if !(close_inclusive || text.ends_with(')')) || text.len() < 2 {
            return None;
        }
        let inner = &text[1..text.len() - 1];

        let bound = |s: &str, inclusive: bool| -> Option<Option<Bound>> {
            let s = s.trim();
            if s.is_empty() {
                return Some(None);
            }
            Version::parse(s).ok().map(|version| Some(Bound { version, inclusive }))
        };

        match inner.split_once(',') {
            Some((lo, hi)) => {
                let min = bound(lo, open_inclusive)?;
                let max = bound(hi, close_inclusive)?;
                if min.is_none() && max.is_none() {
                    return None;
                }
                Some(Self {
                    min,
                    max,
                    text: String::new(),
                })
            }
            // `[1.0]` is exact; `(1.0)` means nothing.
            None if open_inclusive && close_inclusive => {
                let version = Version::parse(inner.trim()).ok()?;
                Some(Self::exact(version))
            }
            None => None,
        }
    }

    fn parse_comparators(text: &str) -> Option<Self> {
        let mut min: Option<Bound> = None;
        let mut max: Option<Bound> = None;
        for token in text.split_whitespace() {
            let (op, rest) = if let Some(rest) = token.strip_prefix(">=") {
                (">=", rest)
            } else if let Some(rest) = token.strip_prefix("<=") {
                ("<=", rest)
            } else if let Some(rest) = token.strip_prefix('>') {
                (">", rest)
            } else if let Some(rest) = token.strip_prefix('<') {
                ("<", rest)
            } else if let Some(rest) = token.strip_prefix('=') {
                ("=", rest)
            } else {
                return None;
            };
            let version = Version::parse(rest).ok()?;
            match op {
                ">=" | ">" => {
                    min = Some(Bound {
                        version,
                        inclusive: op == ">=",
                    })
                }
                "<=" | "<" => {
                    max = Some(Bound {
                        version,
                        inclusive: op == "<=",
                    })
                }
                _ => {
                    min = Some(Bound {
                        version: version.clone(),
                        inclusive: true,
                    });
                    max = Some(Bound {
                        version,
                        inclusive: true,
                    });
                }
            }
        }
        Some(Self {
            min,
            max,
            text: String::new(),
        })
    }

    pub fn satisfies(&self, version: &Version) -> bool {
        if version.is_prerelease() && !self.allows_prerelease() {
            return false;
        }
        let above_min = match &self.min {
            Some(b) if b.inclusive => *version >= b.version,
            Some(b) => *version > b.version,
            None => true,
        };
        let below_max = match &self.max {
            Some(b) if b.inclusive => *version <= b.version,
            Some(b) => *version < b.version,
            None => true,
        };
        above_min && below_max
    }

    /// Prereleases are only considered when the lower bound is itself a prerelease.
    pub fn allows_prerelease(&self) -> bool {
        self.min
            .as_ref()
            .map(|b| b.version.is_prerelease())
            .unwrap_or(false)
    }

    /// The lowest of `candidates` that satisfies the range.
    pub fn find_lowest<'a>(&self, candidates: impl IntoIterator<Item = &'a Version>) -> Option<&'a Version> {
        candidates.into_iter().filter(|v| self.satisfies(v)).min()
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl FromStr for VersionRange {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VersionRange::parse(s)
    }
}

impl Serialize for VersionRange {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VersionRange {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        VersionRange::parse(&text).map_err(serde::de::Error::custom)
    }
}
