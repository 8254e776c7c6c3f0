//! Tokenized versions and the constraints used to select them from an index.
//!
//! A version is up to three numeric segments separated by `.`, optionally
//! followed by a qualifier introduced by `_`, `-`, or a fourth `.` segment
//! (`17.0.9`, `1.8.0_392`, `5.3.1.RELEASE`). Missing numeric segments compare
//! as zero. A version without a qualifier outranks the same numbers with one.

use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Wildcard token accepted at the end of a constraint.
pub const WILDCARD: char = '+';

const MAX_NUMERIC_SEGMENTS: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    raw: String,
    numbers: Vec<u64>,
    qualifier: Option<String>,
}

impl Version {
    pub fn parse(input: &str) -> Result<Self, SchemaError> {
        let raw = input.trim();
        if raw.is_empty() {
            return Err(invalid(input, "version must not be empty"));
        }
        if raw.contains(WILDCARD) {
            return Err(invalid(input, "wildcards are not allowed in a concrete version"));
        }

        let (numeric, mut qualifier) = match raw.find(['_', '-']) {
            Some(idx) => (&raw[..idx], Some(raw[idx + 1..].to_owned())),
            None => (raw, None),
        };

        let segments: Vec<&str> = numeric.split('.').collect();
        if segments.len() > MAX_NUMERIC_SEGMENTS {
            if qualifier.is_some() {
                return Err(invalid(input, "too many version components"));
            }
            qualifier = Some(segments[MAX_NUMERIC_SEGMENTS..].join("."));
        }

        let mut numbers = Vec::with_capacity(MAX_NUMERIC_SEGMENTS);
        for segment in segments.iter().take(MAX_NUMERIC_SEGMENTS) {
            numbers.push(parse_numeric(input, segment)?);
        }

        if let Some(q) = &qualifier {
            validate_qualifier(input, q)?;
        }

        Ok(Self {
            raw: raw.to_owned(),
            numbers,
            qualifier,
        })
    }

    /// Numeric segment at `index`, reading absent segments as zero.
    pub fn number(&self, index: usize) -> u64 {
        self.numbers.get(index).copied().unwrap_or(0)
    }

    pub fn qualifier(&self) -> Option<&str> {
        self.qualifier.as_deref()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

fn invalid(version: &str, reason: &str) -> SchemaError {
    SchemaError::InvalidVersion {
        version: version.to_owned(),
        reason: reason.to_owned(),
    }
}

fn parse_numeric(input: &str, segment: &str) -> Result<u64, SchemaError> {
    if segment.is_empty() {
        return Err(invalid(input, "missing version component"));
    }
    if !segment.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid(
            input,
            &format!("version component '{segment}' is not numeric"),
        ));
    }
    segment
        .parse::<u64>()
        .map_err(|_| invalid(input, &format!("version component '{segment}' is too large")))
}

fn validate_qualifier(input: &str, qualifier: &str) -> Result<(), SchemaError> {
    if qualifier.is_empty() {
        return Err(invalid(input, "qualifier must not be empty"));
    }
    if !qualifier
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_')
    {
        return Err(invalid(
            input,
            &format!("qualifier '{qualifier}' contains illegal characters"),
        ));
    }
    Ok(())
}

fn compare_qualifiers(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => leading_number(a)
            .cmp(&leading_number(b))
            .then_with(|| a.cmp(b)),
    }
}

fn leading_number(s: &str) -> u64 {
    let digits: String = s.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().unwrap_or(0)
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (0..MAX_NUMERIC_SEGMENTS)
            .map(|i| self.number(i).cmp(&other.number(i)))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
            .then_with(|| compare_qualifiers(self.qualifier(), other.qualifier()))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for Version {
    type Err = SchemaError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Version {
    type Error = SchemaError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.raw
    }
}

/// A version requirement: an exact version or a trailing-wildcard range.
///
/// `+` matches anything and `7.+` fixes the major version. `1.8.0_+` fixes
/// all three numeric segments and matches only versions carrying a qualifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionConstraint {
    raw: String,
    kind: ConstraintKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ConstraintKind {
    Exact(Version),
    Prefix(Vec<u64>),
    Qualified(Vec<u64>),
}

impl VersionConstraint {
    pub fn any() -> Self {
        Self {
            raw: WILDCARD.to_string(),
            kind: ConstraintKind::Prefix(Vec::new()),
        }
    }

    pub fn parse(input: &str) -> Result<Self, SchemaError> {
        let raw = input.trim();
        if raw.is_empty() {
            return Err(invalid(input, "constraint must not be empty"));
        }

        let kind = match raw.strip_suffix(WILDCARD) {
            None => ConstraintKind::Exact(Version::parse(raw)?),
            Some("") => ConstraintKind::Prefix(Vec::new()),
            Some(head) => {
                let (numbers, separator) = parse_prefix(input, head)?;
                if separator == '.' {
                    ConstraintKind::Prefix(numbers)
                } else {
                    ConstraintKind::Qualified(numbers)
                }
            }
        };

        Ok(Self {
            raw: raw.to_owned(),
            kind,
        })
    }

    pub fn is_wildcard(&self) -> bool {
        !matches!(self.kind, ConstraintKind::Exact(_))
    }

    pub fn matches(&self, version: &Version) -> bool {
        match &self.kind {
            ConstraintKind::Exact(exact) => exact == version,
            ConstraintKind::Prefix(prefix) => numbers_match(prefix, version),
            ConstraintKind::Qualified(numbers) => {
                version.qualifier().is_some() && numbers_match(numbers, version)
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

fn numbers_match(prefix: &[u64], version: &Version) -> bool {
    prefix
        .iter()
        .enumerate()
        .all(|(i, n)| version.number(i) == *n)
}

fn parse_prefix(input: &str, head: &str) -> Result<(Vec<u64>, char), SchemaError> {
    let (numeric, separator) = match head.chars().last() {
        Some(sep @ ('.' | '_' | '-')) => (&head[..head.len() - 1], sep),
        _ => {
            return Err(invalid(
                input,
                "a wildcard must form a whole version component",
            ))
        }
    };

    if numeric.is_empty() {
        return Err(invalid(input, "missing version component before wildcard"));
    }

    let segments: Vec<&str> = numeric.split('.').collect();
    if segments.len() > MAX_NUMERIC_SEGMENTS {
        return Err(invalid(input, "too many version components"));
    }
    if separator != '.' && segments.len() != MAX_NUMERIC_SEGMENTS {
        return Err(invalid(
            input,
            "a qualifier wildcard requires all three numeric components",
        ));
    }

    let numbers = segments
        .iter()
        .map(|segment| parse_numeric(input, segment))
        .collect::<Result<_, _>>()?;
    Ok((numbers, separator))
}

impl Default for VersionConstraint {
    fn default() -> Self {
        Self::any()
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for VersionConstraint {
    type Err = SchemaError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for VersionConstraint {
    type Error = SchemaError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<VersionConstraint> for String {
    fn from(c: VersionConstraint) -> Self {
        c.raw
    }
}
