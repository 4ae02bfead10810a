use semver::{Version, VersionReq};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RangeError {
    #[error("version range is empty")]
    Empty,
    #[error("version range '{range}' has an empty alternative")]
    EmptyAlternative { range: String },
    #[error("invalid version range '{range}': {source}")]
    Invalid {
        range: String,
        #[source]
        source: semver::Error,
    },
}

/// A version range expression in npm style.
///
/// Supported forms:
///   ">=1.2.0 <2.0.0"       whitespace separated comparators
///   ">= 1.2.0, < 2.0.0"    comma separated, detached operators
///   "1.2.0 - 1.4.0"        hyphen range, inclusive on both ends
///   "^1.0.0 || ^2.0.0"     alternatives
///   "1.x", "~1.2", "*"     whatever `semver::VersionReq` accepts
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "String")]
pub struct VersionRange {
    raw: String,
    alternatives: Vec<VersionReq>,
}

impl VersionRange {
    pub fn parse(range: &str) -> Result<Self, RangeError> {
        let raw = range.trim();
        if raw.is_empty() {
            return Err(RangeError::Empty);
        }

        let alternatives = raw
            .split("||")
            .map(|alternative| {
                let normalized = normalize_comparators(alternative);
                if normalized.is_empty() {
                    return Err(RangeError::EmptyAlternative {
                        range: raw.to_string(),
                    });
                }
                VersionReq::parse(&normalized).map_err(|source| RangeError::Invalid {
                    range: raw.to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            raw: raw.to_string(),
            alternatives,
        })
    }

    /// True when any alternative accepts the version
    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|req| req.matches(version))
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for VersionRange {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for VersionRange {
    type Error = RangeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Rewrite one alternative into the comma separated form `VersionReq` parses.
///
/// Bare versions are exact matches (npm semantics), not caret requirements.
fn normalize_comparators(alternative: &str) -> String {
    let tokens: Vec<&str> = alternative
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .collect();

    if let [low, "-", high] = tokens.as_slice() {
        return format!(">={}, <={}", strip_v(low), strip_v(high));
    }

    let mut comparators: Vec<String> = Vec::with_capacity(tokens.len());
    let mut pending_op: Option<&str> = None;

    for token in tokens {
        let (op, version) = split_operator(token);
        if version.is_empty() {
            // Two operators in a row is malformed; keep both so parsing fails loudly
            if let Some(previous) = pending_op.replace(op) {
                comparators.push(previous.to_string());
            }
            continue;
        }

        let op = match pending_op.take() {
            Some(detached) if op.is_empty() => detached,
            Some(detached) => {
                comparators.push(detached.to_string());
                op
            },
            None => op,
        };
        comparators.push(comparator(op, strip_v(version)));
    }

    if let Some(op) = pending_op {
        comparators.push(op.to_string());
    }

    comparators.join(", ")
}

fn comparator(op: &str, version: &str) -> String {
    let core = version.split(['-', '+']).next().unwrap_or(version);
    let is_wildcard = core.contains(['*', 'x', 'X']);
    if op.is_empty() && !is_wildcard && version.starts_with(|c: char| c.is_ascii_digit()) {
        format!("={}", version)
    } else {
        format!("{}{}", op, version)
    }
}

fn split_operator(token: &str) -> (&str, &str) {
    let split = token
        .find(|c: char| !matches!(c, '<' | '>' | '=' | '~' | '^'))
        .unwrap_or(token.len());
    token.split_at(split)
}

fn strip_v(version: &str) -> &str {
    version
        .strip_prefix(['v', 'V'])
        .filter(|rest| rest.starts_with(|c: char| c.is_ascii_digit()))
        .unwrap_or(version)
}
