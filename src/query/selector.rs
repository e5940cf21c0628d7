//! Label selectors: comma-joined requirements, all of which must hold.
//!
//! Supported forms: `key`, `!key`, `key=value`, `key==value`, `key!=value`,
//! `key in (a,b)`, `key notin (a,b)`.

use crate::error::AppError;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

const KEY: &str = r"[A-Za-z0-9]([-A-Za-z0-9_./]*[A-Za-z0-9])?";

fn set_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(&format!(r"^({})\s+(in|notin)\s*\((.*)\)$", KEY)).expect("static regex"))
}

fn key_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(&format!("^{}$", KEY)).expect("static regex"))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    In(String, BTreeSet<String>),
    NotIn(String, BTreeSet<String>),
    Exists(String),
    NotExists(String),
}

impl Requirement {
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Requirement::Equals(k, v) => labels.get(k) == Some(v),
            Requirement::NotEquals(k, v) => labels.get(k) != Some(v),
            Requirement::In(k, vs) => labels.get(k).map(|v| vs.contains(v)).unwrap_or(false),
            Requirement::NotIn(k, vs) => labels.get(k).map(|v| !vs.contains(v)).unwrap_or(true),
            Requirement::Exists(k) => labels.contains_key(k),
            Requirement::NotExists(k) => !labels.contains_key(k),
        }
    }

    fn parse(raw: &str) -> Result<Self, AppError> {
        let raw = raw.trim();
        if let Some(caps) = set_pattern().captures(raw) {
            let key = caps[1].to_string();
            let values = parse_values(&caps[4])?;
            return Ok(if &caps[3] == "in" {
                Requirement::In(key, values)
            } else {
                Requirement::NotIn(key, values)
            });
        }
        if let Some(key) = raw.strip_prefix('!') {
            return Ok(Requirement::NotExists(checked_key(key.trim())?));
        }
        if let Some((k, v)) = raw.split_once("!=") {
            return Ok(Requirement::NotEquals(checked_key(k.trim())?, checked_value(v.trim())?));
        }
        if let Some((k, v)) = raw.split_once("==").or_else(|| raw.split_once('=')) {
            return Ok(Requirement::Equals(checked_key(k.trim())?, checked_value(v.trim())?));
        }
        Ok(Requirement::Exists(checked_key(raw)?))
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |vs: &BTreeSet<String>| vs.iter().cloned().collect::<Vec<_>>().join(",");
        match self {
            Requirement::Equals(k, v) => write!(f, "{}={}", k, v),
            Requirement::NotEquals(k, v) => write!(f, "{}!={}", k, v),
            Requirement::In(k, vs) => write!(f, "{} in ({})", k, join(vs)),
            Requirement::NotIn(k, vs) => write!(f, "{} notin ({})", k, join(vs)),
            Requirement::Exists(k) => write!(f, "{}", k),
            Requirement::NotExists(k) => write!(f, "!{}", k),
        }
    }
}

fn malformed(reason: impl Into<String>) -> AppError {
    AppError::invalid_query("labelSelector", reason)
}

fn checked_key(key: &str) -> Result<String, AppError> {
    if key_pattern().is_match(key) {
        Ok(key.to_string())
    } else {
        Err(malformed(format!("invalid label key '{}'", key)))
    }
}

fn checked_value(value: &str) -> Result<String, AppError> {
    if value.is_empty() || key_pattern().is_match(value) {
        Ok(value.to_string())
    } else {
        Err(malformed(format!("invalid label value '{}'", value)))
    }
}

fn parse_values(raw: &str) -> Result<BTreeSet<String>, AppError> {
    let values = raw
        .split(',')
        .map(|v| checked_value(v.trim()))
        .collect::<Result<BTreeSet<_>, _>>()?;
    if values.iter().all(String::is_empty) {
        return Err(malformed("set requirement needs at least one value"));
    }
    Ok(values)
}

/// Split on commas that are not inside a parenthesised value set.
fn split_requirements(raw: &str) -> Result<Vec<&str>, AppError> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in raw.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| malformed("unbalanced parenthesis"))?;
            }
            ',' if depth == 0 => {
                parts.push(&raw[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(malformed("unbalanced parenthesis"));
    }
    parts.push(&raw[start..]);
    Ok(parts)
}

/// Conjunction of requirements. The empty selector matches everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    pub fn everything() -> Self {
        Selector::default()
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl FromStr for Selector {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Ok(Selector::everything());
        }
        let requirements = split_requirements(s)?
            .into_iter()
            .map(|part| {
                if part.trim().is_empty() {
                    Err(malformed("empty requirement"))
                } else {
                    Requirement::parse(part)
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Selector { requirements })
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.requirements.iter().map(|r| r.to_string()).collect();
        f.write_str(&parts.join(","))
    }
}
