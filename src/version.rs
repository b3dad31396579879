//! Runtime version ordering and version constraints.
//!
//! Ordering follows the package manager's rules: versions split into
//! dot-separated components, each a run of numeric and alphabetic parts.
//! Within a component `dev` sorts lowest, then other strings
//! alphabetically, then numbers, then `post`. Missing parts pad as `0`, so
//! `1.0` and `1.0.0` are equal. An optional `N!` epoch and `+local`
//! suffix are supported.

use std::cmp::Ordering;
use std::fmt;

use thiserror::Error;

/// A string that does not parse as a version or version constraint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid version `{0}`")]
pub struct InvalidVersion(pub String);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Part {
    Dev,
    Str(String),
    Num(u64),
    Post,
}

const ZERO: Part = Part::Num(0);

/// A parsed, totally ordered version.
#[derive(Debug, Clone)]
pub struct Version {
    raw: String,
    epoch: u64,
    release: Vec<Vec<Part>>,
    local: Vec<Vec<Part>>,
}

impl Version {
    /// Parses a version string.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidVersion`] for empty strings, malformed epochs, and
    /// strings containing characters other than alphanumerics and `._-+!`.
    pub fn parse(raw: &str) -> Result<Self, InvalidVersion> {
        let invalid = || InvalidVersion(raw.to_string());
        let trimmed = raw.trim();
        if trimmed.is_empty()
            || !trimmed.chars().all(|c| c.is_ascii_alphanumeric() || "._-+!".contains(c))
        {
            return Err(invalid());
        }
        let lower = trimmed.to_ascii_lowercase();

        let (epoch, rest) = match lower.split_once('!') {
            Some((e, rest)) => (e.parse::<u64>().map_err(|_| invalid())?, rest),
            None => (0, lower.as_str()),
        };
        let (release, local) = match rest.split_once('+') {
            Some((r, l)) => (r, l),
            None => (rest, ""),
        };
        if release.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            raw: trimmed.to_string(),
            epoch,
            release: split_components(release),
            local: if local.is_empty() { Vec::new() } else { split_components(local) },
        })
    }

    /// The version string as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether the release components start with every component of `prefix`.
    fn starts_with(&self, prefix: &Version) -> bool {
        self.epoch == prefix.epoch
            && prefix.release.len() <= self.release.len()
            && prefix
                .release
                .iter()
                .zip(&self.release)
                .all(|(p, c)| cmp_component(p, c) == Ordering::Equal)
    }
}

fn split_components(s: &str) -> Vec<Vec<Part>> {
    s.split(['.', '-', '_']).filter(|c| !c.is_empty()).map(split_parts).collect()
}

fn split_parts(component: &str) -> Vec<Part> {
    let mut parts = Vec::new();
    let mut chars = component.chars().peekable();
    while let Some(&first) = chars.peek() {
        let digit = first.is_ascii_digit();
        let mut run = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_ascii_digit() != digit {
                break;
            }
            run.push(c);
            chars.next();
        }
        let part = if digit {
            run.parse::<u64>().map_or(Part::Str(run), Part::Num)
        } else {
            match run.as_str() {
                "dev" => Part::Dev,
                "post" => Part::Post,
                _ => Part::Str(run),
            }
        };
        parts.push(part);
    }
    if !matches!(parts.first(), Some(Part::Num(_))) {
        parts.insert(0, ZERO);
    }
    parts
}

fn cmp_component(a: &[Part], b: &[Part]) -> Ordering {
    let len = a.len().max(b.len());
    (0..len)
        .map(|i| a.get(i).unwrap_or(&ZERO).cmp(b.get(i).unwrap_or(&ZERO)))
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
}

fn cmp_components(a: &[Vec<Part>], b: &[Vec<Part>]) -> Ordering {
    let zero = vec![ZERO];
    let len = a.len().max(b.len());
    (0..len)
        .map(|i| cmp_component(a.get(i).unwrap_or(&zero), b.get(i).unwrap_or(&zero)))
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| cmp_components(&self.release, &other.release))
            .then_with(|| cmp_components(&self.local, &other.local))
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

/// Compares two version strings, falling back to string order when either
/// side does not parse.
#[must_use]
pub fn compare(a: &str, b: &str) -> Ordering {
    match (Version::parse(a), Version::parse(b)) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Ge,
    Gt,
    Le,
    Lt,
    Prefix,
    NotPrefix,
}

#[derive(Debug, Clone)]
enum Constraint {
    Any,
    Cmp(Op, Version),
}

/// How a version fails a constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    /// The version is below the allowed range.
    TooLow,
    /// The version is above the allowed range.
    TooHigh,
    /// The version is explicitly excluded.
    Excluded,
}

impl Constraint {
    fn violation(&self, v: &Version) -> Option<Violation> {
        let Constraint::Cmp(op, bound) = self else {
            return None;
        };
        let ord = v.cmp(bound);
        match op {
            Op::Eq => match ord {
                Ordering::Less => Some(Violation::TooLow),
                Ordering::Greater => Some(Violation::TooHigh),
                Ordering::Equal => None,
            },
            Op::Ne => (ord == Ordering::Equal).then_some(Violation::Excluded),
            Op::Ge => (ord == Ordering::Less).then_some(Violation::TooLow),
            Op::Gt => (ord != Ordering::Greater).then_some(Violation::TooLow),
            Op::Le => (ord == Ordering::Greater).then_some(Violation::TooHigh),
            Op::Lt => (ord != Ordering::Less).then_some(Violation::TooHigh),
            Op::Prefix if v.starts_with(bound) => None,
            Op::Prefix => {
                Some(if ord == Ordering::Less { Violation::TooLow } else { Violation::TooHigh })
            }
            Op::NotPrefix => v.starts_with(bound).then_some(Violation::Excluded),
        }
    }
}

/// A version constraint: `|`-separated alternatives of `,`-separated
/// conjunctions.
#[derive(Debug, Clone)]
pub struct VersionSpec {
    raw: String,
    alternatives: Vec<Vec<Constraint>>,
}

impl VersionSpec {
    /// Parses a constraint such as `>=1.2,<2`, `1.21.*`, `=1.2`, or `~=2.0`.
    ///
    /// A bare version without an operator is an exact match; `=X` and `X.*`
    /// are prefix matches.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidVersion`] if any clause has an unparseable version.
    pub fn parse(raw: &str) -> Result<Self, InvalidVersion> {
        let mut alternatives = Vec::new();
        for alt in raw.split('|') {
            let mut clauses = Vec::new();
            for clause in alt.split(',') {
                let clause: String = clause.chars().filter(|c| !c.is_whitespace()).collect();
                if clause.is_empty() {
                    return Err(InvalidVersion(raw.to_string()));
                }
                parse_clause(&clause, &mut clauses)
                    .map_err(|_| InvalidVersion(raw.to_string()))?;
            }
            alternatives.push(clauses);
        }
        Ok(Self { raw: raw.trim().to_string(), alternatives })
    }

    /// Returns `true` if `version` satisfies the constraint.
    #[must_use]
    pub fn matches(&self, version: &Version) -> bool {
        self.violation(version).is_none()
    }

    /// Returns how `version` fails the constraint, or `None` if it satisfies it.
    ///
    /// For alternatives, the first alternative's violation is reported.
    #[must_use]
    pub fn violation(&self, version: &Version) -> Option<Violation> {
        let mut first = None;
        for alt in &self.alternatives {
            match alt.iter().find_map(|c| c.violation(version)) {
                None => return None,
                Some(v) => {
                    first.get_or_insert(v);
                }
            }
        }
        first
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn parse_clause(clause: &str, out: &mut Vec<Constraint>) -> Result<(), InvalidVersion> {
    if clause == "*" {
        out.push(Constraint::Any);
        return Ok(());
    }
    if let Some(rest) = clause.strip_prefix("~=") {
        let lower = Version::parse(rest)?;
        let mut prefix_parts: Vec<&str> = rest.split('.').collect();
        if prefix_parts.len() > 1 {
            prefix_parts.pop();
        }
        out.push(Constraint::Cmp(Op::Ge, lower));
        out.push(Constraint::Cmp(Op::Prefix, Version::parse(&prefix_parts.join("."))?));
        return Ok(());
    }

    let (op, rest) = [
        ("===", Op::Eq),
        ("==", Op::Eq),
        ("!=", Op::Ne),
        (">=", Op::Ge),
        ("<=", Op::Le),
        (">", Op::Gt),
        ("<", Op::Lt),
        ("=", Op::Prefix),
    ]
    .iter()
    .find_map(|(sym, op)| clause.strip_prefix(sym).map(|rest| (*op, rest)))
    .unwrap_or((Op::Eq, clause));

    let (op, rest) = match rest.strip_suffix(".*").or_else(|| rest.strip_suffix('*')) {
        Some(stem) => match op {
            Op::Eq | Op::Prefix => (Op::Prefix, stem),
            Op::Ne => (Op::NotPrefix, stem),
            other => (other, stem),
        },
        None => (op, rest),
    };
    let stem = rest.trim_end_matches('.');
    out.push(Constraint::Cmp(op, Version::parse(stem)?));
    Ok(())
}
