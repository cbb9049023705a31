//! Version specifier parsing and resolution against published versions.
//!
//! A specifier is one of:
//! - empty: the source's default (see [`DefaultVersionPolicy`]),
//! - an exact token: a semantic version, a commit hash, a branch or any tag
//!   that is not a range expression; used verbatim,
//! - a range: `>= 2.0.0 < 2.2.0`, `1.2.x`, `~> 1.4`, `< 1.0.0 || >= 2.0.0`.
//!
//! Ranges are matched against an [`AvailableVersionSet`] whose parsed entries
//! are sorted by descending precedence, so the first match is the answer.

use std::cmp::Ordering;
use std::fmt;
use std::future::Future;
use std::str::FromStr;

use semver::{BuildMetadata, Prerelease, Version};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VendorError};
use crate::metrics::METRICS;

/// Parse a version leniently: surrounding whitespace and a leading `v` are
/// ignored, and missing minor/patch components default to zero.
pub fn parse_tolerant(raw: &str) -> Option<Version> {
    let s = raw.trim();
    let s = s.strip_prefix('v').unwrap_or(s);
    if s.is_empty() {
        return None;
    }

    let parts: Vec<&str> = s.splitn(3, '.').collect();
    if parts.len() < 3 {
        let last = parts[parts.len() - 1];
        if last.contains(['-', '+']) {
            return None;
        }
        let mut padded = parts.join(".");
        for _ in parts.len()..3 {
            padded.push_str(".0");
        }
        return Version::parse(&padded).ok();
    }
    Version::parse(s).ok()
}

/// Compare by semantic-version precedence: major, minor, patch, pre-release.
/// Build metadata does not participate.
pub fn cmp_precedence(a: &Version, b: &Version) -> Ordering {
    (a.major, a.minor, a.patch)
        .cmp(&(b.major, b.minor, b.patch))
        .then_with(|| a.pre.cmp(&b.pre))
}

fn release(major: u64, minor: u64, patch: u64) -> Version {
    Version {
        major,
        minor,
        patch,
        pre: Prerelease::EMPTY,
        build: BuildMetadata::EMPTY,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Comparator {
    Any,
    Cmp(Op, Version),
    /// `!=` applied to a wildcard: outside `[lo, hi)`.
    Outside(Version, Version),
}

impl Comparator {
    fn matches(&self, v: &Version) -> bool {
        match self {
            Comparator::Any => true,
            Comparator::Cmp(op, bound) => {
                let ord = cmp_precedence(v, bound);
                match op {
                    Op::Eq => ord == Ordering::Equal,
                    Op::Ne => ord != Ordering::Equal,
                    Op::Gt => ord == Ordering::Greater,
                    Op::Ge => ord != Ordering::Less,
                    Op::Lt => ord == Ordering::Less,
                    Op::Le => ord != Ordering::Greater,
                }
            }
            Comparator::Outside(lo, hi) => {
                cmp_precedence(v, lo) == Ordering::Less || cmp_precedence(v, hi) != Ordering::Less
            }
        }
    }
}

const OPERATORS: &[&str] = &["~>", ">=", "<=", "==", "!=", ">", "<", "="];

/// A semantic-version range: a disjunction of conjunctions of comparators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    source: String,
    alternatives: Vec<Vec<Comparator>>,
}

impl VersionRange {
    /// Range matching every version.
    pub fn any() -> Self {
        Self {
            source: String::new(),
            alternatives: vec![vec![Comparator::Any]],
        }
    }

    pub fn parse(expr: &str) -> Result<Self> {
        let invalid = |detail: &str| VendorError::InvalidVersion(format!("{expr}: {detail}"));
        if expr.trim().is_empty() {
            return Err(invalid("empty range"));
        }

        let mut alternatives = Vec::new();
        for alt in expr.split("||") {
            let tokens = merge_operator_tokens(alt);
            if tokens.is_empty() {
                return Err(invalid("empty alternative"));
            }
            let mut conj = Vec::new();
            for token in tokens {
                conj.extend(parse_comparator(&token).ok_or_else(|| invalid(&token))?);
            }
            alternatives.push(conj);
        }

        Ok(Self {
            source: expr.trim().to_string(),
            alternatives,
        })
    }

    pub fn matches(&self, v: &Version) -> bool {
        self.alternatives
            .iter()
            .any(|conj| conj.iter().all(|c| c.matches(v)))
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.source.is_empty() {
            f.write_str("*")
        } else {
            f.write_str(&self.source)
        }
    }
}

impl FromStr for VersionRange {
    type Err = VendorError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Split on whitespace and commas, gluing a bare operator to the version
/// that follows it (`>= 2.0.0` becomes `>=2.0.0`).
fn merge_operator_tokens(alt: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut pending: Option<String> = None;
    for tok in alt.split(|c: char| c.is_whitespace() || c == ',') {
        if tok.is_empty() {
            continue;
        }
        if OPERATORS.contains(&tok) {
            pending = Some(tok.to_string());
            continue;
        }
        match pending.take() {
            Some(op) => out.push(format!("{op}{tok}")),
            None => out.push(tok.to_string()),
        }
    }
    if let Some(op) = pending {
        // A trailing operator with nothing after it cannot parse.
        out.push(op);
    }
    out
}

fn split_operator(token: &str) -> (&str, &str) {
    for op in OPERATORS {
        if let Some(rest) = token.strip_prefix(*op) {
            return (*op, rest);
        }
    }
    ("", token)
}

fn is_wildcard(part: &str) -> bool {
    matches!(part, "x" | "X" | "*")
}

fn parse_comparator(token: &str) -> Option<Vec<Comparator>> {
    let (op, version) = split_operator(token);
    if version.is_empty() {
        return None;
    }

    if op == "~>" {
        return pessimistic(version);
    }

    let op = match op {
        "" | "=" | "==" => Op::Eq,
        "!=" => Op::Ne,
        ">" => Op::Gt,
        ">=" => Op::Ge,
        "<" => Op::Lt,
        "<=" => Op::Le,
        _ => return None,
    };

    let core = version.strip_prefix('v').unwrap_or(version);
    let parts: Vec<&str> = core.splitn(3, '.').collect();
    let wildcard_at = parts.iter().position(|p| is_wildcard(p));

    let Some(idx) = wildcard_at else {
        return Some(vec![Comparator::Cmp(op, parse_tolerant(version)?)]);
    };

    // Everything after the first wildcard must also be a wildcard.
    if parts[idx..].iter().any(|p| !is_wildcard(p)) {
        return None;
    }
    let nums: Vec<u64> = parts[..idx]
        .iter()
        .map(|p| p.parse::<u64>().ok())
        .collect::<Option<_>>()?;

    let (lo, hi) = match nums.as_slice() {
        [] => return Some(vec![Comparator::Any]),
        [major] => (release(*major, 0, 0), release(major.checked_add(1)?, 0, 0)),
        [major, minor] => (
            release(*major, *minor, 0),
            release(*major, minor.checked_add(1)?, 0),
        ),
        _ => return None,
    };

    Some(match op {
        Op::Eq => vec![Comparator::Cmp(Op::Ge, lo), Comparator::Cmp(Op::Lt, hi)],
        Op::Ne => vec![Comparator::Outside(lo, hi)],
        Op::Gt => vec![Comparator::Cmp(Op::Ge, hi)],
        Op::Ge => vec![Comparator::Cmp(Op::Ge, lo)],
        Op::Lt => vec![Comparator::Cmp(Op::Lt, lo)],
        Op::Le => vec![Comparator::Cmp(Op::Lt, hi)],
    })
}

/// `~> 1.2` allows `>= 1.2.0 < 2.0.0`; `~> 1.2.3` allows `>= 1.2.3 < 1.3.0`.
fn pessimistic(version: &str) -> Option<Vec<Comparator>> {
    let core = version.strip_prefix('v').unwrap_or(version);
    let components = core.split(['-', '+']).next()?.split('.').count();
    let lo = parse_tolerant(version)?;
    let hi = match components {
        1 | 2 => release(lo.major.checked_add(1)?, 0, 0),
        3 => release(lo.major, lo.minor.checked_add(1)?, 0),
        _ => return None,
    };
    Some(vec![Comparator::Cmp(Op::Ge, lo), Comparator::Cmp(Op::Lt, hi)])
}

/// Interpretation of a user-supplied version string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSpecifier {
    /// Nothing requested; defer to the per-kind default policy.
    Latest,
    /// Used verbatim without consulting the available versions.
    Exact(String),
    Range(VersionRange),
}

impl VersionSpecifier {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return VersionSpecifier::Latest;
        }
        if parse_tolerant(trimmed).is_some() {
            return VersionSpecifier::Exact(raw.to_string());
        }
        match VersionRange::parse(trimmed) {
            Ok(range) => VersionSpecifier::Range(range),
            Err(_) => VersionSpecifier::Exact(raw.to_string()),
        }
    }

    pub fn is_range(&self) -> bool {
        matches!(self, VersionSpecifier::Range(_))
    }
}

/// Published version strings with their parsed value, where one exists.
#[derive(Debug, Clone, Default)]
pub struct AvailableVersionSet {
    /// Parsed entries, highest precedence first.
    parsed: Vec<(Version, String)>,
    unparsed: Vec<String>,
}

impl AvailableVersionSet {
    pub fn new<I, S>(raw: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut parsed = Vec::new();
        let mut unparsed = Vec::new();
        for s in raw {
            let s = s.into();
            match parse_tolerant(&s) {
                Some(v) => parsed.push((v, s)),
                None => unparsed.push(s),
            }
        }
        parsed.sort_by(|(va, ra), (vb, rb)| cmp_precedence(vb, va).then_with(|| ra.cmp(rb)));
        unparsed.sort();
        Self { parsed, unparsed }
    }

    /// Parsed entries in descending precedence.
    pub fn candidates(&self) -> impl Iterator<Item = (&Version, &str)> {
        self.parsed.iter().map(|(v, s)| (v, s.as_str()))
    }

    /// Entries that did not parse as versions.
    pub fn unparsed(&self) -> &[String] {
        &self.unparsed
    }

    pub fn is_empty(&self) -> bool {
        self.parsed.is_empty()
    }

    /// Raw string of the highest-precedence entry satisfying `range`.
    pub fn best_match(&self, range: &VersionRange) -> Option<&str> {
        self.candidates()
            .find(|(v, _)| range.matches(v))
            .map(|(_, raw)| raw)
    }

    fn raw_candidates(&self) -> Vec<String> {
        self.parsed.iter().map(|(_, s)| s.clone()).collect()
    }
}

/// Pick a version from `available` for `specifier`, treating every non-empty
/// specifier as a range (`1.1.1` means `= 1.1.1`) and the empty one as "any".
pub fn select_version(available: &[String], specifier: &str) -> Result<String> {
    let range = if specifier.trim().is_empty() {
        VersionRange::any()
    } else {
        VersionRange::parse(specifier)?
    };
    let set = AvailableVersionSet::new(available.iter().cloned());
    set.best_match(&range)
        .map(str::to_string)
        .ok_or_else(|| VendorError::VersionNotFound {
            specifier: specifier.to_string(),
            available: set.raw_candidates(),
        })
}

/// What an empty version specifier means for a kind of source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DefaultVersionPolicy {
    /// Let the fetcher take whatever the remote considers its default.
    RemoteDefault,
    /// Check out a named branch.
    Branch(String),
    /// Highest published version.
    Latest,
    /// Refuse to proceed without an explicit version.
    Required,
}

impl From<String> for DefaultVersionPolicy {
    fn from(s: String) -> Self {
        match s.trim() {
            "" | "default" => DefaultVersionPolicy::RemoteDefault,
            "latest" => DefaultVersionPolicy::Latest,
            "required" => DefaultVersionPolicy::Required,
            branch => DefaultVersionPolicy::Branch(branch.to_string()),
        }
    }
}

impl From<DefaultVersionPolicy> for String {
    fn from(p: DefaultVersionPolicy) -> Self {
        match p {
            DefaultVersionPolicy::RemoteDefault => "default".to_string(),
            DefaultVersionPolicy::Branch(b) => b,
            DefaultVersionPolicy::Latest => "latest".to_string(),
            DefaultVersionPolicy::Required => "required".to_string(),
        }
    }
}

/// Resolve `specifier` to a concrete version string.
///
/// `available` is awaited only when the answer depends on the published
/// versions (a range, or an empty specifier under [`DefaultVersionPolicy::Latest`]).
/// An empty string result means "the remote's default".
pub async fn resolve_version<F, Fut>(
    specifier: &str,
    default_policy: &DefaultVersionPolicy,
    available: F,
) -> Result<String>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<String>>>,
{
    let range = match VersionSpecifier::parse(specifier) {
        VersionSpecifier::Exact(token) => return Ok(token),
        VersionSpecifier::Range(range) => range,
        VersionSpecifier::Latest => match default_policy {
            DefaultVersionPolicy::RemoteDefault => return Ok(String::new()),
            DefaultVersionPolicy::Branch(branch) => return Ok(branch.clone()),
            DefaultVersionPolicy::Required => {
                return Err(VendorError::Configuration(
                    "an explicit version is required for this source".to_string(),
                ))
            }
            DefaultVersionPolicy::Latest => VersionRange::any(),
        },
    };

    let set = AvailableVersionSet::new(available().await?);
    let chosen = set
        .best_match(&range)
        .map(str::to_string)
        .ok_or_else(|| VendorError::VersionNotFound {
            specifier: specifier.to_string(),
            available: set.raw_candidates(),
        })?;
    METRICS.inc_versions_resolved();
    Ok(chosen)
}
