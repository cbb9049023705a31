//! Source address classification.
//!
//! A module's `source` string is classified into one of four [`SourceKind`]s
//! by walking a fixed precedence table. Address syntaxes overlap (a relative
//! path can look like a registry coordinate), so the first matching row wins.
//!
//! Any `//sub/dir` suffix is split off before the table is consulted; see
//! [`split_subdir`].

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VendorError};

/// Host used for coordinates that do not name one.
pub const PUBLIC_REGISTRY_HOST: &str = "registry.terraform.io";

/// Hosts that look like registry hostnames but are VCS shorthands.
const VCS_HOSTS: &[&str] = &["github.com", "bitbucket.org"];

const LOCAL_PREFIXES: &[&str] = &["./", "../", ".\\", "..\\"];

const GIT_PREFIXES: &[&str] = &["git::", "git@"];

/// Kind of location a module source address denotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Local,
    Registry,
    Git,
    Generic,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Local => "local",
            SourceKind::Registry => "registry",
            SourceKind::Git => "git",
            SourceKind::Generic => "generic",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static REGISTRY_RE: LazyLock<Regex> = LazyLock::new(|| {
    let label = "[0-9A-Za-z](?:[0-9A-Za-z-]{0,61}[0-9A-Za-z])?";
    let host = format!(r"(?:{label}\.)+{label}(?::[0-9]{{1,5}})?");
    let name = "[0-9A-Za-z](?:[0-9A-Za-z_-]{0,62}[0-9A-Za-z])?";
    let provider = "[0-9a-z]{1,64}";
    Regex::new(&format!(
        r"^(?:({host})/)?({name})/({name})/({provider})(?://(.*))?$"
    ))
    .expect("registry coordinate pattern is valid")
});

/// Ordered classification table. Evaluated top to bottom; `Generic` is the
/// fallback when no row matches.
const CLASSIFIERS: &[(fn(&str) -> bool, SourceKind)] = &[
    (is_local_source, SourceKind::Local),
    (is_registry_source, SourceKind::Registry),
    (is_git_source, SourceKind::Git),
];

/// Classify a source address. Total and side-effect free.
pub fn classify(address: &str) -> SourceKind {
    let (address, _) = split_subdir(address);
    CLASSIFIERS
        .iter()
        .find(|(matches, _)| matches(&address))
        .map(|(_, kind)| *kind)
        .unwrap_or(SourceKind::Generic)
}

/// Relative filesystem path (`./`, `../` and their backslash forms).
pub fn is_local_source(address: &str) -> bool {
    LOCAL_PREFIXES.iter().any(|p| address.starts_with(p))
}

/// `[host/]namespace/name/provider[//subdir]`.
pub fn is_registry_source(address: &str) -> bool {
    RegistryCoordinate::parse(address).is_ok()
}

/// `git::` / `git@` prefixed, or a path ending in `.git`.
pub fn is_git_source(address: &str) -> bool {
    let path = address.split('?').next().unwrap_or(address);
    GIT_PREFIXES.iter().any(|p| address.starts_with(p)) || path.ends_with(".git")
}

/// Split a `//sub/dir` suffix from an address.
///
/// The `//` of a URL scheme (`https://`) and a forced getter prefix
/// (`git::`) are skipped. A query string trailing the sub-directory is moved
/// back onto the returned address.
pub fn split_subdir(address: &str) -> (String, String) {
    let mut offset = 0;
    if let Some(idx) = address.find("::") {
        offset = idx + 2;
    }
    if let Some(idx) = address[offset..].find("://") {
        offset += idx + 3;
    }

    let Some(idx) = address[offset..].find("//") else {
        return (address.to_string(), String::new());
    };

    let split = offset + idx;
    let mut source = address[..split].to_string();
    let mut subdir = address[split + 2..].to_string();
    if let Some(q) = subdir.find('?') {
        source.push_str(&subdir[q..]);
        subdir.truncate(q);
    }
    (source, subdir)
}

/// A parsed module source address: the fetchable part, the requested
/// sub-directory (possibly empty) and its classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceAddress {
    pub address: String,
    pub subdir: String,
    pub kind: SourceKind,
}

impl SourceAddress {
    pub fn parse(raw: &str) -> Self {
        let (address, subdir) = split_subdir(raw);
        let kind = classify(&address);
        Self {
            address,
            subdir,
            kind,
        }
    }
}

/// `namespace/name/provider` triple identifying a module in a registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegistryCoordinate {
    pub host: String,
    pub namespace: String,
    pub name: String,
    pub provider: String,
}

impl RegistryCoordinate {
    pub fn parse(address: &str) -> Result<Self> {
        let invalid = || VendorError::Configuration(format!("not a registry coordinate: {address}"));
        let caps = REGISTRY_RE.captures(address).ok_or_else(invalid)?;

        let host = caps.get(1).map(|m| m.as_str().to_ascii_lowercase());
        if let Some(h) = &host {
            if VCS_HOSTS.contains(&h.as_str()) {
                return Err(invalid());
            }
        }

        Ok(Self {
            host: host.unwrap_or_else(|| PUBLIC_REGISTRY_HOST.to_string()),
            namespace: caps[2].to_string(),
            name: caps[3].to_string(),
            provider: caps[4].to_string(),
        })
    }

    /// `namespace/name/provider` path segment used by the registry API.
    pub fn module_path(&self) -> String {
        format!("{}/{}/{}", self.namespace, self.name, self.provider)
    }
}

impl fmt::Display for RegistryCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host == PUBLIC_REGISTRY_HOST {
            write!(f, "{}", self.module_path())
        } else {
            write!(f, "{}/{}", self.host, self.module_path())
        }
    }
}
