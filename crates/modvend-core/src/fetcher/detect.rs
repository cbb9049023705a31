//! Source address detection: turn shorthand addresses into fully qualified,
//! optionally getter-forced URLs (`git::https://...`, `file:///...`).

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::error::{Result, VendorError};

/// A detector rewrites an address it recognises and declines the rest.
pub type Detector = fn(&str) -> Option<String>;

static FORCED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9]+)::(.+)$").expect("forced getter pattern is valid")
});

static SCP_LIKE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9_.-]+)@([A-Za-z0-9_.-]+):(.+)$").expect("scp-like pattern is valid")
});

/// Detectors in evaluation order; the first that returns `Some` wins.
pub const DEFAULT_DETECTORS: &[(&str, Detector)] = &[
    ("forced", detect_forced),
    ("url", detect_url),
    ("github", detect_github),
    ("bitbucket", detect_bitbucket),
    ("ssh", detect_scp_like),
    ("s3", detect_s3),
    ("gcs", detect_gcs),
    ("file", detect_file),
];

/// Split `getter::rest` into its parts. Addresses without a forced getter
/// come back as `(None, address)`.
pub fn split_forced(address: &str) -> (Option<&str>, &str) {
    match FORCED_RE.captures(address) {
        Some(caps) => {
            let getter = caps.get(1).map(|m| m.as_str());
            let rest = caps.get(2).map_or(address, |m| m.as_str());
            (getter, rest)
        }
        None => (None, address),
    }
}

/// Run `detectors` over `address`.
///
/// An address mentioning `.git` has a leading `https://github.com/` removed
/// first so that the GitHub shorthand detector sees it.
pub fn detect(address: &str, detectors: &[(&str, Detector)]) -> Result<String> {
    let address = address.trim();
    let normalized = if address.to_ascii_lowercase().contains(".git") {
        address.strip_prefix("https://github.com/").map(|rest| format!("github.com/{rest}"))
    } else {
        None
    };
    let address = normalized.as_deref().unwrap_or(address);

    detectors
        .iter()
        .find_map(|(_, detector)| detector(address))
        .ok_or_else(|| {
            VendorError::Configuration(format!("invalid source string: {address}"))
        })
}

fn detect_forced(address: &str) -> Option<String> {
    FORCED_RE.is_match(address).then(|| address.to_string())
}

fn detect_url(address: &str) -> Option<String> {
    let url = Url::parse(address).ok()?;
    // `C:\modules` parses with scheme `c`.
    (url.scheme().len() > 1 && address.contains("://")).then(|| address.to_string())
}

fn split_query(address: &str) -> (&str, &str) {
    match address.find('?') {
        Some(idx) => address.split_at(idx),
        None => (address, ""),
    }
}

/// `<host>/<owner>/<repo>[.git][/sub/dir][?query]` into a forced git URL,
/// moving any trailing path into a `//sub/dir`.
fn vcs_shorthand(address: &str, host: &str) -> Option<String> {
    let rest = address.strip_prefix(host)?.strip_prefix('/')?;
    let (path, query) = split_query(rest);
    let mut parts = path.splitn(3, '/');
    let owner = parts.next().filter(|s| !s.is_empty())?;
    let repo = parts.next().filter(|s| !s.is_empty())?;
    let repo = repo.strip_suffix(".git").unwrap_or(repo);
    let subdir = parts
        .next()
        .map(|s| s.trim_matches('/'))
        .filter(|s| !s.is_empty())
        .map(|s| format!("//{s}"))
        .unwrap_or_default();
    Some(format!("git::https://{host}/{owner}/{repo}.git{subdir}{query}"))
}

fn detect_github(address: &str) -> Option<String> {
    vcs_shorthand(address, "github.com")
}

fn detect_bitbucket(address: &str) -> Option<String> {
    vcs_shorthand(address, "bitbucket.org")
}

fn detect_scp_like(address: &str) -> Option<String> {
    if address.contains("://") {
        return None;
    }
    let caps = SCP_LIKE_RE.captures(address)?;
    let path = caps[3].trim_start_matches('/');
    Some(format!("git::ssh://{}@{}/{}", &caps[1], &caps[2], path))
}

fn detect_s3(address: &str) -> Option<String> {
    let host = address.split('/').next()?;
    host.ends_with(".amazonaws.com")
        .then(|| format!("s3::https://{address}"))
}

fn detect_gcs(address: &str) -> Option<String> {
    address
        .starts_with("www.googleapis.com/storage/")
        .then(|| format!("gcs::https://{address}"))
}

fn detect_file(address: &str) -> Option<String> {
    let path = Path::new(address);
    if !path.is_absolute() {
        return None;
    }
    Url::from_file_path(path).ok().map(|u| u.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(address: &str) -> String {
        detect(address, DEFAULT_DETECTORS).unwrap()
    }

    #[test]
    fn forced_and_url_addresses_pass_through() {
        assert_eq!(
            run("git::https://example.com/vpc.git?ref=v1"),
            "git::https://example.com/vpc.git?ref=v1"
        );
        assert_eq!(
            run("https://example.com/vpc.zip"),
            "https://example.com/vpc.zip"
        );
        assert_eq!(run("s3::https://bucket/x.zip"), "s3::https://bucket/x.zip");
    }

    #[test]
    fn github_shorthand() {
        assert_eq!(
            run("github.com/hashicorp/example"),
            "git::https://github.com/hashicorp/example.git"
        );
        assert_eq!(
            run("github.com/hashicorp/example.git?ref=v1.0.0"),
            "git::https://github.com/hashicorp/example.git?ref=v1.0.0"
        );
        assert_eq!(
            run("github.com/hashicorp/example/modules/vpc"),
            "git::https://github.com/hashicorp/example.git//modules/vpc"
        );
    }

    #[test]
    fn github_https_with_dot_git_is_normalized() {
        assert_eq!(
            run("https://github.com/terraform-aws-modules/terraform-aws-vpc.git"),
            "git::https://github.com/terraform-aws-modules/terraform-aws-vpc.git"
        );
    }

    #[test]
    fn bitbucket_shorthand() {
        assert_eq!(
            run("bitbucket.org/org/repo"),
            "git::https://bitbucket.org/org/repo.git"
        );
    }

    #[test]
    fn scp_like_ssh() {
        assert_eq!(
            run("git@github.com:terraform-aws-modules/terraform-aws-vpc"),
            "git::ssh://git@github.com/terraform-aws-modules/terraform-aws-vpc"
        );
    }

    #[test]
    fn object_stores() {
        assert_eq!(
            run("bucket.s3.amazonaws.com/modules/vpc.zip"),
            "s3::https://bucket.s3.amazonaws.com/modules/vpc.zip"
        );
        assert_eq!(
            run("www.googleapis.com/storage/v1/bucket/vpc.zip"),
            "gcs::https://www.googleapis.com/storage/v1/bucket/vpc.zip"
        );
    }

    #[cfg(unix)]
    #[test]
    fn absolute_path_becomes_file_url() {
        assert_eq!(run("/srv/modules/vpc"), "file:///srv/modules/vpc");
    }

    #[test]
    fn unrecognised_address_is_configuration_error() {
        let err = detect("not a source", DEFAULT_DETECTORS);
        assert!(matches!(err, Err(VendorError::Configuration(_))));
    }

    #[test]
    fn split_forced_getter() {
        assert_eq!(
            split_forced("git::https://x/y.git"),
            (Some("git"), "https://x/y.git")
        );
        assert_eq!(split_forced("https://x/y"), (None, "https://x/y"));
    }
}
