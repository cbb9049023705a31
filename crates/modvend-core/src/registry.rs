//! Module registry client.
//!
//! Speaks the registry modules protocol: list versions of a
//! `namespace/name/provider` coordinate and look up the download location
//! for one version via the `X-Terraform-Get` header.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use crate::config::VendorSettings;
use crate::error::{Result, VendorError};
use crate::source::RegistryCoordinate;

/// Header carrying the real download location.
pub const DOWNLOAD_HEADER: &str = "X-Terraform-Get";

static GITHUB_TARBALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://[^/]+/repos/([^/]+)/([^/]+)/tarball/([^/]+)/.*")
        .expect("tarball pattern is valid")
});

/// Version lookup and download-location lookup for registry coordinates.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Published version strings for `coordinate`.
    async fn list_versions(&self, coordinate: &str) -> Result<Vec<String>>;

    /// A concrete, fetchable source for `coordinate` at `version`.
    async fn resolve_location(&self, coordinate: &str, version: &str) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct VersionsResponse {
    modules: Vec<ModuleVersions>,
}

#[derive(Debug, Deserialize)]
struct ModuleVersions {
    versions: Vec<VersionEntry>,
}

#[derive(Debug, Deserialize)]
struct VersionEntry {
    version: String,
}

/// Rewrite a GitHub API tarball URL into the equivalent git source, pinning
/// the tarball's ref. Other locations are returned unchanged.
pub fn rewrite_github_tarball(location: &str) -> String {
    match GITHUB_TARBALL_RE.captures(location) {
        Some(caps) => format!(
            "git::https://github.com/{}/{}.git?ref={}",
            &caps[1], &caps[2], &caps[3]
        ),
        None => location.to_string(),
    }
}

/// HTTP implementation of [`RegistryClient`].
pub struct HttpRegistryClient {
    http: reqwest::Client,
    base_url: Option<String>,
}

impl HttpRegistryClient {
    pub fn new(settings: &VendorSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|e| VendorError::Configuration(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: settings.registry_url.clone(),
        })
    }

    fn module_url(&self, coord: &RegistryCoordinate) -> String {
        let base = match &self.base_url {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("https://{}/v1/modules", coord.host),
        };
        format!("{base}/{}", coord.module_path())
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn list_versions(&self, coordinate: &str) -> Result<Vec<String>> {
        let coord = RegistryCoordinate::parse(coordinate)?;
        let url = format!("{}/versions", self.module_url(&coord));
        debug!(url = %url, "listing registry versions");

        let resp = self.http.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(VendorError::SourceUnavailable(format!(
                "registry returned {} for {url}",
                resp.status()
            )));
        }
        let body: VersionsResponse = resp.json().await?;
        let module = body.modules.into_iter().next().ok_or_else(|| {
            VendorError::SourceUnavailable(format!("registry has no module {coordinate}"))
        })?;
        Ok(module.versions.into_iter().map(|v| v.version).collect())
    }

    async fn resolve_location(&self, coordinate: &str, version: &str) -> Result<String> {
        let coord = RegistryCoordinate::parse(coordinate)?;
        info!("Looking up {} version {} in registry", coord, version);

        let url = format!("{}/{}/download", self.module_url(&coord), version);
        let resp = self.http.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(VendorError::SourceUnavailable(format!(
                "registry returned {} for {url}",
                resp.status()
            )));
        }

        let location = resp
            .headers()
            .get(DOWNLOAD_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                VendorError::SourceUnavailable(format!(
                    "unable to find download url for {coordinate} version {version}"
                ))
            })?;

        let absolute = absolutize(&url, location)?;
        let source = rewrite_github_tarball(&absolute);
        info!("Downloading from source URL {}", source);
        Ok(source)
    }
}

/// Resolve relative locations (`./archive.tgz`, `/files/x.zip`) against the
/// URL that returned them.
pub(crate) fn absolutize(request_url: &str, location: &str) -> Result<String> {
    let relative = location.starts_with("./")
        || location.starts_with("../")
        || (location.starts_with('/') && !location.starts_with("//"));
    if !relative {
        return Ok(location.to_string());
    }
    Ok(Url::parse(request_url)?.join(location)?.to_string())
}
