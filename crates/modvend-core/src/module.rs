//! Per-kind fetch adapter over a [`Fetcher`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;
use url::Url;

use crate::error::{Result, VendorError};
use crate::fetcher::detect::{self, split_forced, Detector, DEFAULT_DETECTORS};
use crate::fetcher::fs::copy_dir;
use crate::fetcher::{blocking, Fetcher};
use crate::git::remote_url;
use crate::source::SourceKind;

/// Add `ref=<version>` to `locator` unless it already carries a `ref` or
/// `version` is empty.
pub fn with_ref(locator: &str, version: &str) -> Result<String> {
    if version.is_empty() {
        return Ok(locator.to_string());
    }
    let (forced, rest) = split_forced(locator);
    let mut url = Url::parse(rest)?;
    if url.query_pairs().any(|(k, _)| k == "ref") {
        return Ok(locator.to_string());
    }
    url.query_pairs_mut().append_pair("ref", version);
    Ok(match forced {
        Some(getter) => format!("{getter}::{url}"),
        None => url.to_string(),
    })
}

/// Materialises a resolved module into its destination directory.
#[derive(Clone)]
pub struct ModuleFetcher {
    fetcher: Arc<dyn Fetcher>,
    detectors: Vec<(&'static str, Detector)>,
}

impl ModuleFetcher {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            fetcher,
            detectors: DEFAULT_DETECTORS.to_vec(),
        }
    }

    /// Fully qualified locator for a git or generic source at `version`.
    /// Git sources are always forced through the git getter.
    pub fn locator(&self, kind: SourceKind, source: &str, version: &str) -> Result<String> {
        let detected = detect::detect(source, &self.detectors)?;
        let forced = split_forced(&detected).0.is_some();
        let detected = match kind {
            SourceKind::Generic => detected,
            SourceKind::Git if forced => detected,
            SourceKind::Git => format!("git::{detected}"),
            other => {
                return Err(VendorError::Configuration(format!(
                    "{other} sources are not fetched through a locator"
                )))
            }
        };
        with_ref(&detected, version)
    }

    /// Plain remote URL of a git source, in the form `git ls-remote` takes.
    pub fn remote(&self, source: &str) -> Result<String> {
        let locator = self.locator(SourceKind::Git, source, "")?;
        Ok(remote_url(&locator).to_string())
    }

    pub async fn fetch(
        &self,
        kind: SourceKind,
        source: &str,
        version: &str,
        destination: &Path,
    ) -> Result<()> {
        match kind {
            SourceKind::Local => {
                let src = PathBuf::from(source);
                let dest = destination.to_path_buf();
                info!("Copying from {}", src.display());
                blocking(move || copy_dir(&src, &dest)).await
            }
            // The registry location already pins the version.
            SourceKind::Registry => self.fetcher.materialize(source, destination).await,
            SourceKind::Git | SourceKind::Generic => {
                let locator = self.locator(kind, source, version)?;
                if version.is_empty() {
                    info!("Checking out default revision from {}", source);
                } else {
                    info!("Checking out {} from {}", version, source);
                }
                self.fetcher.materialize(&locator, destination).await
            }
        }
    }
}
