//! Scheme getters: `file`, `git` and `http(s)`.

use std::path::Path;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;
use url::Url;

use super::archive::{self, ArchiveFormat};
use super::fs::copy_dir;
use super::{blocking, GetOutcome, Getter};
use crate::error::{Result, VendorError};
use crate::git::GitCli;
use crate::metrics::METRICS;
use crate::registry::{absolutize, DOWNLOAD_HEADER};

static META_GET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<meta\s+name="terraform-get"\s+content="([^"]+)""#)
        .expect("meta tag pattern is valid")
});

/// Copies a local directory, or extracts a local archive.
#[derive(Debug, Default, Clone)]
pub struct FileGetter;

#[async_trait]
impl Getter for FileGetter {
    async fn get(
        &self,
        url: &Url,
        destination: &Path,
        archive: Option<ArchiveFormat>,
    ) -> Result<GetOutcome> {
        let path = url
            .to_file_path()
            .map_err(|_| VendorError::Fetch(format!("not a local path: {url}")))?;
        let dest = destination.to_path_buf();

        match archive {
            Some(format) => {
                let bytes = tokio::fs::read(&path)
                    .await
                    .map_err(|e| VendorError::fs(&path, e))?;
                let name = path.to_string_lossy().into_owned();
                blocking(move || archive::extract(format, &bytes, &name, &dest)).await?;
            }
            None => blocking(move || copy_dir(&path, &dest)).await?,
        }
        Ok(GetOutcome::Done)
    }
}

/// Clones a repository and checks out the `ref` query parameter.
#[derive(Debug, Default, Clone)]
pub struct GitGetter {
    git: GitCli,
}

impl GitGetter {
    pub fn new(git: GitCli) -> Self {
        Self { git }
    }
}

#[async_trait]
impl Getter for GitGetter {
    async fn get(
        &self,
        url: &Url,
        destination: &Path,
        _archive: Option<ArchiveFormat>,
    ) -> Result<GetOutcome> {
        let mut reference = None;
        let mut depth = None;
        let mut kept = Vec::new();
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "ref" => reference = Some(value.into_owned()),
                "depth" => {
                    let d = value.parse::<u32>().map_err(|_| {
                        VendorError::Configuration(format!("invalid depth {value:?}"))
                    })?;
                    depth = Some(d);
                }
                _ => kept.push((key.into_owned(), value.into_owned())),
            }
        }

        let mut remote = url.clone();
        if kept.is_empty() {
            remote.set_query(None);
        } else {
            remote.query_pairs_mut().clear().extend_pairs(kept);
        }

        self.git.clone_repo(remote.as_str(), destination, depth).await?;
        if let Some(reference) = reference.filter(|r| !r.is_empty()) {
            self.git.checkout(destination, &reference).await?;
        }
        Ok(GetOutcome::Done)
    }
}

/// Downloads over HTTP(S). Archives are extracted; other URLs must point
/// elsewhere through `X-Terraform-Get` or a `terraform-get` meta tag.
#[derive(Debug, Clone)]
pub struct HttpGetter {
    http: reqwest::Client,
}

impl HttpGetter {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn download(&self, url: &Url) -> Result<reqwest::Response> {
        let resp = self.http.get(url.clone()).send().await?;
        if !resp.status().is_success() {
            return Err(VendorError::Fetch(format!(
                "bad response code {} from {url}",
                resp.status()
            )));
        }
        Ok(resp)
    }
}

#[async_trait]
impl Getter for HttpGetter {
    async fn get(
        &self,
        url: &Url,
        destination: &Path,
        archive: Option<ArchiveFormat>,
    ) -> Result<GetOutcome> {
        if let Some(format) = archive {
            debug!(url = %url, ?format, "downloading archive");
            let bytes = self.download(url).await?.bytes().await?;
            METRICS.add_bytes_downloaded(bytes.len() as u64);
            let name = url.path().to_string();
            let dest = destination.to_path_buf();
            blocking(move || archive::extract(format, &bytes, &name, &dest)).await?;
            return Ok(GetOutcome::Done);
        }

        let mut lookup = url.clone();
        lookup.query_pairs_mut().append_pair("terraform-get", "1");
        let resp = self.download(&lookup).await?;

        let header = resp
            .headers()
            .get(DOWNLOAD_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        let location = match header {
            Some(location) => location,
            None => {
                let body = resp.text().await?;
                METRICS.add_bytes_downloaded(body.len() as u64);
                META_GET_RE
                    .captures(&body)
                    .map(|caps| caps[1].to_string())
                    .ok_or_else(|| {
                        VendorError::Fetch(format!(
                            "no archive format and no download location at {url}"
                        ))
                    })?
            }
        };
        Ok(GetOutcome::Redirect(absolutize(url.as_str(), &location)?))
    }
}
