//! Multi-scheme fetcher: materialise a source locator into a directory.
//!
//! Locators are resolved in three table-driven steps, all held in an explicit
//! [`FetcherConfig`]:
//!
//! - [`detect`]: shorthand addresses become qualified URLs
//! - getters: `file`, `git`, `http(s)`, `s3`, `gcs` keyed by forced
//!   getter or URL scheme
//! - [`archive`]: extension to decompressor lookup for `file` and `http`
//!
//! A `//sub/dir` suffix on a locator fetches the whole source into a
//! scratch directory and copies only the sub-directory out.

pub mod archive;
pub mod detect;
pub mod fs;
pub mod getters;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use crate::config::VendorSettings;
use crate::error::{Result, VendorError};
use crate::git::GitCli;
use crate::source::split_subdir;

pub use archive::{ArchiveFormat, DEFAULT_DECOMPRESSORS};
pub use detect::{Detector, DEFAULT_DETECTORS};
pub use getters::{FileGetter, GitGetter, HttpGetter};

/// Download redirects followed per locator.
const MAX_REDIRECTS: usize = 1;

/// Materialise whatever `locator` names into `destination`.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn materialize(&self, locator: &str, destination: &Path) -> Result<()>;
}

/// Result of a single getter invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GetOutcome {
    Done,
    /// The content lives at another locator.
    Redirect(String),
}

/// One transport. `archive` is set when the locator names a known archive
/// format; getters that cannot extract ignore it.
#[async_trait]
pub trait Getter: Send + Sync {
    async fn get(
        &self,
        url: &Url,
        destination: &Path,
        archive: Option<ArchiveFormat>,
    ) -> Result<GetOutcome>;
}

/// Detector list, getter table and decompressor table.
#[derive(Clone)]
pub struct FetcherConfig {
    pub detectors: Vec<(&'static str, Detector)>,
    pub getters: HashMap<String, Arc<dyn Getter>>,
    pub decompressors: Vec<(String, ArchiveFormat)>,
}

impl FetcherConfig {
    /// Configuration with no getters registered.
    pub fn empty() -> Self {
        Self {
            detectors: DEFAULT_DETECTORS.to_vec(),
            getters: HashMap::new(),
            decompressors: DEFAULT_DECOMPRESSORS
                .iter()
                .map(|(ext, format)| (ext.to_string(), *format))
                .collect(),
        }
    }

    /// The stock table: every detector, decompressor and getter.
    pub fn standard(settings: &VendorSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|e| VendorError::Configuration(format!("failed to create HTTP client: {e}")))?;
        let http_getter: Arc<dyn Getter> = Arc::new(HttpGetter::new(http));

        Ok(Self::empty()
            .with_getter("file", Arc::new(FileGetter))
            .with_getter(
                "git",
                Arc::new(GitGetter::new(GitCli::new(settings.git_program.clone()))),
            )
            .with_getter("http", http_getter.clone())
            .with_getter("https", http_getter.clone())
            .with_getter("s3", http_getter.clone())
            .with_getter("gcs", http_getter))
    }

    pub fn with_getter(mut self, key: &str, getter: Arc<dyn Getter>) -> Self {
        self.getters.insert(key.to_ascii_lowercase(), getter);
        self
    }

    pub fn getter(&self, key: &str) -> Option<&Arc<dyn Getter>> {
        self.getters.get(&key.to_ascii_lowercase())
    }

    pub fn detect(&self, address: &str) -> Result<String> {
        detect::detect(address, &self.detectors)
    }

    /// Archive format named by an `archive=` query parameter (removed from
    /// `url`) or else by the URL path's extension. `archive=false` disables
    /// extraction.
    pub fn archive_format(&self, url: &mut Url) -> Result<Option<ArchiveFormat>> {
        let mut requested = None;
        let mut kept = Vec::new();
        for (key, value) in url.query_pairs() {
            if key == "archive" {
                requested = Some(value.into_owned());
            } else {
                kept.push((key.into_owned(), value.into_owned()));
            }
        }

        let Some(requested) = requested else {
            return Ok(archive::format_for_name(url.path(), &self.decompressors));
        };
        if kept.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(kept);
        }
        if requested == "false" {
            return Ok(None);
        }
        archive::format_for_extension(&requested, &self.decompressors)
            .map(Some)
            .ok_or_else(|| VendorError::Configuration(format!("unknown archive format {requested:?}")))
    }
}

/// [`Fetcher`] backed by a [`FetcherConfig`].
#[derive(Clone)]
pub struct MultiSchemeFetcher {
    config: Arc<FetcherConfig>,
}

impl MultiSchemeFetcher {
    pub fn new(config: FetcherConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }
}

fn join_subdirs(inner: &str, outer: &str) -> String {
    match (inner.trim_matches('/'), outer.trim_matches('/')) {
        ("", o) => o.to_string(),
        (i, "") => i.to_string(),
        (i, o) => format!("{i}/{o}"),
    }
}

#[async_trait]
impl Fetcher for MultiSchemeFetcher {
    async fn materialize(&self, locator: &str, destination: &Path) -> Result<()> {
        let mut locator = locator.to_string();
        let mut pending_subdir = String::new();

        for _ in 0..=MAX_REDIRECTS {
            let detected = self.config.detect(&locator)?;
            let (forced, rest) = detect::split_forced(&detected);
            let (rest, subdir) = split_subdir(rest);
            let subdir = join_subdirs(&subdir, &pending_subdir);

            let mut url = Url::parse(&rest)?;
            let key = forced.unwrap_or(url.scheme()).to_ascii_lowercase();
            let getter = self
                .config
                .getter(&key)
                .ok_or_else(|| VendorError::UnsupportedScheme(key.clone()))?;
            let archive = if key == "git" {
                None
            } else {
                self.config.archive_format(&mut url)?
            };

            if subdir.is_empty() {
                match getter.get(&url, destination, archive).await? {
                    GetOutcome::Done => return Ok(()),
                    GetOutcome::Redirect(next) => locator = next,
                }
                continue;
            }

            let staging = tempfile::tempdir()?;
            let fetched = staging.path().join("source");
            match getter.get(&url, &fetched, archive).await? {
                GetOutcome::Done => {
                    let src = fs::join_within(&fetched, &subdir)?;
                    let dest = destination.to_path_buf();
                    return blocking(move || fs::copy_dir(&src, &dest)).await;
                }
                GetOutcome::Redirect(next) => {
                    pending_subdir = subdir;
                    locator = next;
                }
            }
        }

        Err(VendorError::Fetch(format!(
            "too many download redirects, last location {locator}"
        )))
    }
}

/// Run blocking filesystem work off the async runtime.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| VendorError::Fetch(format!("blocking task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every URL it is asked for and writes a marker file.
    #[derive(Default)]
    struct RecordingGetter {
        calls: Mutex<Vec<(String, Option<ArchiveFormat>)>>,
        redirect_to: Option<String>,
    }

    #[async_trait]
    impl Getter for RecordingGetter {
        async fn get(
            &self,
            url: &Url,
            destination: &Path,
            archive: Option<ArchiveFormat>,
        ) -> Result<GetOutcome> {
            let first = {
                let mut calls = self.calls.lock().unwrap();
                calls.push((url.to_string(), archive));
                calls.len() == 1
            };
            if let (true, Some(next)) = (first, &self.redirect_to) {
                return Ok(GetOutcome::Redirect(next.clone()));
            }
            std::fs::create_dir_all(destination.join("modules/vpc")).unwrap();
            std::fs::write(destination.join("root.tf"), "root").unwrap();
            std::fs::write(destination.join("modules/vpc/main.tf"), "vpc").unwrap();
            Ok(GetOutcome::Done)
        }
    }

    fn fetcher_with(getter: Arc<RecordingGetter>) -> MultiSchemeFetcher {
        MultiSchemeFetcher::new(
            FetcherConfig::empty()
                .with_getter("https", getter.clone())
                .with_getter("git", getter),
        )
    }

    #[tokio::test]
    async fn dispatches_on_forced_getter_and_scheme() {
        let getter = Arc::new(RecordingGetter::default());
        let fetcher = fetcher_with(getter.clone());
        let out = tempfile::tempdir().unwrap();

        fetcher
            .materialize("github.com/org/repo?ref=v1", &out.path().join("a"))
            .await
            .unwrap();
        fetcher
            .materialize("https://example.com/m.tar.gz", &out.path().join("b"))
            .await
            .unwrap();

        let calls = getter.calls.lock().unwrap();
        assert_eq!(calls[0].0, "https://github.com/org/repo.git?ref=v1");
        assert_eq!(calls[0].1, None);
        assert_eq!(calls[1].0, "https://example.com/m.tar.gz");
        assert_eq!(calls[1].1, Some(ArchiveFormat::TarGz));
    }

    #[tokio::test]
    async fn unknown_scheme_is_unsupported() {
        let fetcher = MultiSchemeFetcher::new(FetcherConfig::empty());
        let out = tempfile::tempdir().unwrap();
        let err = fetcher
            .materialize("ftp://example.com/m.zip", out.path())
            .await;
        assert!(matches!(err, Err(VendorError::UnsupportedScheme(s)) if s == "ftp"));
    }

    #[tokio::test]
    async fn subdir_is_copied_out_of_scratch() {
        let getter = Arc::new(RecordingGetter::default());
        let fetcher = fetcher_with(getter);
        let out = tempfile::tempdir().unwrap();
        let dest = out.path().join("m");

        fetcher
            .materialize("git::https://example.com/repo.git//modules/vpc?ref=v1", &dest)
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(dest.join("main.tf")).unwrap(), "vpc");
        assert!(!dest.join("root.tf").exists());
    }

    #[tokio::test]
    async fn follows_one_redirect() {
        let getter = Arc::new(RecordingGetter {
            redirect_to: Some("git::https://example.com/real.git?ref=v2".to_string()),
            ..RecordingGetter::default()
        });
        let fetcher = fetcher_with(getter.clone());
        let out = tempfile::tempdir().unwrap();

        fetcher
            .materialize("https://example.com/lookup", out.path())
            .await
            .unwrap();

        let calls = getter.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].0, "https://example.com/real.git?ref=v2");
    }

    #[test]
    fn archive_query_parameter_is_consumed() {
        let config = FetcherConfig::empty();
        let mut url = Url::parse("https://example.com/dl?archive=zip&token=x").unwrap();
        assert_eq!(
            config.archive_format(&mut url).unwrap(),
            Some(ArchiveFormat::Zip)
        );
        assert_eq!(url.as_str(), "https://example.com/dl?token=x");

        let mut url = Url::parse("https://example.com/m.zip?archive=false").unwrap();
        assert_eq!(config.archive_format(&mut url).unwrap(), None);
        assert_eq!(url.as_str(), "https://example.com/m.zip");

        let mut url = Url::parse("https://example.com/m?archive=rar").unwrap();
        assert!(config.archive_format(&mut url).is_err());
    }

    #[test]
    fn standard_config_registers_all_getters() {
        let config = FetcherConfig::standard(&VendorSettings::default()).unwrap();
        for key in ["file", "git", "http", "https", "s3", "gcs"] {
            assert!(config.getter(key).is_some(), "missing getter {key}");
        }
    }
}
