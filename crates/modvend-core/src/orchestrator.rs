//! Concurrent vendoring of a declared module set.
//!
//! [`VendorOrchestrator::run_all`] clears the destination root, spawns one
//! task per module onto a [`JoinSet`] and waits for all of them. The first
//! failure is returned with the module name attached; tasks still running at
//! that point are detached, not cancelled.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, Instrument};

use crate::config::{DefaultVersions, VendorSettings};
use crate::error::{Result, VendorError};
use crate::fetcher::fs::{join_within, remove_dir_if_exists, remove_vcs_metadata};
use crate::fetcher::{blocking, Fetcher, FetcherConfig, MultiSchemeFetcher};
use crate::git::{GitCli, TagLister};
use crate::metrics::METRICS;
use crate::module::ModuleFetcher;
use crate::obs;
use crate::registry::{HttpRegistryClient, RegistryClient};
use crate::source::{SourceAddress, SourceKind};
use crate::version::resolve_version;

/// One declared module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSpec {
    pub name: String,
    pub source: String,
    /// Exact token, range expression, or empty for the kind's default.
    #[serde(default)]
    pub version: String,
    /// Sub-directory of the fetched tree to keep.
    #[serde(default)]
    pub path: String,
}

/// A module after classification and version resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedModule {
    pub name: String,
    pub kind: SourceKind,
    /// Fetchable source; registry coordinates are replaced by their download
    /// location.
    pub source: String,
    /// Empty when the remote's default revision was used.
    pub version: String,
    pub subdir: String,
    pub destination: PathBuf,
}

/// Lifecycle of one module's task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Classifying,
    Resolving,
    Fetching,
    ExtractingSubpath,
    CleaningUp,
    Done,
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModuleState::Classifying => "classifying",
            ModuleState::Resolving => "resolving",
            ModuleState::Fetching => "fetching",
            ModuleState::ExtractingSubpath => "extracting_subpath",
            ModuleState::CleaningUp => "cleaning_up",
            ModuleState::Done => "done",
        };
        f.write_str(s)
    }
}

fn transition(module: &str, state: ModuleState) {
    debug!(module = %module, state = %state, "module state");
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct VendorReport {
    pub root: PathBuf,
    /// In declaration order.
    pub modules: Vec<ResolvedModule>,
    pub duration_ms: u64,
}

/// Prefix of the uniquely named scratch directories sub-path modules are
/// fetched into.
const STAGING_PREFIX: &str = ".modvend-staging-";

fn join_subdirs(a: &str, b: &str) -> String {
    match (a.trim_matches('/'), b.trim_matches('/')) {
        ("", b) => b.to_string(),
        (a, "") => a.to_string(),
        (a, b) => format!("{a}/{b}"),
    }
}

/// Drives classification, resolution and fetching for every module.
#[derive(Clone)]
pub struct VendorOrchestrator {
    fetcher: ModuleFetcher,
    tags: Arc<dyn TagLister>,
    registry: Arc<dyn RegistryClient>,
    defaults: DefaultVersions,
}

impl VendorOrchestrator {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        tags: Arc<dyn TagLister>,
        registry: Arc<dyn RegistryClient>,
    ) -> Self {
        Self {
            fetcher: ModuleFetcher::new(fetcher),
            tags,
            registry,
            defaults: DefaultVersions::default(),
        }
    }

    /// Orchestrator wired to the stock fetcher, `git` CLI and HTTP registry.
    pub fn from_settings(settings: &VendorSettings) -> Result<Self> {
        let fetcher = Arc::new(MultiSchemeFetcher::new(FetcherConfig::standard(settings)?));
        let tags = Arc::new(GitCli::new(settings.git_program.clone()));
        let registry = Arc::new(HttpRegistryClient::new(settings)?);
        Ok(Self::new(fetcher, tags, registry))
    }

    pub fn with_default_versions(mut self, defaults: DefaultVersions) -> Self {
        self.defaults = defaults;
        self
    }

    /// Classify `spec` and pin its version.
    pub async fn resolve(&self, spec: &ModuleSpec, root: &Path) -> Result<ResolvedModule> {
        transition(&spec.name, ModuleState::Classifying);
        let address = SourceAddress::parse(&spec.source);
        obs::emit_module_classified(&spec.name, address.kind, &address.subdir);
        let destination = join_within(root, &spec.name)?;
        let subdir = join_subdirs(&address.subdir, &spec.path);

        transition(&spec.name, ModuleState::Resolving);
        let policy = self.defaults.for_kind(address.kind);
        let (source, version) = match address.kind {
            SourceKind::Local => (address.address, String::new()),
            SourceKind::Registry => {
                let coordinate = address.address;
                let version = resolve_version(&spec.version, policy, || {
                    self.registry.list_versions(&coordinate)
                })
                .await?;
                if version.is_empty() {
                    return Err(VendorError::Configuration(format!(
                        "registry module {coordinate} needs a version"
                    )));
                }
                let location = self.registry.resolve_location(&coordinate, &version).await?;
                (location, version)
            }
            SourceKind::Git => {
                let remote = self.fetcher.remote(&address.address)?;
                let version = resolve_version(&spec.version, policy, || {
                    self.tags.list_tags(&remote)
                })
                .await?;
                (address.address, version)
            }
            SourceKind::Generic => {
                let version = resolve_version(&spec.version, policy, || async {
                    Err(VendorError::Configuration(
                        "version ranges need a git or registry source".to_string(),
                    ))
                })
                .await?;
                (address.address, version)
            }
        };
        obs::emit_module_resolved(&spec.name, &source, &version);

        Ok(ResolvedModule {
            name: spec.name.clone(),
            kind: address.kind,
            source,
            version,
            subdir,
            destination,
        })
    }

    /// Resolve and materialise one module under `root`.
    pub async fn vendor_module(&self, spec: &ModuleSpec, root: &Path) -> Result<ResolvedModule> {
        obs::emit_module_started(&spec.name, &spec.source);
        let resolved = self.resolve(spec, root).await?;
        let name = &resolved.name;

        transition(name, ModuleState::Fetching);
        if resolved.subdir.is_empty() {
            self.fetcher
                .fetch(resolved.kind, &resolved.source, &resolved.version, &resolved.destination)
                .await?;
        } else {
            let staging = tempfile::Builder::new()
                .prefix(STAGING_PREFIX)
                .tempdir_in(root)
                .map_err(|e| VendorError::fs(root, e))?;
            let staging_path = staging.path().to_path_buf();
            let extracted = self
                .fetch_subdir(&resolved, &staging_path.join("source"))
                .await;
            let cleaned = staging
                .close()
                .map_err(|e| VendorError::fs(&staging_path, e));
            extracted?;
            cleaned?;
        }

        transition(name, ModuleState::CleaningUp);
        remove_vcs_metadata(&resolved.destination)?;

        METRICS.inc_modules_fetched();
        obs::emit_module_fetched(name, &resolved.destination);
        transition(name, ModuleState::Done);
        Ok(resolved)
    }

    async fn fetch_subdir(&self, resolved: &ResolvedModule, staging: &Path) -> Result<()> {
        self.fetcher
            .fetch(resolved.kind, &resolved.source, &resolved.version, staging)
            .await?;

        transition(&resolved.name, ModuleState::ExtractingSubpath);
        let src = join_within(staging, &resolved.subdir)?;
        let dest = resolved.destination.clone();
        blocking(move || crate::fetcher::fs::copy_dir(&src, &dest)).await
    }

    /// Re-vendor every module into a freshly emptied `root`.
    pub async fn run_all(&self, modules: Vec<ModuleSpec>, root: &Path) -> Result<VendorReport> {
        let started = Instant::now();

        let mut seen = HashSet::new();
        for spec in &modules {
            if !seen.insert(spec.name.as_str()) {
                return Err(VendorError::Configuration(format!(
                    "module {} is declared more than once",
                    spec.name
                )));
            }
        }

        obs::emit_vendor_cleared(root);
        remove_dir_if_exists(root)?;
        std::fs::create_dir_all(root).map_err(|e| VendorError::fs(root, e))?;

        let count = modules.len();
        let mut join_set = JoinSet::new();
        let mut task_names = HashMap::with_capacity(count);
        for (idx, spec) in modules.into_iter().enumerate() {
            let orchestrator = self.clone();
            let root = root.to_path_buf();
            let span = obs::module_span(&spec.name);
            let name = spec.name.clone();
            let handle = join_set.spawn(
                async move {
                    let result = orchestrator.vendor_module(&spec, &root).await;
                    (idx, result)
                }
                .instrument(span),
            );
            task_names.insert(handle.id(), name);
        }

        let mut resolved: Vec<Option<ResolvedModule>> = vec![None; count];
        while let Some(joined) = join_set.join_next_with_id().await {
            let (id, outcome) = match joined {
                Ok((id, (idx, result))) => (id, result.map(|module| (idx, module))),
                Err(e) => (
                    e.id(),
                    Err(VendorError::Fetch(format!("module task failed: {e}"))),
                ),
            };
            let name = task_names.get(&id).map(String::as_str).unwrap_or_default();
            match outcome {
                Ok((idx, module)) => resolved[idx] = Some(module),
                Err(err) => {
                    obs::emit_module_failed(name, &err);
                    join_set.detach_all();
                    METRICS.flush();
                    return Err(err.for_module(name));
                }
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        obs::emit_vendor_finished(root, count, duration_ms);
        METRICS.flush();
        Ok(VendorReport {
            root: root.to_path_buf(),
            modules: resolved.into_iter().flatten().collect(),
            duration_ms,
        })
    }
}
