//! modvend Core Library
//!
//! Vendors infrastructure modules declared in a YAML vendor file into a
//! local directory: classify each source, pin its version against the
//! published tags or registry versions, and fetch every module concurrently.

pub mod config;
pub mod error;
pub mod fetcher;
pub mod git;
pub mod metrics;
pub mod module;
pub mod obs;
pub mod orchestrator;
pub mod registry;
pub mod source;
pub mod telemetry;
pub mod version;

pub use config::{
    DefaultVersions, ModuleDeclaration, VendorFile, VendorSettings, DEFAULT_VENDOR_DIR,
    DEFAULT_VENDOR_FILE,
};
pub use error::{Result, VendorError};
pub use fetcher::{
    ArchiveFormat, Fetcher, FetcherConfig, GetOutcome, Getter, MultiSchemeFetcher,
};
pub use git::{GitCli, TagLister};
pub use module::ModuleFetcher;
pub use orchestrator::{
    ModuleSpec, ModuleState, ResolvedModule, VendorOrchestrator, VendorReport,
};
pub use registry::{HttpRegistryClient, RegistryClient};
pub use source::{classify, split_subdir, RegistryCoordinate, SourceAddress, SourceKind};
pub use version::{
    resolve_version, select_version, AvailableVersionSet, DefaultVersionPolicy, VersionRange,
    VersionSpecifier,
};

pub use metrics::METRICS;
pub use obs::module_span;
pub use telemetry::init_tracing;

/// modvend version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
