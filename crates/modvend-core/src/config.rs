//! Vendor file model and runtime settings.
//!
//! The vendor file is YAML: a map of module name to
//! `{source, version?, path?}` plus the reserved keys `vendor_dir` and
//! `default_versions`.
//!
//! ```yaml
//! vendor_dir: vendor/modules
//! default_versions:
//!   git: master
//!   registry: latest
//! tf-aws-vpc:
//!   source: "git@github.com:terraform-aws-modules/terraform-aws-vpc"
//!   version: "v1.46.0"
//! lambda:
//!   source: "claranet/lambda/aws"
//!   version: "~> 0.7"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use std::fmt;

use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Result, VendorError};
use crate::orchestrator::ModuleSpec;
use crate::source::SourceKind;
use crate::version::DefaultVersionPolicy;

/// Destination root used when neither the CLI nor the vendor file names one.
pub const DEFAULT_VENDOR_DIR: &str = "vendor/modules";

/// Vendor file read when the CLI does not name one.
pub const DEFAULT_VENDOR_FILE: &str = "Terrafile";

/// One declared module as written in the vendor file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDeclaration {
    pub source: String,
    #[serde(default, deserialize_with = "scalar_string")]
    pub version: String,
    #[serde(default)]
    pub path: String,
}

/// Read a version as the scalar text written in the file, so `version: 1.10`
/// stays `1.10` rather than round-tripping through a float.
fn scalar_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_str(ScalarStringVisitor)
}

struct ScalarStringVisitor;

impl<'de> Visitor<'de> for ScalarStringVisitor {
    type Value = String;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a version string")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<String, E> {
        Ok(match v {
            "~" | "null" | "Null" | "NULL" => String::new(),
            other => other.to_string(),
        })
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<String, E> {
        Ok(String::new())
    }

    fn visit_none<E: de::Error>(self) -> std::result::Result<String, E> {
        Ok(String::new())
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<String, E> {
        Ok(v.to_string())
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<String, E> {
        Ok(v.to_string())
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<String, E> {
        Ok(v.to_string())
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<String, E> {
        Err(E::custom(format!(
            "version {v} was read as a number; quote it to keep every digit"
        )))
    }
}

/// Per-source-kind meaning of an empty version specifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultVersions {
    pub local: DefaultVersionPolicy,
    pub git: DefaultVersionPolicy,
    pub registry: DefaultVersionPolicy,
    pub generic: DefaultVersionPolicy,
}

impl Default for DefaultVersions {
    fn default() -> Self {
        Self {
            local: DefaultVersionPolicy::RemoteDefault,
            git: DefaultVersionPolicy::RemoteDefault,
            registry: DefaultVersionPolicy::Latest,
            generic: DefaultVersionPolicy::RemoteDefault,
        }
    }
}

impl DefaultVersions {
    pub fn for_kind(&self, kind: SourceKind) -> &DefaultVersionPolicy {
        match kind {
            SourceKind::Local => &self.local,
            SourceKind::Git => &self.git,
            SourceKind::Registry => &self.registry,
            SourceKind::Generic => &self.generic,
        }
    }
}

/// Parsed vendor file.
#[derive(Debug, Clone, Default)]
pub struct VendorFile {
    pub vendor_dir: Option<PathBuf>,
    pub default_versions: DefaultVersions,
    pub modules: BTreeMap<String, ModuleDeclaration>,
}

const VENDOR_DIR_KEY: &str = "vendor_dir";
const DEFAULT_VERSIONS_KEY: &str = "default_versions";

// Module entries are read straight off the YAML deserializer. Buffering them
// (as `#[serde(flatten)]` does) turns unquoted versions into floats.
impl<'de> Deserialize<'de> for VendorFile {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(VendorFileVisitor)
    }
}

struct VendorFileVisitor;

impl<'de> Visitor<'de> for VendorFileVisitor {
    type Value = VendorFile;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of module names to module declarations")
    }

    fn visit_map<A>(self, mut map: A) -> std::result::Result<VendorFile, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut file = VendorFile::default();
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                VENDOR_DIR_KEY => file.vendor_dir = map.next_value()?,
                DEFAULT_VERSIONS_KEY => {
                    file.default_versions = map
                        .next_value::<Option<DefaultVersions>>()?
                        .unwrap_or_default();
                }
                _ => {
                    let decl = map.next_value()?;
                    file.modules.insert(key, decl);
                }
            }
        }
        Ok(file)
    }
}

impl VendorFile {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let file: VendorFile = if yaml.trim().is_empty() {
            VendorFile::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        file.validate()?;
        Ok(file)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path).map_err(|e| VendorError::fs(path, e))?;
        Self::from_yaml_str(&yaml)
    }

    /// Reject names that would escape or alias the destination root, and
    /// entries without a source.
    pub fn validate(&self) -> Result<()> {
        for (name, decl) in &self.modules {
            if name.trim().is_empty()
                || name == "."
                || name == ".."
                || name.contains(['/', '\\'])
            {
                return Err(VendorError::Configuration(format!(
                    "invalid module name {name:?}"
                )));
            }
            if decl.source.trim().is_empty() {
                return Err(VendorError::Configuration(format!(
                    "module {name} has no source"
                )));
            }
        }
        Ok(())
    }

    /// The destination root: the CLI value unless it was left at its default
    /// and the file names one.
    pub fn vendor_dir_or(&self, cli_dir: &Path) -> PathBuf {
        match &self.vendor_dir {
            Some(dir) if cli_dir == Path::new(DEFAULT_VENDOR_DIR) => dir.clone(),
            _ => cli_dir.to_path_buf(),
        }
    }

    pub fn module_specs(&self) -> Vec<ModuleSpec> {
        self.modules
            .iter()
            .map(|(name, decl)| ModuleSpec {
                name: name.clone(),
                source: decl.source.clone(),
                version: decl.version.clone(),
                path: decl.path.clone(),
            })
            .collect()
    }
}

/// Runtime settings that do not belong in the vendor file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorSettings {
    /// Registry modules API base, replacing `https://<host>/v1/modules`.
    pub registry_url: Option<String>,
    pub user_agent: String,
    pub git_program: PathBuf,
}

impl Default for VendorSettings {
    fn default() -> Self {
        Self {
            registry_url: None,
            user_agent: format!("modvend/{}", env!("CARGO_PKG_VERSION")),
            git_program: PathBuf::from("git"),
        }
    }
}

impl VendorSettings {
    /// Defaults overridden by `MODVEND_REGISTRY_URL`, `MODVEND_USER_AGENT`
    /// and `MODVEND_GIT`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            registry_url: std::env::var("MODVEND_REGISTRY_URL")
                .ok()
                .filter(|s| !s.is_empty()),
            user_agent: std::env::var("MODVEND_USER_AGENT").unwrap_or(defaults.user_agent),
            git_program: std::env::var("MODVEND_GIT")
                .map(PathBuf::from)
                .unwrap_or(defaults.git_program),
        }
    }
}
