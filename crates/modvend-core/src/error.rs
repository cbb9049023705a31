//! Error taxonomy for module resolution and fetching.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while classifying, resolving or fetching a module.
#[derive(Debug, Error)]
pub enum VendorError {
    /// The declared module set (or one entry of it) is unusable as written.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No available version satisfies the requested specifier.
    #[error("unable to find a version matching '{specifier}' (candidates: {available:?})")]
    VersionNotFound {
        specifier: String,
        available: Vec<String>,
    },

    /// A version string could not be parsed where one was required.
    #[error("could not get version from string: {0:?}")]
    InvalidVersion(String),

    /// A registry, VCS remote or HTTP endpoint could not be queried.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// The underlying materialize operation failed.
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// A locator names a scheme no getter is configured for.
    #[error("no getter configured for scheme '{0}'")]
    UnsupportedScheme(String),

    /// A copy, move or remove failed.
    #[error("filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A failure attributed to a single declared module.
    #[error("[{module}] {source}")]
    Module {
        module: String,
        #[source]
        source: Box<VendorError>,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl VendorError {
    /// Wrap an io error with the path it occurred at.
    pub fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        VendorError::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Attach the offending module's name.
    pub fn for_module(self, module: &str) -> Self {
        match self {
            already @ VendorError::Module { .. } => already,
            other => VendorError::Module {
                module: module.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// Name of the module this error is attributed to, if any.
    pub fn module(&self) -> Option<&str> {
        match self {
            VendorError::Module { module, .. } => Some(module),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for VendorError {
    fn from(err: reqwest::Error) -> Self {
        VendorError::SourceUnavailable(err.to_string())
    }
}

impl From<zip::result::ZipError> for VendorError {
    fn from(err: zip::result::ZipError) -> Self {
        VendorError::Fetch(format!("zip: {err}"))
    }
}

/// Result type for vendoring operations.
pub type Result<T> = std::result::Result<T, VendorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_not_found_display() {
        let err = VendorError::VersionNotFound {
            specifier: ">= 3.0.0".to_string(),
            available: vec!["1.0.0".to_string(), "2.0.0".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains(">= 3.0.0"));
        assert!(msg.contains("2.0.0"));
    }

    #[test]
    fn test_module_error_carries_name_and_cause() {
        let err = VendorError::Fetch("connection reset".to_string()).for_module("tf-aws-vpc");
        let msg = err.to_string();
        assert!(msg.starts_with("[tf-aws-vpc]"));
        assert!(msg.contains("connection reset"));
        assert_eq!(err.module(), Some("tf-aws-vpc"));
    }

    #[test]
    fn test_for_module_does_not_double_wrap() {
        let err = VendorError::Configuration("x".to_string())
            .for_module("a")
            .for_module("b");
        assert_eq!(err.module(), Some("a"));
    }

    #[test]
    fn test_filesystem_error_includes_path() {
        let err = VendorError::fs(
            "/tmp/vendor/a",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().contains("/tmp/vendor/a"));
    }
}
