//! Structured lifecycle events for a vendoring run.
//!
//! Every per-module event carries `module = <name>` so interleaved output
//! from concurrent fetches stays attributable. Filter with `RUST_LOG`.

use std::path::Path;

use tracing::{info, warn};

use crate::source::SourceKind;

/// Span covering one module's unit of work.
pub fn module_span(module: &str) -> tracing::Span {
    tracing::info_span!("modvend.module", module = %module)
}

pub fn emit_vendor_cleared(root: &Path) {
    warn!(event = "vendor.cleared", root = %root.display(), "Removing all modules in {}", root.display());
}

pub fn emit_module_started(module: &str, source: &str) {
    info!(event = "module.started", module = %module, source = %source);
}

pub fn emit_module_classified(module: &str, kind: SourceKind, subdir: &str) {
    tracing::debug!(event = "module.classified", module = %module, kind = %kind, subdir = %subdir);
}

pub fn emit_module_resolved(module: &str, source: &str, version: &str) {
    info!(event = "module.resolved", module = %module, source = %source, version = %version);
}

pub fn emit_module_fetched(module: &str, destination: &Path) {
    info!(event = "module.fetched", module = %module, destination = %destination.display());
}

pub fn emit_module_failed(module: &str, error: &dyn std::fmt::Display) {
    tracing::error!(event = "module.failed", module = %module, error = %error, "[{}] {}", module, error);
}

pub fn emit_vendor_finished(root: &Path, modules: usize, duration_ms: u64) {
    info!(
        event = "vendor.finished",
        root = %root.display(),
        modules = modules,
        duration_ms = duration_ms,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_span_create() {
        let _span = module_span("tf-aws-vpc").entered();
        emit_module_classified("tf-aws-vpc", SourceKind::Git, "");
    }
}
