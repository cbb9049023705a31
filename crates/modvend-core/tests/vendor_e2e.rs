//! End-to-end vendoring against a local module, a mocked registry and local
//! git remotes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use httpmock::prelude::*;
use modvend_core::{ModuleSpec, VendorError, VendorOrchestrator, VendorSettings};
use serde_json::json;
use url::Url;
use walkdir::WalkDir;

fn run_git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Repository with one commit per tag; returns the commit hash of each.
fn make_repo(tags: &[&str]) -> (tempfile::TempDir, Vec<String>) {
    let dir = tempfile::tempdir().unwrap();
    run_git(dir.path(), &["init", "--quiet"]);
    run_git(dir.path(), &["config", "user.name", "test-user"]);
    run_git(dir.path(), &["config", "user.email", "test@example.com"]);
    let mut commits = Vec::new();
    for tag in tags {
        std::fs::write(dir.path().join("main.tf"), format!("# {tag}\n")).unwrap();
        run_git(dir.path(), &["add", "main.tf"]);
        run_git(dir.path(), &["commit", "--quiet", "-m", tag]);
        run_git(dir.path(), &["tag", "-a", tag, "-m", tag]);
        commits.push(run_git(dir.path(), &["rev-parse", "HEAD"]));
    }
    (dir, commits)
}

fn file_url(path: &Path) -> String {
    Url::from_directory_path(path).unwrap().to_string()
}

/// Relative path -> file content for every file under `root`.
fn snapshot(root: &Path) -> BTreeMap<PathBuf, String> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let rel = e.path().strip_prefix(root).unwrap().to_path_buf();
            (rel, std::fs::read_to_string(e.path()).unwrap())
        })
        .collect()
}

fn has_git_dir(root: &Path) -> bool {
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .any(|e| e.file_name() == ".git")
}

struct Fixture {
    _registry_repo: tempfile::TempDir,
    git_repo: tempfile::TempDir,
    git_commits: Vec<String>,
    server: MockServer,
}

async fn fixture() -> Fixture {
    let (registry_repo, _) = make_repo(&["v1.2.1", "v1.2.2", "v2.1.1", "v2.2.0"]);
    let (git_repo, git_commits) = make_repo(&["v0.1.0", "v0.2.0"]);

    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/v1/modules/org/name/provider/versions");
            then.status(200).json_body(json!({
                "modules": [{
                    "source": "org/name/provider",
                    "versions": [
                        {"version": "1.2.1"},
                        {"version": "1.2.2"},
                        {"version": "2.1.1"},
                        {"version": "2.2.0"}
                    ]
                }]
            }));
        })
        .await;
    let location = format!("git::{}?ref=v1.2.2", file_url(registry_repo.path()));
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/v1/modules/org/name/provider/1.2.2/download");
            then.status(204).header("X-Terraform-Get", location.clone());
        })
        .await;

    Fixture {
        _registry_repo: registry_repo,
        git_repo,
        git_commits,
        server,
    }
}

impl Fixture {
    fn orchestrator(&self) -> VendorOrchestrator {
        let settings = VendorSettings {
            registry_url: Some(format!("{}/v1/modules", self.server.base_url())),
            ..VendorSettings::default()
        };
        VendorOrchestrator::from_settings(&settings).unwrap()
    }

    fn modules(&self) -> Vec<ModuleSpec> {
        vec![
            ModuleSpec {
                name: "local".to_string(),
                source: "./tests/fixtures/module".to_string(),
                ..ModuleSpec::default()
            },
            ModuleSpec {
                name: "registry".to_string(),
                source: "org/name/provider".to_string(),
                version: "1.2.x".to_string(),
                ..ModuleSpec::default()
            },
            ModuleSpec {
                name: "git".to_string(),
                source: format!("git::{}", file_url(self.git_repo.path())),
                version: self.git_commits[0].clone(),
                ..ModuleSpec::default()
            },
        ]
    }
}

#[tokio::test]
async fn vendors_local_registry_and_git_modules() {
    let fx = fixture().await;
    let work = tempfile::tempdir().unwrap();
    let root = work.path().join("vendor/modules");

    let report = fx.orchestrator().run_all(fx.modules(), &root).await.unwrap();

    assert_eq!(report.modules.len(), 3);
    assert_eq!(report.modules[1].version, "1.2.2");
    assert!(std::fs::read_to_string(root.join("local/main.tf"))
        .unwrap()
        .contains("greeting"));
    assert_eq!(
        std::fs::read_to_string(root.join("registry/main.tf")).unwrap(),
        "# v1.2.2\n"
    );
    assert_eq!(
        std::fs::read_to_string(root.join("git/main.tf")).unwrap(),
        "# v0.1.0\n"
    );
    assert!(!has_git_dir(&root));
}

#[tokio::test]
async fn rerun_is_a_full_revend() {
    let fx = fixture().await;
    let work = tempfile::tempdir().unwrap();
    let root = work.path().join("vendor");
    let orchestrator = fx.orchestrator();

    orchestrator.run_all(fx.modules(), &root).await.unwrap();
    let first = snapshot(&root);
    std::fs::write(root.join("stray.tf"), "leftover").unwrap();
    std::fs::create_dir_all(root.join("removed-module")).unwrap();

    orchestrator.run_all(fx.modules(), &root).await.unwrap();

    assert_eq!(snapshot(&root), first);
    assert!(!root.join("removed-module").exists());
}

#[tokio::test]
async fn git_range_resolves_against_remote_tags() {
    let fx = fixture().await;
    let work = tempfile::tempdir().unwrap();
    let module = ModuleSpec {
        name: "ranged".to_string(),
        source: format!("git::{}", file_url(fx.git_repo.path())),
        version: ">= 0.1.0 < 1.0.0".to_string(),
        ..ModuleSpec::default()
    };

    let report = fx
        .orchestrator()
        .run_all(vec![module], work.path())
        .await
        .unwrap();

    assert_eq!(report.modules[0].version, "v0.2.0");
    assert_eq!(
        std::fs::read_to_string(work.path().join("ranged/main.tf")).unwrap(),
        "# v0.2.0\n"
    );
}

#[tokio::test]
async fn unmatched_registry_range_fails_with_module_name() {
    let fx = fixture().await;
    let work = tempfile::tempdir().unwrap();
    let module = ModuleSpec {
        name: "too-new".to_string(),
        source: "org/name/provider".to_string(),
        version: ">= 3.0.0".to_string(),
        ..ModuleSpec::default()
    };

    let err = fx
        .orchestrator()
        .run_all(vec![module], work.path())
        .await
        .unwrap_err();

    assert_eq!(err.module(), Some("too-new"));
    match err {
        VendorError::Module { source, .. } => {
            assert!(matches!(*source, VendorError::VersionNotFound { .. }))
        }
        other => panic!("unexpected error {other:?}"),
    }
}
