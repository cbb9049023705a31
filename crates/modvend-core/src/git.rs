//! Git integration via the system `git` executable.
//!
//! Provides the [`TagLister`] capability used to resolve version ranges for
//! git sources, plus the clone/checkout primitives the git getter needs.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Result, VendorError};

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"refs/tags/(.*)").expect("tag pattern is valid"));

/// Enumerates the tags published at a git remote.
#[async_trait]
pub trait TagLister: Send + Sync {
    /// Raw tag names, in no particular order.
    async fn list_tags(&self, source: &str) -> Result<Vec<String>>;
}

/// Extract tag names from `git ls-remote --tags` output.
///
/// Peeled entries (`refs/tags/v1.0.0^{}`) fold into their tag; duplicates
/// are dropped while first-seen order is kept.
pub fn parse_ls_remote_tags(stdout: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for line in stdout.lines() {
        let Some(caps) = TAG_RE.captures(line) else {
            continue;
        };
        let tag = caps[1].trim_end_matches("^{}").to_string();
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    tags
}

/// Turn a module source into something `git` itself accepts: the forced
/// `git::` prefix and any query string are removed.
pub fn remote_url(source: &str) -> &str {
    let s = source.strip_prefix("git::").unwrap_or(source);
    s.split('?').next().unwrap_or(s)
}

/// Thin async wrapper over the `git` command line.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: PathBuf,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new("git")
    }
}

impl GitCli {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, args: &[&str], cwd: Option<&Path>) -> Result<Output> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        debug!(git = ?args, "running git");
        let output = cmd
            .output()
            .await
            .map_err(|e| VendorError::SourceUnavailable(format!("failed to run git: {e}")))?;
        Ok(output)
    }

    fn failure(action: &str, output: &Output) -> String {
        let stderr = String::from_utf8_lossy(&output.stderr);
        format!("git {action} failed: {}", stderr.trim())
    }

    /// `git clone` `url` into `dest`, optionally shallow.
    pub async fn clone_repo(&self, url: &str, dest: &Path, depth: Option<u32>) -> Result<()> {
        let dest_str = dest.to_string_lossy();
        let depth_str = depth.map(|d| d.to_string());
        let mut args = vec!["clone", "--quiet"];
        if let Some(d) = depth_str.as_deref() {
            args.extend(["--depth", d]);
        }
        args.extend(["--", url, dest_str.as_ref()]);

        let output = self.run(&args, None).await?;
        if !output.status.success() {
            return Err(VendorError::Fetch(Self::failure("clone", &output)));
        }
        Ok(())
    }

    /// `git checkout` a tag, branch or commit inside `repo_dir`.
    pub async fn checkout(&self, repo_dir: &Path, reference: &str) -> Result<()> {
        let output = self
            .run(&["checkout", "--quiet", reference], Some(repo_dir))
            .await?;
        if !output.status.success() {
            return Err(VendorError::Fetch(Self::failure("checkout", &output)));
        }
        Ok(())
    }
}

#[async_trait]
impl TagLister for GitCli {
    async fn list_tags(&self, source: &str) -> Result<Vec<String>> {
        let output = self
            .run(&["ls-remote", "--tags", remote_url(source)], None)
            .await?;
        if !output.status.success() {
            return Err(VendorError::SourceUnavailable(Self::failure(
                "ls-remote",
                &output,
            )));
        }
        Ok(parse_ls_remote_tags(&String::from_utf8_lossy(&output.stdout)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::process::Command as StdCommand;

    pub(crate) fn run_git(repo_dir: &Path, args: &[&str]) -> String {
        let output = StdCommand::new("git")
            .args(args)
            .current_dir(repo_dir)
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

    /// Repository with one file per commit and a tag on each commit.
    pub(crate) fn make_tagged_repo(tags: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        run_git(dir.path(), &["init", "--quiet"]);
        run_git(dir.path(), &["config", "user.name", "test-user"]);
        run_git(dir.path(), &["config", "user.email", "test@example.com"]);
        for tag in tags {
            std::fs::write(dir.path().join("main.tf"), format!("# {tag}\n")).unwrap();
            run_git(dir.path(), &["add", "main.tf"]);
            run_git(dir.path(), &["commit", "--quiet", "-m", tag]);
            run_git(dir.path(), &["tag", "-a", tag, "-m", tag]);
        }
        dir
    }

    #[test]
    fn test_parse_ls_remote_tags() {
        let out = "\
0f5e2a4b\trefs/tags/v0.0.2
1a2b3c4d\trefs/tags/v0.1.7
9e8d7c6b\trefs/tags/v0.1.7^{}
deadbeef\trefs/heads/master
";
        assert_eq!(parse_ls_remote_tags(out), vec!["v0.0.2", "v0.1.7"]);
    }

    #[test]
    fn test_remote_url() {
        assert_eq!(
            remote_url("git::https://example.com/vpc.git?ref=v1.0.0"),
            "https://example.com/vpc.git"
        );
        assert_eq!(
            remote_url("git@github.com:org/repo.git"),
            "git@github.com:org/repo.git"
        );
    }

    #[tokio::test]
    async fn test_list_tags_from_local_remote() {
        let repo = make_tagged_repo(&["v0.1.2", "v0.1.7", "v0.2.0"]);
        let mut tags = GitCli::default()
            .list_tags(&repo.path().to_string_lossy())
            .await
            .unwrap();
        tags.sort();
        assert_eq!(tags, vec!["v0.1.2", "v0.1.7", "v0.2.0"]);
    }

    #[tokio::test]
    async fn test_list_tags_missing_remote_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let err = GitCli::default()
            .list_tags(&missing.to_string_lossy())
            .await;
        assert!(matches!(err, Err(VendorError::SourceUnavailable(_))));
    }

    #[tokio::test]
    async fn test_clone_and_checkout_tag() {
        let repo = make_tagged_repo(&["v1.0.0", "v2.0.0"]);
        let work = tempfile::tempdir().unwrap();
        let dest = work.path().join("clone");
        let git = GitCli::default();
        git.clone_repo(&repo.path().to_string_lossy(), &dest, None)
            .await
            .unwrap();
        git.checkout(&dest, "v1.0.0").await.unwrap();
        let content = std::fs::read_to_string(dest.join("main.tf")).unwrap();
        assert_eq!(content, "# v1.0.0\n");
    }

    #[tokio::test]
    async fn test_checkout_unknown_ref_fails() {
        let repo = make_tagged_repo(&["v1.0.0"]);
        let work = tempfile::tempdir().unwrap();
        let dest = work.path().join("clone");
        let git = GitCli::default();
        git.clone_repo(&repo.path().to_string_lossy(), &dest, None)
            .await
            .unwrap();
        let err = git.checkout(&dest, "no-such-ref").await;
        assert!(matches!(err, Err(VendorError::Fetch(_))));
    }
}
