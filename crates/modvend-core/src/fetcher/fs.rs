use std::fs;
use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{Result, VendorError};

/// Name of the VCS metadata directory stripped from vendored modules.
pub const VCS_METADATA_DIR: &str = ".git";

/// Recursively copy the contents of `src` into `dst`, creating `dst` if
/// needed. File permissions come along with `fs::copy`; symlinks are
/// recreated rather than followed on unix.
pub fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    let meta = fs::metadata(src).map_err(|e| VendorError::fs(src, e))?;
    if !meta.is_dir() {
        return Err(VendorError::Configuration(format!(
            "{} is not a directory",
            src.display()
        )));
    }
    fs::create_dir_all(dst).map_err(|e| VendorError::fs(dst, e))?;

    for entry in WalkDir::new(src).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(src).to_path_buf();
            VendorError::fs(path, e.into())
        })?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| VendorError::Fetch(e.to_string()))?;
        let target = dst.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(|e| VendorError::fs(&target, e))?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target).map_err(|e| VendorError::fs(entry.path(), e))?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> Result<()> {
    let points_to = fs::read_link(link).map_err(|e| VendorError::fs(link, e))?;
    std::os::unix::fs::symlink(points_to, target).map_err(|e| VendorError::fs(target, e))
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, target: &Path) -> Result<()> {
    fs::copy(link, target)
        .map(|_| ())
        .map_err(|e| VendorError::fs(link, e))
}

/// Remove `dir/.git` whether it is a directory (clone) or a file (worktree
/// or submodule pointer). Absent metadata is not an error.
pub fn remove_vcs_metadata(dir: &Path) -> Result<()> {
    let git = dir.join(VCS_METADATA_DIR);
    match fs::symlink_metadata(&git) {
        Ok(meta) if meta.is_dir() => {
            fs::remove_dir_all(&git).map_err(|e| VendorError::fs(&git, e))
        }
        Ok(_) => fs::remove_file(&git).map_err(|e| VendorError::fs(&git, e)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(VendorError::fs(&git, e)),
    }
}

/// Remove `dir` and everything below it. Absent directories are fine.
pub fn remove_dir_if_exists(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(VendorError::fs(dir, e)),
    }
}

/// `base` joined with the relative sub-directory `rel`, refusing anything
/// that would leave `base`.
pub fn join_within(base: &Path, rel: &str) -> Result<PathBuf> {
    let rel = Path::new(rel.trim_matches('/'));
    let mut out = base.to_path_buf();
    for component in rel.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => {
                return Err(VendorError::Configuration(format!(
                    "sub-directory {} escapes the module root",
                    rel.display()
                )))
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn copy_dir_copies_nested_tree() {
        let src = tempfile::tempdir().unwrap();
        write(&src.path().join("main.tf"), "root");
        write(&src.path().join("modules/vpc/main.tf"), "vpc");
        let dst = tempfile::tempdir().unwrap();
        let out = dst.path().join("copy");

        copy_dir(src.path(), &out).unwrap();

        assert_eq!(fs::read_to_string(out.join("main.tf")).unwrap(), "root");
        assert_eq!(
            fs::read_to_string(out.join("modules/vpc/main.tf")).unwrap(),
            "vpc"
        );
    }

    #[cfg(unix)]
    #[test]
    fn copy_dir_preserves_mode_and_symlinks() {
        use std::os::unix::fs::PermissionsExt;

        let src = tempfile::tempdir().unwrap();
        let script = src.path().join("run.sh");
        write(&script, "#!/bin/sh\n");
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        std::os::unix::fs::symlink("run.sh", src.path().join("link.sh")).unwrap();
        let dst = tempfile::tempdir().unwrap();

        copy_dir(src.path(), dst.path()).unwrap();

        let mode = fs::metadata(dst.path().join("run.sh"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o755);
        assert_eq!(
            fs::read_link(dst.path().join("link.sh")).unwrap(),
            Path::new("run.sh")
        );
    }

    #[test]
    fn copy_dir_rejects_file_source() {
        let src = tempfile::tempdir().unwrap();
        let file = src.path().join("main.tf");
        write(&file, "x");
        let err = copy_dir(&file, &src.path().join("out"));
        assert!(matches!(err, Err(VendorError::Configuration(_))));
    }

    #[test]
    fn remove_vcs_metadata_handles_dir_file_and_absent() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join(".git/HEAD"), "ref");
        remove_vcs_metadata(dir.path()).unwrap();
        assert!(!dir.path().join(".git").exists());

        write(&dir.path().join(".git"), "gitdir: ../x");
        remove_vcs_metadata(dir.path()).unwrap();
        assert!(!dir.path().join(".git").exists());

        remove_vcs_metadata(dir.path()).unwrap();
    }

    #[test]
    fn join_within_rejects_parent_components() {
        let base = Path::new("/tmp/vendor/a");
        assert_eq!(
            join_within(base, "modules/vpc/").unwrap(),
            Path::new("/tmp/vendor/a/modules/vpc")
        );
        assert_eq!(join_within(base, "").unwrap(), base);
        assert!(matches!(
            join_within(base, "../b"),
            Err(VendorError::Configuration(_))
        ));
    }

    #[test]
    fn remove_dir_if_exists_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("vendor");
        write(&target.join("a/main.tf"), "x");
        remove_dir_if_exists(&target).unwrap();
        assert!(!target.exists());
        remove_dir_if_exists(&target).unwrap();
    }
}
