//! Runner externals staging
//!
//! The job pod mounts `externals` from the work volume at `/__e`, so the
//! runner's bundled tools (node and friends) are copied next to the
//! workspace before the pod starts.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Source and destination of the externals copy for a runner workspace
///
/// `<workspace>/../../externals` is copied to `<workspace>/../externals`.
pub fn externals_paths(runner_workspace: &Path) -> Option<(PathBuf, PathBuf)> {
    let work_root = runner_workspace.parent()?;
    let runner_root = work_root.parent()?;
    Some((runner_root.join("externals"), work_root.join("externals")))
}

/// Copies the runner externals into the work volume
///
/// # Returns
/// Number of files copied
pub fn copy_externals(runner_workspace: &Path) -> io::Result<usize> {
    let (source, destination) = externals_paths(runner_workspace).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("no externals directory above {}", runner_workspace.display()),
        )
    })?;

    info!(
        "Copying externals from {} to {}",
        source.display(),
        destination.display()
    );
    copy_tree(&source, &destination)
}

/// Recursively copies `source` into `destination`, keeping permissions
pub fn copy_tree(source: &Path, destination: &Path) -> io::Result<usize> {
    let mut copied = 0;

    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(io::Error::other)?;
        let target = destination.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
            fs::set_permissions(&target, entry.metadata()?.permissions())?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
            copied += 1;
        } else {
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }

    debug!("Copied {} entries into {}", copied, destination.display());
    Ok(copied)
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> io::Result<()> {
    let pointee = fs::read_link(link)?;
    if fs::symlink_metadata(target).is_ok() {
        fs::remove_file(target)?;
    }
    std::os::unix::fs::symlink(pointee, target)
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, target: &Path) -> io::Result<()> {
    fs::copy(link, target).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_externals_paths() {
        let (source, destination) =
            externals_paths(Path::new("/home/runner/_work/myrepo")).unwrap();
        assert_eq!(source, Path::new("/home/runner/externals"));
        assert_eq!(destination, Path::new("/home/runner/_work/externals"));

        assert!(externals_paths(Path::new("/")).is_none());
    }

    #[test]
    fn test_copy_externals() {
        let root = tempfile::tempdir().unwrap();
        let externals = root.path().join("externals");
        fs::create_dir_all(externals.join("node20/bin")).unwrap();
        fs::write(externals.join("node20/bin/node"), "#!/bin/sh\n").unwrap();
        fs::write(externals.join("README"), "tools").unwrap();

        let workspace = root.path().join("_work/myrepo");
        fs::create_dir_all(&workspace).unwrap();

        let copied = copy_externals(&workspace).unwrap();
        assert_eq!(copied, 2);

        let staged = root.path().join("_work/externals");
        assert_eq!(fs::read_to_string(staged.join("README")).unwrap(), "tools");
        assert!(staged.join("node20/bin/node").is_file());
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_keeps_mode_and_links() {
        use std::os::unix::fs::PermissionsExt;

        let source = tempfile::tempdir().unwrap();
        let destination = tempfile::tempdir().unwrap();
        let tool = source.path().join("tool");
        fs::write(&tool, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();
        std::os::unix::fs::symlink("tool", source.path().join("tool-link")).unwrap();

        copy_tree(source.path(), destination.path()).unwrap();

        let mode = fs::metadata(destination.path().join("tool"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o755);
        assert_eq!(
            fs::read_link(destination.path().join("tool-link")).unwrap(),
            Path::new("tool")
        );
    }

    #[test]
    fn test_missing_source_fails() {
        let root = tempfile::tempdir().unwrap();
        let workspace = root.path().join("_work/myrepo");
        fs::create_dir_all(&workspace).unwrap();

        assert!(copy_externals(&workspace).is_err());
    }
}
