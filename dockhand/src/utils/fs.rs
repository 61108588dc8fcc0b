//! Blocking filesystem helpers used by the host runtime and artifact store.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Copies a file or directory tree from `src` to `dst`.
///
/// Parent directories of `dst` are created. Symlinks are followed.
pub fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    let metadata = fs::metadata(src)?;
    if metadata.is_dir() {
        fs::create_dir_all(dst)?;
        for entry in fs::read_dir(src)? {
            let entry = entry?;
            copy_tree(&entry.path(), &dst.join(entry.file_name()))?;
        }
    } else {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src, dst)?;
    }
    Ok(())
}

/// Lists regular files under `root`, sorted by path relative to `root`.
///
/// A file `root` yields a single entry with an empty relative path.
pub fn walk_files(root: &Path) -> io::Result<Vec<(PathBuf, PathBuf)>> {
    fn visit(root: &Path, dir: &Path, out: &mut Vec<(PathBuf, PathBuf)>) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                visit(root, &path, out)?;
            } else {
                let relative = path.strip_prefix(root).map(Path::to_path_buf).unwrap_or_default();
                out.push((relative, path));
            }
        }
        Ok(())
    }

    let mut files = Vec::new();
    if root.is_dir() {
        visit(root, root, &mut files)?;
    } else {
        files.push((PathBuf::new(), root.to_path_buf()));
    }
    files.sort();
    Ok(files)
}

/// Removes a file or directory tree if it exists.
pub fn remove_path(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Resolves `path` against `base` and then against the current directory.
///
/// The result is absolute and has no `.` components. `..` is kept.
pub fn resolve_path(base: &Path, path: &Path) -> io::Result<PathBuf> {
    let absolute = std::path::absolute(base.join(path))?;
    Ok(absolute.components().collect())
}

/// Maps an absolute container path under a host root directory.
#[must_use]
pub fn under_root(root: &Path, container_path: &str) -> PathBuf {
    root.join(container_path.trim_start_matches('/'))
}
