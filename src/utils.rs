//! Utility functions

use crate::error::{Result, ZincError, ZincIoError};
use serde::{de::DeserializeOwned, Serialize};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

/// Returns the same path config but with canonicalized paths.
///
/// This uses [`dunce`](https://crates.io/crates/dunce) to ensure macOS and
/// Windows UNC paths are automatically stripped.
///
/// On windows this will ensure the path only consists of `/` separators.
pub fn canonicalize(path: impl AsRef<Path>) -> Result<PathBuf, ZincIoError> {
    let path = path.as_ref();
    let res = dunce::canonicalize(path);
    #[cfg(windows)]
    let res = res.map(|p| {
        use path_slash::PathBufExt;
        PathBuf::from(p.to_slash_lossy().as_ref())
    });
    res.map_err(|err| ZincIoError::new(err, path))
}

/// Rewrites `path` from the `from` prefix to the `to` prefix.
///
/// Returns `None` if `path` does not live under `from`.
pub fn rebase_prefix(path: &Path, from: &Path, to: &Path) -> Option<PathBuf> {
    path.strip_prefix(from).ok().map(|tail| to.join(tail))
}

/// Reads the json file and deserialize it into the provided type.
pub fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path).map_err(|err| ZincError::io(err, path))?;
    serde_json::from_slice(&bytes).map_err(Into::into)
}

/// Serializes the provided value to JSON and writes it to a file.
pub fn write_json_file<T: Serialize>(value: &T, path: &Path, capacity: usize) -> Result<()> {
    let file = fs::File::create(path).map_err(|err| ZincError::io(err, path))?;
    let mut writer = std::io::BufWriter::with_capacity(capacity, file);
    serde_json::to_writer(&mut writer, value)?;
    writer.flush().map_err(|e| ZincError::io(e, path))
}

/// Creates the parent directory of the `file` and all its ancestors if it does not exist.
///
/// See [`fs::create_dir_all()`].
pub fn create_parent_dir_all(file: &Path) -> Result<()> {
    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent).map_err(|err| {
            ZincError::msg(format!(
                "Failed to create parent folder \"{}\": {}",
                parent.display(),
                err
            ))
        })?;
    }
    Ok(())
}

/// Removes a file, treating a missing file as success.
pub fn remove_file_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(ZincError::io(err, path)),
    }
}

/// Removes a directory tree, treating a missing directory as success.
pub fn remove_dir_all_if_exists(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(ZincError::io(err, path)),
    }
}

#[cfg(any(test, feature = "test-utils"))]
// <https://doc.rust-lang.org/rust-by-example/std_misc/fs.html>
pub fn touch(path: &std::path::Path) -> std::io::Result<()> {
    match std::fs::OpenOptions::new().create(true).write(true).truncate(false).open(path) {
        Ok(_) => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub fn mkdir_or_touch(tmp: &std::path::Path, paths: &[&str]) {
    for path in paths {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(tmp.join(parent)).unwrap();
        }
        if path.ends_with(".scala") || path.ends_with(".java") || path.ends_with(".class") {
            let path = tmp.join(path);
            touch(&path).unwrap();
        } else {
            let path: PathBuf = tmp.join(path);
            std::fs::create_dir_all(path).unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_rebase_prefix() {
        let path = Path::new("/tmp/ro/a/B.class");
        let rebased = rebase_prefix(path, Path::new("/tmp/ro"), Path::new("/tmp/new")).unwrap();
        assert_eq!(rebased, PathBuf::from("/tmp/new/a/B.class"));
        assert!(rebase_prefix(path, Path::new("/tmp/other"), Path::new("/tmp/new")).is_none());
    }

    #[test]
    fn remove_missing_file_is_ok() {
        let tmp = tempfile::tempdir().unwrap();
        remove_file_if_exists(&tmp.path().join("nope.class")).unwrap();
        remove_dir_all_if_exists(&tmp.path().join("nope")).unwrap();
    }
}
