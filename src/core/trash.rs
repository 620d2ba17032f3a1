// Filesystem side of a confirmed batch delete.

use crate::core::catalog::NativeFileDeleter;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Moves photos into a cleanup directory or removes them outright.
#[derive(Debug, Clone)]
pub enum FsDeleter {
    MoveTo(PathBuf),
    Permanent,
}

impl NativeFileDeleter for FsDeleter {
    fn delete(&self, location: &Path) -> io::Result<Option<PathBuf>> {
        match self {
            FsDeleter::MoveTo(dir) => {
                let dest = free_destination(dir, location)?;
                fs::rename(location, &dest)?;
                log::debug!("Moved {} → {}", location.display(), dest.display());
                Ok(Some(dest))
            }
            FsDeleter::Permanent => fs::remove_file(location).map(|()| None),
        }
    }
}

/// First path under `dir` named after `location` that is not taken yet:
/// `a.jpg`, then `a_1.jpg`, `a_2.jpg` and so on.
fn free_destination(dir: &Path, location: &Path) -> io::Result<PathBuf> {
    let file_name = location
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return Ok(candidate);
    }

    let stem = location
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = location
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    (1..)
        .map(|n| dir.join(format!("{}_{}{}", stem, n, extension)))
        .find(|candidate| !candidate.exists())
        .ok_or_else(|| io::Error::new(io::ErrorKind::AlreadyExists, "no free name left"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_same_name_from_different_folders_both_survive() {
        let temp_dir = TempDir::new().unwrap();
        let cleanup = temp_dir.path().join("cleanup");
        let nested = temp_dir.path().join("nested");
        fs::create_dir_all(&cleanup).unwrap();
        fs::create_dir_all(&nested).unwrap();
        let first = temp_dir.path().join("a.jpg");
        let second = nested.join("a.jpg");
        fs::write(&first, b"first").unwrap();
        fs::write(&second, b"second").unwrap();

        let deleter = FsDeleter::MoveTo(cleanup.clone());
        let first_dest = deleter.delete(&first).unwrap().unwrap();
        let second_dest = deleter.delete(&second).unwrap().unwrap();

        assert_eq!(first_dest, cleanup.join("a.jpg"));
        assert_eq!(second_dest, cleanup.join("a_1.jpg"));
        assert_eq!(fs::read(&first_dest).unwrap(), b"first");
        assert_eq!(fs::read(&second_dest).unwrap(), b"second");
        assert_eq!(fs::read_dir(&cleanup).unwrap().count(), 2);
    }

    #[test]
    fn test_permanent_delete_reports_no_destination() {
        let temp_dir = TempDir::new().unwrap();
        let photo = temp_dir.path().join("gone.png");
        fs::write(&photo, b"x").unwrap();

        let stored = FsDeleter::Permanent.delete(&photo).unwrap();

        assert_eq!(stored, None);
        assert!(!photo.exists());
    }

    #[test]
    fn test_missing_source_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let deleter = FsDeleter::MoveTo(temp_dir.path().to_path_buf());

        assert!(deleter.delete(&temp_dir.path().join("nope.jpg")).is_err());
    }
}
