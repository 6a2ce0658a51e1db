//! Filesystem scanning: enumerate candidate image files under a folder
//! with their stat info. Traversal order is not guaranteed stable across
//! runs; sorting is the caller's concern.

pub mod location;

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::LoadError;

/// One candidate image file with its stat info.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub modified: DateTime<Utc>,
    pub size_bytes: u64,
}

/// Recursively enumerate image files under `root`.
///
/// The three directory-level failure modes are checked up front and
/// reported distinctly. A file whose stat fails is logged and skipped;
/// one bad file never aborts the scan.
pub fn scan_folder(root: &Path, extensions: &[String]) -> Result<Vec<ScannedFile>, LoadError> {
    if !root.exists() {
        return Err(LoadError::FolderNotFound(root.to_path_buf()));
    }
    if !root.is_dir() {
        return Err(LoadError::NotADirectory(root.to_path_buf()));
    }
    if std::fs::read_dir(root).is_err() {
        return Err(LoadError::PermissionDenied(root.to_path_buf()));
    }

    let mut files = Vec::new();

    for entry in WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();

        if !path.is_file() {
            continue;
        }

        let Some(ext) = path.extension() else { continue };
        let ext_lower = ext.to_string_lossy().to_lowercase();
        if !extensions.iter().any(|e| e.to_lowercase() == ext_lower) {
            continue;
        }

        match stat_file(path) {
            Ok(file) => files.push(file),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable file");
            }
        }
    }

    Ok(files)
}

fn stat_file(path: &Path) -> std::io::Result<ScannedFile> {
    let metadata = std::fs::metadata(path)?;
    let modified: DateTime<Utc> = metadata.modified()?.into();

    Ok(ScannedFile {
        path: path.to_path_buf(),
        modified,
        size_bytes: metadata.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use tempfile::tempdir;

    fn extensions() -> Vec<String> {
        vec!["jpg".to_string(), "jpeg".to_string(), "png".to_string()]
    }

    #[test]
    fn test_scan_finds_images_recursively() {
        let dir = tempdir().unwrap();

        File::create(dir.path().join("photo1.jpg")).unwrap();
        File::create(dir.path().join("photo2.PNG")).unwrap();
        File::create(dir.path().join("document.txt")).unwrap();

        fs::create_dir(dir.path().join("subdir")).unwrap();
        File::create(dir.path().join("subdir/photo3.jpeg")).unwrap();

        let files = scan_folder(dir.path(), &extensions()).unwrap();
        assert_eq!(files.len(), 3);
    }

    #[test]
    fn test_scan_missing_folder() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");

        match scan_folder(&missing, &extensions()) {
            Err(LoadError::FolderNotFound(path)) => assert_eq!(path, missing),
            other => panic!("expected FolderNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_scan_path_is_a_file() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("photo.jpg");
        File::create(&file_path).unwrap();

        match scan_folder(&file_path, &extensions()) {
            Err(LoadError::NotADirectory(path)) => assert_eq!(path, file_path),
            other => panic!("expected NotADirectory, got {:?}", other),
        }
    }

    #[test]
    fn test_scan_empty_folder_is_ok_but_empty() {
        // The no-images condition is the reconciler's to report; the
        // scanner just returns an empty list.
        let dir = tempdir().unwrap();
        File::create(dir.path().join("notes.txt")).unwrap();

        let files = scan_folder(dir.path(), &extensions()).unwrap();
        assert!(files.is_empty());
    }
}
