use std::path::PathBuf;
use thiserror::Error;

/// Folder-load failures surfaced to the user as distinct messages.
///
/// The first three are checked before any traversal starts; the last one
/// distinguishes a misconfigured folder from a collection that is still
/// loading. Per-photo failures inside the pipelines are never promoted to
/// this type.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("folder not found: {}", .0.display())]
    FolderNotFound(PathBuf),

    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),

    #[error("no images found in {}", .0.display())]
    NoImagesFound(PathBuf),
}
