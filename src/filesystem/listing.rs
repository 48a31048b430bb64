use chrono::{DateTime, Local};
use tokio::fs;

use crate::protocol::{EntryKind, EntryMetadata, FileCategory, FileSystemError};

use super::mime;
use super::security::ConfinedPath;

/// Direct children of one directory, split by kind.
#[derive(Debug, Default, Clone)]
pub struct Listing {
    pub folders: Vec<EntryMetadata>,
    pub files: Vec<EntryMetadata>,
}

#[derive(Clone, Default)]
pub struct DirectoryLister;

impl DirectoryLister {
    pub fn new() -> Self {
        Self
    }

    /// List immediate children of `dir`. Enumeration failures degrade to an
    /// empty listing; entries that vanish mid-listing are skipped.
    pub async fn list(&self, dir: &ConfinedPath) -> Listing {
        let mut listing = Listing::default();

        let mut read_dir = match fs::read_dir(dir.as_path()).await {
            Ok(read_dir) => read_dir,
            Err(e) => {
                tracing::warn!("Failed to list {:?}: {}", dir.display_path(), e);
                return listing;
            }
        };

        loop {
            let entry = match read_dir.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Listing of {:?} interrupted: {}", dir.display_path(), e);
                    return Listing::default();
                }
            };

            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                tracing::debug!(
                    "Skipping non-UTF-8 entry in {:?}: {:?}",
                    dir.display_path(),
                    entry.file_name()
                );
                continue;
            };
            let child = match dir.child(&name) {
                Ok(child) => child,
                Err(e) => {
                    tracing::debug!("Skipping entry in {:?}: {}", dir.display_path(), e);
                    continue;
                }
            };
            let Some(entry) = describe_child(&child).await else {
                continue;
            };
            match entry.kind {
                EntryKind::Folder => listing.folders.push(entry),
                EntryKind::File => listing.files.push(entry),
            }
        }

        listing.folders.sort_by(|a, b| a.name.cmp(&b.name));
        listing.files.sort_by(|a, b| a.name.cmp(&b.name));
        listing
    }

    /// Metadata for a single confined path.
    pub async fn describe(&self, path: &ConfinedPath) -> Result<EntryMetadata, FileSystemError> {
        let metadata = fs::metadata(path.as_path())
            .await
            .map_err(|e| FileSystemError::io(&e, path.display_path()))?;
        Ok(build_entry(path, &metadata))
    }
}

async fn describe_child(child: &ConfinedPath) -> Option<EntryMetadata> {
    let link_meta = fs::symlink_metadata(child.as_path()).await.ok()?;
    if link_meta.file_type().is_symlink() && !link_stays_home(child).await {
        tracing::debug!("Hiding symlink leaving home: {:?}", child.display_path());
        return None;
    }
    // Dangling symlinks and entries deleted since enumeration drop out here.
    let metadata = fs::metadata(child.as_path()).await.ok()?;
    Some(build_entry(child, &metadata))
}

async fn link_stays_home(child: &ConfinedPath) -> bool {
    match fs::canonicalize(child.as_path()).await {
        Ok(target) => target.starts_with(child.root()),
        Err(_) => false,
    }
}

fn build_entry(path: &ConfinedPath, metadata: &std::fs::Metadata) -> EntryMetadata {
    let name = path.name();
    let is_dir = metadata.is_dir();
    let modified = metadata.modified().ok().map(DateTime::<Local>::from);

    EntryMetadata {
        path: path.display_path(),
        kind: if is_dir { EntryKind::Folder } else { EntryKind::File },
        size_bytes: if is_dir { None } else { Some(metadata.len()) },
        modified,
        category: if is_dir {
            FileCategory::Other
        } else {
            mime::category_for(&name)
        },
        name,
    }
}

