use std::path::PathBuf;

use walkdir::WalkDir;

use crate::protocol::FileSystemError;

use super::security::ConfinedPath;

/// Case-insensitive basename search below a confined directory.
#[derive(Clone, Default)]
pub struct FileSearch;

impl FileSearch {
    pub fn new() -> Self {
        Self
    }

    /// Lazily walk `start` depth-first in file-name order, yielding every file
    /// or folder whose name contains `query`. An empty query walks nothing.
    pub fn matches(&self, start: &ConfinedPath, query: &str) -> SearchMatches {
        let needle = query.trim().to_lowercase();
        let walker = if needle.is_empty() {
            None
        } else {
            Some(
                WalkDir::new(start.as_path())
                    .min_depth(1)
                    .follow_links(false)
                    .sort_by_file_name()
                    .into_iter(),
            )
        };
        SearchMatches {
            root: start.root().to_path_buf(),
            needle,
            walker,
        }
    }

    /// Collect all matches on the blocking pool.
    pub async fn search(
        &self,
        start: &ConfinedPath,
        query: &str,
    ) -> Result<Vec<ConfinedPath>, FileSystemError> {
        let matches = self.matches(start, query);
        if matches.is_exhausted() {
            return Ok(Vec::new());
        }
        tokio::task::spawn_blocking(move || matches.collect())
            .await
            .map_err(|e| FileSystemError::IoError {
                message: e.to_string(),
            })
    }
}

pub struct SearchMatches {
    root: PathBuf,
    needle: String,
    walker: Option<walkdir::IntoIter>,
}

impl SearchMatches {
    /// True when no further traversal will happen.
    pub fn is_exhausted(&self) -> bool {
        self.walker.is_none()
    }
}

impl Iterator for SearchMatches {
    type Item = ConfinedPath;

    fn next(&mut self) -> Option<ConfinedPath> {
        loop {
            let entry = match self.walker.as_mut()?.next() {
                Some(Ok(entry)) => entry,
                // Unreadable or vanished entries are skipped, not fatal.
                Some(Err(e)) => {
                    tracing::debug!("Search skipped entry: {}", e);
                    continue;
                }
                None => {
                    self.walker = None;
                    return None;
                }
            };

            let name = entry.file_name().to_string_lossy().to_lowercase();
            if !name.contains(&self.needle) {
                continue;
            }

            if entry.path_is_symlink() {
                match std::fs::canonicalize(entry.path()) {
                    Ok(target) if target.starts_with(&self.root) => {}
                    _ => continue,
                }
            }

            return Some(ConfinedPath::new(&self.root, entry.into_path()));
        }
    }
}
