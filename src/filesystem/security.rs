use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use path_jail::Jail;

use crate::protocol::FileSystemError;

use super::config::FileSystemConfig;

const MAX_NAME_BYTES: usize = 255;

/// A user's home directory under the shared root, canonicalized.
#[derive(Clone)]
pub struct UserRoot {
    username: String,
    path: PathBuf,
    jail: Arc<Jail>,
}

impl UserRoot {
    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The home directory itself as a confined path.
    pub fn home(&self) -> ConfinedPath {
        ConfinedPath::new(&self.path, self.path.clone())
    }

    /// Segment-wise containment of an existing canonical path.
    fn encloses(&self, canonical: &Path) -> bool {
        canonical.starts_with(&self.path) && self.jail.contains(canonical).is_ok()
    }

    /// Containment for a path whose tail does not exist yet.
    fn would_enclose(&self, candidate: &Path) -> bool {
        candidate.starts_with(&self.path)
    }
}

impl fmt::Debug for UserRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserRoot")
            .field("username", &self.username)
            .field("path", &self.path)
            .finish()
    }
}

/// A path proven to be the user's home or one of its descendants. Every
/// segment but possibly the last is canonical; the last is a link itself only
/// when produced by [`PathResolver::resolve_entry`].
///
/// Only [`PathResolver`] (and navigation helpers on an existing
/// `ConfinedPath`) can produce one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfinedPath {
    root: PathBuf,
    path: PathBuf,
}

impl ConfinedPath {
    pub(super) fn new(root: &Path, path: PathBuf) -> Self {
        Self {
            root: root.to_path_buf(),
            path,
        }
    }

    pub fn as_path(&self) -> &Path {
        &self.path
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_root(&self) -> bool {
        self.path == self.root
    }

    /// Path relative to the home directory (empty for the home itself).
    pub fn relative(&self) -> &Path {
        self.path.strip_prefix(&self.root).unwrap_or_else(|_| Path::new(""))
    }

    /// Home-relative path with `/` separators, as shown to clients.
    pub fn display_path(&self) -> String {
        self.relative()
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// Parent directory, or `None` at the home directory.
    pub fn parent(&self) -> Option<ConfinedPath> {
        if self.is_root() {
            return None;
        }
        self.path
            .parent()
            .filter(|p| p.starts_with(&self.root))
            .map(|p| ConfinedPath::new(&self.root, p.to_path_buf()))
    }

    /// Direct child named `name`. The name must be a single plain path segment.
    pub fn child(&self, name: &str) -> Result<ConfinedPath, FileSystemError> {
        validate_segment(name)?;
        Ok(ConfinedPath::new(&self.root, self.path.join(name)))
    }
}

/// Maps user-supplied paths onto canonical locations inside a user's home.
pub struct PathResolver {
    config: Arc<FileSystemConfig>,
}

impl PathResolver {
    pub fn new(config: Arc<FileSystemConfig>) -> Self {
        Self { config }
    }

    /// Open the home directory of `username`, creating it if necessary.
    pub fn provision(&self, username: &str) -> Result<UserRoot, FileSystemError> {
        validate_username(username)?;
        let dir = self.config.root.join(username);
        std::fs::create_dir_all(&dir).map_err(|e| FileSystemError::io(&e, username))?;
        tracing::debug!("Provisioned home for {}", username);
        self.user_root(username)
    }

    /// Open the existing home directory of `username`.
    pub fn user_root(&self, username: &str) -> Result<UserRoot, FileSystemError> {
        validate_username(username)?;
        let dir = self.config.root.join(username);
        let path = dir.canonicalize().map_err(|e| FileSystemError::io(&e, username))?;
        if !path.is_dir() {
            return Err(FileSystemError::NotADirectory {
                path: username.to_string(),
            });
        }
        let jail = Jail::new(&path).map_err(|e| FileSystemError::IoError {
            message: e.to_string(),
        })?;
        Ok(UserRoot {
            username: username.to_string(),
            path,
            jail: Arc::new(jail),
        })
    }

    /// Resolve an existing path. Relative paths are taken from the home
    /// directory; absent or blank input means the home directory.
    pub fn resolve(
        &self,
        root: &UserRoot,
        requested: Option<&str>,
    ) -> Result<ConfinedPath, FileSystemError> {
        let raw = match requested.map(str::trim).filter(|p| !p.is_empty()) {
            Some(raw) => raw,
            None => return Ok(root.home()),
        };

        let joined = join_requested(root.path(), raw);
        match joined.canonicalize() {
            Ok(canonical) => {
                if root.encloses(&canonical) {
                    Ok(ConfinedPath::new(root.path(), canonical))
                } else {
                    tracing::warn!("Rejected path outside home of {}: {}", root.username(), raw);
                    tracing::debug!("Rejected path resolved to {}", canonical.display());
                    Err(FileSystemError::AccessDenied {
                        path: raw.to_string(),
                    })
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Classify the miss: a path that would land outside the home
                // is still an escape attempt even if nothing is there.
                match nearest_canonical(&joined) {
                    Some(candidate) if root.would_enclose(&candidate) => {
                        Err(FileSystemError::NotFound {
                            path: raw.to_string(),
                        })
                    }
                    _ => {
                        tracing::warn!(
                            "Rejected missing path outside home of {}: {}",
                            root.username(),
                            raw
                        );
                        Err(FileSystemError::AccessDenied {
                            path: raw.to_string(),
                        })
                    }
                }
            }
            Err(e) => Err(FileSystemError::io(&e, raw)),
        }
    }

    /// Resolve a path that may not exist yet (save targets). An existing path
    /// is resolved as usual; otherwise the parent must exist and be a directory.
    pub fn resolve_target(
        &self,
        root: &UserRoot,
        requested: &str,
    ) -> Result<ConfinedPath, FileSystemError> {
        match self.resolve(root, Some(requested)) {
            Err(FileSystemError::NotFound { .. }) => {}
            other => return other,
        }

        let (parent_raw, name) = split_entry(requested.trim())?;
        let parent = self.resolve_parent(root, &parent_raw)?;
        parent.child(&name)
    }

    /// Resolve the entry itself rather than what it points to (delete and
    /// rename). The parent is canonicalized and confined; a symlink in the
    /// last segment is returned as the link, not its target.
    pub fn resolve_entry(
        &self,
        root: &UserRoot,
        requested: &str,
    ) -> Result<ConfinedPath, FileSystemError> {
        let requested = requested.trim();
        match Path::new(requested).components().next_back() {
            None => return Ok(root.home()),
            Some(Component::Normal(_)) => {}
            // `..`, `/` and the like name a real directory, never a link.
            Some(_) => return self.resolve(root, Some(requested)),
        }

        let (parent_raw, name) = split_entry(requested)?;
        let parent = self.resolve_parent(root, &parent_raw)?;
        let entry = parent.child(&name)?;
        std::fs::symlink_metadata(entry.as_path())
            .map_err(|e| FileSystemError::io(&e, requested))?;
        Ok(entry)
    }

    fn resolve_parent(
        &self,
        root: &UserRoot,
        parent_raw: &str,
    ) -> Result<ConfinedPath, FileSystemError> {
        let parent = self.resolve(root, Some(parent_raw))?;
        if !parent.as_path().is_dir() {
            return Err(FileSystemError::NotADirectory {
                path: parent_raw.to_string(),
            });
        }
        Ok(parent)
    }
}

/// Split a requested path into its parent and a final plain segment.
fn split_entry(requested: &str) -> Result<(String, String), FileSystemError> {
    let path = Path::new(requested);
    let name = match path.components().next_back() {
        Some(Component::Normal(name)) => name.to_string_lossy().to_string(),
        _ => {
            return Err(FileSystemError::InvalidName {
                name: requested.to_string(),
            })
        }
    };
    let parent = path
        .parent()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default();
    Ok((parent, name))
}

/// Reduce a user-supplied name to `[A-Za-z0-9_.-]`, replacing anything else
/// with `_`. Runs of dots collapse to one and leading/trailing `_`/`.` are
/// trimmed, so the result is never `.`/`..` and never contains a separator.
/// May return an empty string; callers reject that as an invalid name.
pub fn sanitize_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.trim().chars() {
        let mapped = if ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '-') {
            ch
        } else {
            '_'
        };
        if mapped == '.' && out.ends_with('.') {
            continue;
        }
        out.push(mapped);
    }

    let mut trimmed = trim_separators(&out).to_string();
    if trimmed.len() > MAX_NAME_BYTES {
        trimmed.truncate(MAX_NAME_BYTES);
        trimmed = trim_separators(&trimmed).to_string();
    }
    trimmed
}

fn trim_separators(name: &str) -> &str {
    name.trim_matches(|c| c == '_' || c == '.')
}

fn validate_username(username: &str) -> Result<(), FileSystemError> {
    if username.is_empty() || sanitize_name(username) != username {
        return Err(FileSystemError::InvalidName {
            name: username.to_string(),
        });
    }
    Ok(())
}

/// A name usable as one directory entry: non-empty, one normal segment.
pub fn validate_segment(name: &str) -> Result<(), FileSystemError> {
    let invalid = || FileSystemError::InvalidName {
        name: name.to_string(),
    };
    if name.is_empty() || name.contains(['/', '\\', '\0']) {
        return Err(invalid());
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(invalid()),
    }
}

fn join_requested(root: &Path, raw: &str) -> PathBuf {
    let requested = Path::new(raw);
    if requested.is_absolute() {
        requested.to_path_buf()
    } else {
        root.join(requested)
    }
}

/// Canonicalize the deepest existing ancestor of a lexically normalized path
/// and re-attach the missing tail.
fn nearest_canonical(path: &Path) -> Option<PathBuf> {
    let normalized = normalize_lexically(path);
    let existing = normalized.ancestors().find(|p| p.exists())?;
    let canonical = existing.canonicalize().ok()?;
    let tail = normalized.strip_prefix(existing).ok()?;
    Some(canonical.join(tail))
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_spaces_and_punctuation() {
        assert_eq!(sanitize_name("My Report!!2024"), "My_Report__2024");
        assert_eq!(sanitize_name("notes-v1.2.txt"), "notes-v1.2.txt");
    }

    #[test]
    fn sanitize_strips_traversal_tokens() {
        assert_eq!(sanitize_name(".."), "");
        assert_eq!(sanitize_name("../../etc/passwd"), "etc_passwd");
        assert_eq!(sanitize_name("a\\b/c"), "a_b_c");
        assert!(!sanitize_name("x..y").contains(".."));
    }

    #[test]
    fn sanitize_is_idempotent() {
        for raw in [
            "My Report!!2024",
            "  ..hidden.. ",
            "_a_._b_",
            "über cool.TXT",
            "....",
            "normal_name.md",
        ] {
            let once = sanitize_name(raw);
            assert_eq!(sanitize_name(&once), once, "input {:?}", raw);
            assert!(!once.contains('/') && !once.contains('\\'));
        }
    }

    #[test]
    fn sanitize_caps_length() {
        let long = "a".repeat(400);
        assert_eq!(sanitize_name(&long).len(), MAX_NAME_BYTES);
    }

    #[test]
    fn validate_segment_rejects_dots_and_separators() {
        assert!(validate_segment("file.txt").is_ok());
        assert!(validate_segment("").is_err());
        assert!(validate_segment(".").is_err());
        assert!(validate_segment("..").is_err());
        assert!(validate_segment("a/b").is_err());
        assert!(validate_segment("a\\b").is_err());
    }

    #[test]
    fn normalize_lexically_folds_parent_dirs() {
        assert_eq!(
            normalize_lexically(Path::new("/data/alice/../bob/./secret.txt")),
            PathBuf::from("/data/bob/secret.txt")
        );
    }
}
