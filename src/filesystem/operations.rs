use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use walkdir::WalkDir;

use crate::protocol::{FileSystemError, TextEncoding};

use super::config::FileSystemConfig;
use super::mime;
use super::security::ConfinedPath;

const TEMP_PREFIX_BYTES: usize = 64;

/// Text of a file opened for editing
#[derive(Debug, Clone)]
pub struct EditableText {
    pub content: String,
    pub encoding: TextEncoding,
}

/// An open file ready to be streamed to the caller as an attachment
pub struct FileDownload {
    pub name: String,
    pub size: u64,
    file: fs::File,
}

impl FileDownload {
    /// Read up to `chunk_size` bytes; `None` once the file is exhausted.
    pub async fn next_chunk(&mut self, chunk_size: usize) -> std::io::Result<Option<Vec<u8>>> {
        let mut buffer = Vec::with_capacity(chunk_size);
        let read = (&mut self.file)
            .take(chunk_size as u64)
            .read_to_end(&mut buffer)
            .await?;
        if read == 0 {
            Ok(None)
        } else {
            Ok(Some(buffer))
        }
    }
}

/// File and folder mutations on already-confined paths.
///
/// Every method takes a [`ConfinedPath`]; confinement is the resolver's job
/// and is never re-derived here.
#[derive(Clone)]
pub struct FileOperations {
    config: Arc<FileSystemConfig>,
}

impl FileOperations {
    pub fn new(config: Arc<FileSystemConfig>) -> Self {
        Self { config }
    }

    /// Create `parent/name`. An existing folder of that name is left as is.
    pub async fn create_folder(
        &self,
        parent: &ConfinedPath,
        name: &str,
    ) -> Result<ConfinedPath, FileSystemError> {
        let target = parent.child(name)?;
        ensure_directory(parent).await?;

        match fs::create_dir(target.as_path()).await {
            Ok(()) => {
                tracing::debug!("Created folder {:?}", target.display_path());
                Ok(target)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                match fs::symlink_metadata(target.as_path()).await {
                    Ok(meta) if meta.is_dir() => Ok(target),
                    _ => Err(FileSystemError::AlreadyExists {
                        path: target.display_path(),
                    }),
                }
            }
            Err(e) => Err(FileSystemError::io(&e, target.display_path())),
        }
    }

    /// Create an empty file; fails if anything already has that name.
    pub async fn create_file(
        &self,
        parent: &ConfinedPath,
        name: &str,
    ) -> Result<ConfinedPath, FileSystemError> {
        let target = parent.child(name)?;
        ensure_directory(parent).await?;

        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(target.as_path())
            .await
            .map_err(|e| FileSystemError::io(&e, target.display_path()))?;

        tracing::debug!("Created file {:?}", target.display_path());
        Ok(target)
    }

    /// Stream `reader` into `parent/name`, replacing any existing file.
    /// Returns the stored path and the number of bytes written.
    pub async fn upload_file<R>(
        &self,
        parent: &ConfinedPath,
        name: &str,
        reader: R,
    ) -> Result<(ConfinedPath, u64), FileSystemError>
    where
        R: AsyncRead + Unpin,
    {
        let target = parent.child(name)?;
        ensure_directory(parent).await?;
        ensure_not_directory(&target).await?;

        let written = write_atomically(&target, reader, self.config.max_upload_size).await?;
        tracing::info!("Stored upload {:?} ({} bytes)", target.display_path(), written);
        Ok((target, written))
    }

    /// Read a text file from the editable allow-list.
    pub async fn read_file_for_edit(
        &self,
        path: &ConfinedPath,
    ) -> Result<EditableText, FileSystemError> {
        let metadata = fs::metadata(path.as_path())
            .await
            .map_err(|e| FileSystemError::io(&e, path.display_path()))?;
        if !metadata.is_file() {
            return Err(FileSystemError::NotAFile {
                path: path.display_path(),
            });
        }
        if !mime::is_editable(&path.name(), &self.config.editable_extensions) {
            return Err(FileSystemError::UnsupportedType {
                path: path.display_path(),
            });
        }
        if metadata.len() > self.config.max_edit_size {
            return Err(FileSystemError::FileTooLarge {
                path: path.display_path(),
                size: metadata.len(),
                max_size: self.config.max_edit_size,
            });
        }

        let buffer = fs::read(path.as_path())
            .await
            .map_err(|e| FileSystemError::io(&e, path.display_path()))?;
        let (content, encoding) = decode_text_buffer(&buffer);
        Ok(EditableText { content, encoding })
    }

    /// Overwrite (or create) a file with `content` encoded as UTF-8.
    pub async fn save_file(&self, path: &ConfinedPath, content: &str) -> Result<(), FileSystemError> {
        if path.name().is_empty() {
            return Err(FileSystemError::InvalidName {
                name: path.display_path(),
            });
        }
        ensure_not_directory(path).await?;

        let written = write_atomically(path, content.as_bytes(), u64::MAX).await?;
        tracing::debug!("Saved {:?} ({} bytes)", path.display_path(), written);
        Ok(())
    }

    pub async fn delete_file(&self, path: &ConfinedPath) -> Result<(), FileSystemError> {
        let metadata = fs::symlink_metadata(path.as_path())
            .await
            .map_err(|e| FileSystemError::io(&e, path.display_path()))?;
        if metadata.is_dir() {
            return Err(FileSystemError::NotAFile {
                path: path.display_path(),
            });
        }

        fs::remove_file(path.as_path())
            .await
            .map_err(|e| FileSystemError::io(&e, path.display_path()))?;
        tracing::info!("Deleted file {:?}", path.display_path());
        Ok(())
    }

    /// Recursively remove a folder. Entries that disappear concurrently are
    /// skipped; anything removed before a failure stays removed.
    pub async fn delete_folder(&self, path: &ConfinedPath) -> Result<(), FileSystemError> {
        if path.is_root() {
            return Err(FileSystemError::AccessDenied {
                path: path.display_path(),
            });
        }
        let metadata = fs::symlink_metadata(path.as_path())
            .await
            .map_err(|e| FileSystemError::io(&e, path.display_path()))?;
        // A linked folder loses the link only; its target is left alone.
        if metadata.file_type().is_symlink() && path.as_path().is_dir() {
            fs::remove_file(path.as_path())
                .await
                .map_err(|e| FileSystemError::io(&e, path.display_path()))?;
            tracing::info!("Deleted folder link {:?}", path.display_path());
            return Ok(());
        }
        if !metadata.is_dir() {
            return Err(FileSystemError::NotADirectory {
                path: path.display_path(),
            });
        }

        let dir = path.as_path().to_path_buf();
        let removed = tokio::task::spawn_blocking(move || remove_tree(&dir))
            .await
            .map_err(|e| FileSystemError::IoError {
                message: e.to_string(),
            })?
            .map_err(|e| FileSystemError::io(&e, path.display_path()))?;

        tracing::info!("Deleted folder {:?} ({} entries)", path.display_path(), removed);
        Ok(())
    }

    /// Rename a file or folder within its parent directory.
    pub async fn rename_path(
        &self,
        path: &ConfinedPath,
        new_name: &str,
    ) -> Result<ConfinedPath, FileSystemError> {
        let parent = path.parent().ok_or_else(|| FileSystemError::AccessDenied {
            path: path.display_path(),
        })?;
        let target = parent.child(new_name)?;

        if fs::symlink_metadata(path.as_path()).await.is_err() {
            return Err(FileSystemError::NotFound {
                path: path.display_path(),
            });
        }
        if fs::symlink_metadata(target.as_path()).await.is_ok() {
            return Err(FileSystemError::AlreadyExists {
                path: target.display_path(),
            });
        }

        fs::rename(path.as_path(), target.as_path())
            .await
            .map_err(|e| FileSystemError::io(&e, path.display_path()))?;
        tracing::info!(
            "Renamed {:?} to {:?}",
            path.display_path(),
            target.display_path()
        );
        Ok(target)
    }

    /// Open a file for streaming to the caller.
    pub async fn download_file(&self, path: &ConfinedPath) -> Result<FileDownload, FileSystemError> {
        let metadata = fs::metadata(path.as_path())
            .await
            .map_err(|e| FileSystemError::io(&e, path.display_path()))?;
        if !metadata.is_file() {
            return Err(FileSystemError::NotAFile {
                path: path.display_path(),
            });
        }

        let file = fs::File::open(path.as_path())
            .await
            .map_err(|e| FileSystemError::io(&e, path.display_path()))?;
        Ok(FileDownload {
            name: path.name(),
            size: metadata.len(),
            file,
        })
    }
}

async fn ensure_directory(path: &ConfinedPath) -> Result<(), FileSystemError> {
    let metadata = fs::metadata(path.as_path())
        .await
        .map_err(|e| FileSystemError::io(&e, path.display_path()))?;
    if !metadata.is_dir() {
        return Err(FileSystemError::NotADirectory {
            path: path.display_path(),
        });
    }
    Ok(())
}

async fn ensure_not_directory(path: &ConfinedPath) -> Result<(), FileSystemError> {
    match fs::symlink_metadata(path.as_path()).await {
        Ok(meta) if meta.is_dir() => Err(FileSystemError::NotAFile {
            path: path.display_path(),
        }),
        _ => Ok(()),
    }
}

/// Write into a sibling temp file and rename it over the target, so readers
/// see either the old or the new content.
async fn write_atomically<R>(
    target: &ConfinedPath,
    reader: R,
    max_size: u64,
) -> Result<u64, FileSystemError>
where
    R: AsyncRead + Unpin,
{
    let temp_path = temp_sibling(target.as_path());
    let io_err = |e: std::io::Error| FileSystemError::IoError {
        message: e.to_string(),
    };

    let result: Result<u64, FileSystemError> = async {
        let mut file = fs::File::create(&temp_path).await.map_err(io_err)?;
        let mut limited = reader.take(max_size.saturating_add(1));
        let written = tokio::io::copy(&mut limited, &mut file).await.map_err(io_err)?;
        if written > max_size {
            return Err(FileSystemError::FileTooLarge {
                path: target.display_path(),
                size: written,
                max_size,
            });
        }
        file.flush().await.map_err(io_err)?;
        file.sync_all().await.map_err(io_err)?;
        drop(file);
        fs::rename(&temp_path, target.as_path()).await.map_err(io_err)?;
        Ok(written)
    }
    .await;

    if result.is_err() {
        let _ = fs::remove_file(&temp_path).await;
    }
    result
}

/// Hidden sibling named after a bounded prefix of the target, so the temp
/// name stays within filesystem limits for any name the target can have.
fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    let mut end = name.len().min(TEMP_PREFIX_BYTES);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    path.with_file_name(format!(".{}.tmp-{}", &name[..end], uuid::Uuid::new_v4()))
}

/// Depth-first, children before parents. Vanished entries are not errors.
fn remove_tree(root: &Path) -> std::io::Result<usize> {
    let mut removed = 0;
    for entry in WalkDir::new(root).follow_links(false).contents_first(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if is_vanished(e.io_error()) => continue,
            Err(e) => return Err(e.into()),
        };

        let result = if entry.file_type().is_dir() {
            std::fs::remove_dir(entry.path())
        } else {
            std::fs::remove_file(entry.path())
        };
        match result {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(removed)
}

fn is_vanished(err: Option<&std::io::Error>) -> bool {
    err.map(|e| e.kind() == ErrorKind::NotFound).unwrap_or(false)
}

/// UTF-8 first, then BOM-marked UTF-16, then Latin-1 which never fails.
fn decode_text_buffer(buffer: &[u8]) -> (String, TextEncoding) {
    if let Ok(content) = std::str::from_utf8(buffer) {
        return (content.to_string(), TextEncoding::Utf8);
    }

    let utf16 = if buffer.starts_with(&[0xFF, 0xFE]) {
        Some(
            buffer[2..]
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .collect::<Vec<_>>(),
        )
    } else if buffer.starts_with(&[0xFE, 0xFF]) {
        Some(
            buffer[2..]
                .chunks_exact(2)
                .map(|c| u16::from_be_bytes([c[0], c[1]]))
                .collect::<Vec<_>>(),
        )
    } else {
        None
    };
    if let Some(content) = utf16.and_then(|units| String::from_utf16(&units).ok()) {
        return (content, TextEncoding::Utf16);
    }

    (
        buffer.iter().map(|&b| char::from(b)).collect(),
        TextEncoding::Latin1,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_prefers_utf8() {
        let (text, encoding) = decode_text_buffer("héllo".as_bytes());
        assert_eq!(text, "héllo");
        assert_eq!(encoding, TextEncoding::Utf8);
    }

    #[test]
    fn decode_falls_back_to_latin1() {
        let (text, encoding) = decode_text_buffer(&[b'c', b'a', b'f', 0xE9]);
        assert_eq!(text, "café");
        assert_eq!(encoding, TextEncoding::Latin1);
    }

    #[test]
    fn decode_reads_utf16_with_bom() {
        let (text, encoding) = decode_text_buffer(&[0xFF, 0xFE, b'h', 0, b'i', 0]);
        assert_eq!(text, "hi");
        assert_eq!(encoding, TextEncoding::Utf16);
    }

    #[test]
    fn temp_sibling_stays_in_same_directory() {
        let temp = temp_sibling(Path::new("/home/alice/notes.txt"));
        assert_eq!(temp.parent(), Some(Path::new("/home/alice")));
        let name = temp.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with(".notes.txt.tmp-"));
    }

    #[test]
    fn temp_sibling_name_is_bounded() {
        let long = "é".repeat(127);
        let temp = temp_sibling(&Path::new("/data").join(&long));
        let name = temp.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.len() <= 1 + TEMP_PREFIX_BYTES + ".tmp-".len() + 36);
        assert!(name.starts_with(".é"));
    }

    #[test]
    fn remove_tree_deletes_nested_contents() {
        let temp = tempfile::TempDir::new().unwrap();
        let dir = temp.path().join("tree");
        std::fs::create_dir_all(dir.join("a/b")).unwrap();
        std::fs::write(dir.join("a/b/c.txt"), "c").unwrap();
        std::fs::write(dir.join("top.txt"), "t").unwrap();

        let removed = remove_tree(&dir).unwrap();
        assert_eq!(removed, 5);
        assert!(!dir.exists());
    }
}
