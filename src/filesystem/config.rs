use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Configuration for the sandboxed user file trees
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSystemConfig {
    /// Shared directory holding one home directory per user
    pub root: PathBuf,

    /// Extensions (without the dot, lowercase) that may be opened in the editor
    pub editable_extensions: Vec<String>,

    /// Maximum file size opened for editing (bytes)
    pub max_edit_size: u64,

    /// Maximum accepted upload size (bytes)
    pub max_upload_size: u64,

    /// Default chunk size for downloads (bytes)
    pub download_chunk_size: u64,

    /// Report confinement violations to clients as plain "not found"
    pub conceal_access_denied: bool,
}

impl Default for FileSystemConfig {
    fn default() -> Self {
        let data = dirs_next::data_dir()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            root: data.join("burrow").join("users"),
            editable_extensions: [
                "txt", "md", "cfg", "conf", "ini", "log", "json", "xml", "yaml", "yml", "py",
                "js", "html", "css", "php",
            ]
            .iter()
            .map(|ext| ext.to_string())
            .collect(),
            max_edit_size: 10 * 1024 * 1024,
            max_upload_size: 100 * 1024 * 1024,
            download_chunk_size: 256 * 1024,
            conceal_access_denied: true,
        }
    }
}
