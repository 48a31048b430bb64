//! WebSocket protocol messages
//!
//! Paths on the wire are always relative to the logged-in user's home
//! directory. The empty string is the home directory itself.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize, Serializer};

/// Messages sent from a browser/client to the server
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Hello {
        client_version: String,
    },
    /// Heartbeat ping
    Ping,
    Login {
        username: String,
        password: String,
    },
    Signup {
        username: String,
        password: String,
    },
    ChangePassword {
        username: String,
        old_password: String,
        new_password: String,
    },
    Logout,
    // ---- File system requests ----
    ListDirectory {
        request_id: String,
        #[serde(default)]
        path: Option<String>,
    },
    GetFileInfo {
        request_id: String,
        path: String,
    },
    CreateFolder {
        request_id: String,
        #[serde(default)]
        parent: Option<String>,
        name: String,
    },
    CreateFile {
        request_id: String,
        #[serde(default)]
        parent: Option<String>,
        name: String,
    },
    UploadFile {
        request_id: String,
        #[serde(default)]
        parent: Option<String>,
        file_name: String,
        content_base64: String,
    },
    /// Open a text file for editing
    ReadFile {
        request_id: String,
        path: String,
    },
    SaveFile {
        request_id: String,
        path: String,
        content: String,
    },
    DeleteFile {
        request_id: String,
        path: String,
    },
    DeleteFolder {
        request_id: String,
        path: String,
    },
    RenamePath {
        request_id: String,
        path: String,
        new_name: String,
    },
    DownloadFile {
        request_id: String,
        path: String,
        #[serde(default)]
        chunk_size: Option<u64>,
    },
    Search {
        request_id: String,
        query: String,
        #[serde(default)]
        path: Option<String>,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        server_version: String,
        authenticated: bool,
    },
    Pong,
    AuthResult {
        action: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        message: String,
    },
    Error {
        code: String,
        message: String,
    },
    DirectoryListing {
        request_id: String,
        path: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        parent: Option<String>,
        breadcrumbs: Vec<BreadcrumbItem>,
        folders: Vec<EntryMetadata>,
        files: Vec<EntryMetadata>,
    },
    FileInfo {
        request_id: String,
        entry: EntryMetadata,
    },
    FileContent {
        request_id: String,
        path: String,
        content: String,
        encoding: TextEncoding,
    },
    OperationSuccess {
        request_id: String,
        operation: String,
        path: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    OperationError {
        request_id: String,
        operation: String,
        path: String,
        error: FileSystemError,
    },
    SearchResults {
        request_id: String,
        query: String,
        paths: Vec<String>,
    },
    FileChunk {
        request_id: String,
        path: String,
        file_name: String,
        mime_type: String,
        chunk_index: u64,
        total_chunks: u64,
        total_size: u64,
        data: String,
        checksum: String,
        is_last: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    File,
    Folder,
}

/// Display category derived from a file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileCategory {
    Image,
    Document,
    Spreadsheet,
    Presentation,
    Archive,
    Code,
    Executable,
    Other,
}

/// Encoding a text file was decoded with when opened for editing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextEncoding {
    Utf8,
    Utf16,
    Latin1,
}

/// Snapshot of a single directory entry, rebuilt on every listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub name: String,
    /// Home-relative path
    pub path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(rename = "size", serialize_with = "size_or_dash", skip_deserializing)]
    pub size_bytes: Option<u64>,
    #[serde(serialize_with = "format_modified", skip_deserializing)]
    pub modified: Option<DateTime<Local>>,
    pub category: FileCategory,
}

pub const MODIFIED_FORMAT: &str = "%d/%m/%Y %H:%M";

fn size_or_dash<S: Serializer>(size: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
    match size {
        Some(bytes) => serializer.serialize_u64(*bytes),
        None => serializer.serialize_str("-"),
    }
}

fn format_modified<S: Serializer>(
    modified: &Option<DateTime<Local>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match modified {
        Some(time) => serializer.serialize_str(&time.format(MODIFIED_FORMAT).to_string()),
        None => serializer.serialize_str("-"),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreadcrumbItem {
    pub label: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum FileSystemError {
    #[error("access denied: {path}")]
    AccessDenied { path: String },
    #[error("not found: {path}")]
    NotFound { path: String },
    #[error("already exists: {path}")]
    AlreadyExists { path: String },
    #[error("invalid name: {name:?}")]
    InvalidName { name: String },
    #[error("only text files can be edited: {path}")]
    UnsupportedType { path: String },
    #[error("not a directory: {path}")]
    NotADirectory { path: String },
    #[error("not a file: {path}")]
    NotAFile { path: String },
    #[error("file too large: {path} ({size} > {max_size} bytes)")]
    FileTooLarge { path: String, size: u64, max_size: u64 },
    #[error("please log in first")]
    Unauthorized,
    #[error("i/o error: {message}")]
    IoError { message: String },
}

impl FileSystemError {
    /// Classify an I/O failure against the path the caller asked for.
    pub fn io(err: &std::io::Error, path: impl Into<String>) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => FileSystemError::NotFound { path: path.into() },
            std::io::ErrorKind::AlreadyExists => {
                FileSystemError::AlreadyExists { path: path.into() }
            }
            _ => FileSystemError::IoError {
                message: err.to_string(),
            },
        }
    }

    /// Client-facing form of the error. With `conceal` set, a confinement
    /// violation reads exactly like a missing path.
    pub fn public(self, conceal: bool) -> Self {
        match self {
            FileSystemError::AccessDenied { path } if conceal => FileSystemError::NotFound { path },
            other => other,
        }
    }
}
