use std::path::Path;

use crate::protocol::FileCategory;

/// Lowercased extension without the dot, or empty.
pub fn extension_of(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase()
}

/// Display category for a file name. Display metadata only.
pub fn category_for(name: &str) -> FileCategory {
    match extension_of(name).as_str() {
        "png" | "jpg" | "jpeg" | "gif" | "bmp" | "svg" | "webp" => FileCategory::Image,
        "pdf" | "doc" | "docx" | "txt" | "odt" | "md" | "rtf" => FileCategory::Document,
        "xls" | "xlsx" | "csv" | "ods" => FileCategory::Spreadsheet,
        "ppt" | "pptx" | "odp" => FileCategory::Presentation,
        "zip" | "rar" | "7z" | "tar" | "gz" | "bz2" | "xz" => FileCategory::Archive,
        "py" | "js" | "ts" | "html" | "css" | "cpp" | "java" | "c" | "h" | "php" | "sh"
        | "rs" | "go" => FileCategory::Code,
        "exe" | "msi" | "bat" | "app" | "out" => FileCategory::Executable,
        _ => FileCategory::Other,
    }
}

/// Whether `name` has one of the configured editable extensions.
pub fn is_editable(name: &str, editable_extensions: &[String]) -> bool {
    let ext = extension_of(name);
    !ext.is_empty()
        && editable_extensions
            .iter()
            .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(&ext))
}

/// Detect MIME type from file content and extension
pub fn detect_mime_type(buffer: &[u8], filename: &str) -> String {
    if let Some(kind) = infer::get(buffer) {
        return kind.mime_type().to_string();
    }
    guess_mime_from_extension(filename)
}

/// Guess MIME type based on filename extension
pub fn guess_mime_from_extension(filename: &str) -> String {
    match extension_of(filename).as_str() {
        "txt" | "log" | "cfg" | "conf" | "ini" => "text/plain",
        "md" => "text/markdown",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "js" => "application/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "yaml" | "yml" => "text/x-yaml",
        "py" => "text/x-python",
        "php" => "text/x-php",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
    .to_string()
}
