use crate::models::UploadDescriptor;
use std::path::Path;
use thiserror::Error;

/// Batch-level rejection raised before anything touches disk.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Maximum {max} files allowed.")]
    TooManyFiles { max: usize, actual: usize },

    #[error("Invalid file type for '{filename}'. Allowed types: {allowed_types}, extensions: {allowed_extensions}")]
    UnsupportedType {
        filename: String,
        allowed_types: String,
        allowed_extensions: String,
    },

    #[error("File '{filename}' exceeds the maximum size of {max_mb} MB")]
    FileTooLarge { filename: String, max_mb: u64 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilenameError {
    #[error("Filename cannot be empty")]
    Empty,

    #[error("Hidden files (starting with '.') are not allowed")]
    Hidden,
}

/// Lowercased text after the last '.', or an empty string when there is none
pub fn file_extension(filename: &str) -> String {
    match filename.rsplit_once('.') {
        Some((_, ext)) => ext.to_lowercase(),
        None => String::new(),
    }
}

/// Media type without parameters, lowercased
pub fn normalize_content_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase()
}

pub fn check_file_count(
    uploads: &[UploadDescriptor],
    max_count: usize,
) -> Result<(), ValidationError> {
    if uploads.len() > max_count {
        return Err(ValidationError::TooManyFiles {
            max: max_count,
            actual: uploads.len(),
        });
    }
    Ok(())
}

/// Either signal is enough: the declared content type or the extension.
pub fn check_file_types(
    uploads: &[UploadDescriptor],
    allowed_types: &[&str],
    allowed_extensions: &[&str],
) -> Result<(), ValidationError> {
    for upload in uploads {
        let type_ok = upload
            .content_type
            .as_deref()
            .map(normalize_content_type)
            .is_some_and(|ct| allowed_types.iter().any(|allowed| *allowed == ct));

        let ext = file_extension(&upload.filename);
        let ext_ok = allowed_extensions.iter().any(|allowed| *allowed == ext);

        if !type_ok && !ext_ok {
            return Err(ValidationError::UnsupportedType {
                filename: upload.filename.clone(),
                allowed_types: allowed_types.join(", "),
                allowed_extensions: allowed_extensions
                    .iter()
                    .map(|ext| format!(".{}", ext))
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        }
    }
    Ok(())
}

/// Uploads without a known size pass here; the staging store caps the bytes
/// it actually writes.
pub fn check_file_sizes(
    uploads: &[UploadDescriptor],
    max_size_bytes: u64,
) -> Result<(), ValidationError> {
    for upload in uploads {
        if upload.size.is_some_and(|size| size > max_size_bytes) {
            return Err(ValidationError::FileTooLarge {
                filename: upload.filename.clone(),
                max_mb: max_size_bytes / (1024 * 1024),
            });
        }
    }
    Ok(())
}

/// Count, type and size checks over the whole batch. The first violation
/// rejects everything.
pub fn validate_uploads(
    uploads: &[UploadDescriptor],
    max_count: usize,
    allowed_types: &[&str],
    allowed_extensions: &[&str],
    max_size_bytes: u64,
) -> Result<(), ValidationError> {
    check_file_count(uploads, max_count)?;
    check_file_types(uploads, allowed_types, allowed_extensions)?;
    check_file_sizes(uploads, max_size_bytes)?;
    Ok(())
}

/// Longest single path component most filesystems accept
pub const MAX_FILENAME_BYTES: usize = 255;

/// Longest prefix of `s` that fits in `max_bytes` without splitting a char
fn truncate_on_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Cut `name` down to `max_bytes`, shortening the stem so the extension
/// survives. Converters pick the input format from it.
fn truncate_keeping_extension(name: &str, max_bytes: usize) -> String {
    if name.len() <= max_bytes {
        return name.to_string();
    }
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && ext.len() + 2 <= max_bytes => {
            let stem = truncate_on_char_boundary(stem, max_bytes - ext.len() - 1);
            format!("{}.{}", stem, ext)
        }
        _ => truncate_on_char_boundary(name, max_bytes).to_string(),
    }
}

/// Sanitizes filename to prevent path traversal and injection attacks.
/// The result fits in `max_bytes`, leaving room for a prefix the caller adds.
/// Returns the sanitized filename or an error if the name is invalid
pub fn sanitize_filename_within(filename: &str, max_bytes: usize) -> Result<String, FilenameError> {
    // Clients on Windows may send backslash-separated paths
    let last_segment = filename.rsplit(['/', '\\']).next().unwrap_or("");
    let name = Path::new(last_segment)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    if name.is_empty() {
        return Err(FilenameError::Empty);
    }

    if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
        tracing::warn!("Path traversal attempt detected: {}", filename);
    }

    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_control()
                || matches!(c, ':' | '*' | '?' | '"' | '<' | '>' | '|' | ';')
            {
                '_'
            } else {
                c
            }
        })
        .collect();

    let sanitized = truncate_keeping_extension(&sanitized, max_bytes);

    if sanitized.starts_with('.') {
        return Err(FilenameError::Hidden);
    }

    Ok(sanitized)
}
