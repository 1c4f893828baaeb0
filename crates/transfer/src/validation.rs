use std::path::{Component, Path};

use crate::session::SourceFile;
use crate::{DEFAULT_MAX_FILE_SIZE, TransferError};

/// Client-side checks applied before a session is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadLimits {
    /// Largest accepted file, in bytes.
    pub max_file_size: u64,
    /// Allow-list of file types; empty accepts everything.
    ///
    /// Entries are extensions (`".pdf"`, `"pdf"`), MIME types whose subtype
    /// names the extension (`"application/pdf"`), or `"*"`.
    pub accepted_file_types: Vec<String>,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            accepted_file_types: Vec::new(),
        }
    }
}

/// Validates a file and title against `limits`.
///
/// Rejects empty titles, empty files, oversized files and types outside the
/// allow-list. Nothing here touches the network.
pub fn validate_upload(
    file: &SourceFile,
    title: &str,
    limits: &UploadLimits,
) -> Result<(), TransferError> {
    if title.trim().is_empty() {
        return Err(TransferError::EmptyTitle);
    }
    if file.size == 0 {
        return Err(TransferError::EmptyFile);
    }
    if file.size > limits.max_file_size {
        return Err(TransferError::FileTooLarge {
            size: file.size,
            max: limits.max_file_size,
        });
    }
    if !is_accepted_type(&file.name, &limits.accepted_file_types) {
        return Err(TransferError::DisallowedType {
            file_name: file.name.clone(),
            accepted: limits.accepted_file_types.join(", "),
        });
    }
    Ok(())
}

/// Returns `true` if `file_name` matches the allow-list.
pub fn is_accepted_type(file_name: &str, accepted: &[String]) -> bool {
    if accepted.is_empty() {
        return true;
    }
    let extension = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    accepted.iter().any(|entry| {
        let entry = entry.trim().to_ascii_lowercase();
        if entry == "*" || entry == "*/*" {
            return true;
        }
        let Some(ext) = extension.as_deref() else {
            return false;
        };
        match entry.split_once('/') {
            Some((_, subtype)) => subtype == ext,
            None => entry.trim_start_matches('.') == ext,
        }
    })
}

/// Validates that a client-supplied file name cannot escape the directory
/// it is stored under.
///
/// Rejects:
/// - Empty names
/// - Absolute paths (Unix `/` or Windows `C:\`)
/// - Parent directory traversal (`..`)
/// - Windows prefix components (`C:`, `\\server`)
/// - Nested paths (only a bare file name is stored)
pub fn validate_file_name(file_name: &str) -> Result<(), TransferError> {
    if file_name.trim().is_empty() {
        return Err(TransferError::InvalidPath("empty file name".into()));
    }

    let path = Path::new(file_name);

    if path.is_absolute() {
        return Err(TransferError::InvalidPath(format!(
            "absolute path not allowed: {file_name}"
        )));
    }

    let mut normal = 0;
    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(TransferError::InvalidPath(format!(
                    "parent directory traversal not allowed: {file_name}"
                )));
            }
            Component::Prefix(_) => {
                return Err(TransferError::InvalidPath(format!(
                    "path prefix not allowed: {file_name}"
                )));
            }
            Component::RootDir => {
                return Err(TransferError::InvalidPath(format!(
                    "absolute path not allowed: {file_name}"
                )));
            }
            Component::CurDir => {}
            Component::Normal(_) => normal += 1,
        }
    }

    if normal != 1 {
        return Err(TransferError::InvalidPath(format!(
            "expected a bare file name: {file_name}"
        )));
    }

    Ok(())
}
