//! Filesystem operations module.
//!
//! This module turns paths given by the user into [`UploadFile`]s:
//! - Expanding directories into the regular files they contain
//! - Reading file content and guessing its MIME type
//! - Checking filenames against the rules of the album upload handler

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::UploadError;
use crate::model::UploadFile;

/// Longest filename (in bytes) the upload handler accepts.
pub const FILENAME_MAX_LENGTH: usize = 100;

/// Characters the upload handler refuses in filenames.
const FORBIDDEN_CHARS: &[char] = &[
    '±', '!', '@', '£', '$', '%', '&', '*', '+', '§', '¡', '€', '#', '¢', '¶', '•', 'ª', 'º',
    '«', '\\', '/', '<', '>', '?', ':', ';', '|', '=', ',',
];

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Check `name` against the backend's filename rules.
///
/// # Errors
/// `InvalidFilename` if the name is empty, longer than
/// [`FILENAME_MAX_LENGTH`] bytes, or contains a forbidden character.
pub fn validate_filename(name: &str) -> Result<(), UploadError> {
    let invalid = |reason: String| UploadError::InvalidFilename {
        name: name.to_string(),
        reason,
    };

    if name.is_empty() {
        return Err(invalid("filename is empty".to_string()));
    }
    if name.len() > FILENAME_MAX_LENGTH {
        return Err(invalid(format!(
            "filename is {} bytes long; the limit is {}",
            name.len(),
            FILENAME_MAX_LENGTH
        )));
    }
    if let Some(c) = name.chars().find(|c| FORBIDDEN_CHARS.contains(c)) {
        return Err(invalid(format!("contains forbidden character {:?}", c)));
    }
    Ok(())
}

/// Guess a MIME type from the file extension.
pub fn guess_content_type(name: &str) -> &'static str {
    let extension = match name.rsplit_once('.') {
        Some((_, ext)) => ext.to_ascii_lowercase(),
        None => return DEFAULT_CONTENT_TYPE,
    };
    match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "heic" => "image/heic",
        "heif" => "image/heif",
        "svg" => "image/svg+xml",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        _ => DEFAULT_CONTENT_TYPE,
    }
}

/// Read one file into memory.
///
/// # Errors
/// `Io` if the file cannot be read, `InvalidFilename` if the path has no
/// UTF-8 filename.
pub fn load_file(path: &Path) -> Result<UploadFile, UploadError> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| UploadError::InvalidFilename {
            name: path.display().to_string(),
            reason: "path has no UTF-8 filename".to_string(),
        })?
        .to_string();

    let data = fs::read(path).map_err(|e| UploadError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let content_type = guess_content_type(&name);
    debug!("loaded {} ({} bytes, {})", name, data.len(), content_type);

    Ok(UploadFile::new(name, content_type, data))
}

/// Expand `paths` into the list of files to upload.
///
/// Files are taken as given. A directory contributes its regular files
/// (not subdirectories), sorted by name. Order across arguments is
/// preserved.
///
/// # Errors
/// `Io` if a path or directory cannot be read.
pub fn collect_files(paths: &[PathBuf]) -> Result<Vec<UploadFile>, UploadError> {
    let mut files = Vec::new();
    for path in paths {
        let metadata = fs::metadata(path).map_err(|e| UploadError::Io {
            path: path.clone(),
            source: e,
        })?;

        if !metadata.is_dir() {
            files.push(load_file(path)?);
            continue;
        }

        let mut entries = Vec::new();
        let read_dir = fs::read_dir(path).map_err(|e| UploadError::Io {
            path: path.clone(),
            source: e,
        })?;
        for entry in read_dir {
            let entry = entry.map_err(|e| UploadError::Io {
                path: path.clone(),
                source: e,
            })?;
            let is_file = entry
                .file_type()
                .map(|t| t.is_file())
                .map_err(|e| UploadError::Io {
                    path: entry.path(),
                    source: e,
                })?;
            if is_file {
                entries.push(entry.path());
            }
        }
        entries.sort();
        debug!("{} contains {} file(s)", path.display(), entries.len());

        for entry in entries {
            files.push(load_file(&entry)?);
        }
    }
    Ok(files)
}
