use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::files::FileReference;
use crate::image::ImagePreview;

pub const REQUEST_FILE_PREFIX: &str = "handback_request_";
pub const RESPONSE_FILE_PREFIX: &str = "handback_response_";

/// Substring swapped to derive the response path. Any file name carrying it
/// is exchangeable, whatever its prefix.
pub const REQUEST_MARKER: &str = "_request_";
pub const RESPONSE_MARKER: &str = "_response_";

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("could not read request file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed exchange payload: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("request file name carries no request marker: {}", .0.display())]
    BadRequestPath(PathBuf),
    #[error("could not write response file {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid request: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRequest {
    pub id: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub full_response: Option<String>,
    #[serde(default)]
    pub predefined_options: Option<Vec<String>>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackResponse {
    pub request_id: String,
    pub user_input: Option<String>,
    pub selected_options: Vec<String>,
    pub images: Vec<ImageAttachment>,
    #[serde(default)]
    pub file_references: Vec<FileReferenceAttachment>,
    pub cancelled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageAttachment {
    pub data: String,
    pub mime_type: String,
}

impl From<&ImagePreview> for ImageAttachment {
    fn from(preview: &ImagePreview) -> Self {
        Self {
            data: preview.data.clone(),
            mime_type: preview.mime_type.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileReferenceAttachment {
    pub display_name: String,
    pub path: String,
    pub is_directory: bool,
}

impl From<&FileReference> for FileReferenceAttachment {
    fn from(reference: &FileReference) -> Self {
        Self {
            display_name: reference.display_name.clone(),
            path: reference.path.clone(),
            is_directory: reference.is_directory,
        }
    }
}

pub fn request_file_name(request_id: &str) -> String {
    format!("{}{}.json", REQUEST_FILE_PREFIX, request_id)
}

pub fn response_file_name(request_id: &str) -> String {
    format!("{}{}.json", RESPONSE_FILE_PREFIX, request_id)
}

/// Replaces the first request marker in the file name. The directory part is
/// left untouched so the response lands next to the request.
pub fn derive_response_path(request_path: &Path) -> Result<PathBuf, ProtocolError> {
    let name = request_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ProtocolError::BadRequestPath(request_path.to_path_buf()))?;

    if !name.contains(REQUEST_MARKER) {
        return Err(ProtocolError::BadRequestPath(request_path.to_path_buf()));
    }

    let response_name = name.replacen(REQUEST_MARKER, RESPONSE_MARKER, 1);
    Ok(request_path.with_file_name(response_name))
}

pub fn read_request(path: &Path) -> Result<FeedbackRequest, ProtocolError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ProtocolError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&raw)?)
}

/// A request must carry something to show. Options, when present, must be a
/// non-empty list of non-blank labels.
pub fn validate_request(request: &FeedbackRequest) -> Result<(), ProtocolError> {
    if request.id.trim().is_empty() {
        return Err(ProtocolError::Invalid("request id is blank".to_string()));
    }

    match &request.message {
        Some(message) if !message.trim().is_empty() => {}
        _ => {
            return Err(ProtocolError::Invalid(
                "request message is missing or blank".to_string(),
            ))
        }
    }

    if let Some(options) = &request.predefined_options {
        if options.is_empty() {
            return Err(ProtocolError::Invalid(
                "predefined options list is empty".to_string(),
            ));
        }
        if options.iter().any(|o| o.trim().is_empty()) {
            return Err(ProtocolError::Invalid(
                "predefined options contain a blank label".to_string(),
            ));
        }
    }

    Ok(())
}

/// Writes the full payload to a sibling temp file, fsyncs, then renames onto
/// the final path. The reader never observes a half-written response.
pub fn write_response(path: &Path, response: &FeedbackResponse) -> Result<(), ProtocolError> {
    let body = serde_json::to_string_pretty(response)?;
    write_atomic(path, body.as_bytes()).map_err(|source| ProtocolError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn write_atomic(path: &Path, body: &[u8]) -> std::io::Result<()> {
    let mut tmp_name = path.as_os_str().to_os_string();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    let mut file = std::fs::File::create(&tmp)?;
    file.write_all(body)?;
    file.sync_all()?;
    std::fs::rename(&tmp, path)
}
