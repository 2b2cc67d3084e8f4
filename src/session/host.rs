use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

use super::protocol::{self, FeedbackRequest, FeedbackResponse, ProtocolError};

/// Overrides popup discovery; points at the binary to launch. Without it the
/// host re-launches its own executable in popup mode.
pub const POPUP_BIN_ENV: &str = "HANDBACK_POPUP_BIN";

pub fn build_request(
    message: &str,
    full_response: Option<&str>,
    predefined_options: Option<Vec<String>>,
) -> std::result::Result<FeedbackRequest, ProtocolError> {
    let request = FeedbackRequest {
        id: uuid::Uuid::new_v4().to_string(),
        message: Some(message.to_string()),
        full_response: full_response.map(|s| s.to_string()),
        predefined_options,
        created_at: Some(chrono::Utc::now().to_rfc3339()),
    };
    protocol::validate_request(&request)?;
    Ok(request)
}

pub async fn create_request_file(request: &FeedbackRequest) -> Result<PathBuf> {
    let path = std::env::temp_dir().join(protocol::request_file_name(&request.id));
    let body = serde_json::to_string_pretty(request)
        .with_context(|| format!("could not encode request {}", request.id))?;
    tokio::fs::write(&path, body)
        .await
        .with_context(|| format!("could not write request file {}", path.display()))?;
    Ok(path)
}

pub fn find_popup_executable() -> Result<PathBuf> {
    if let Ok(overridden) = std::env::var(POPUP_BIN_ENV) {
        let path = PathBuf::from(&overridden);
        if !path.exists() {
            bail!("{} points at a missing binary: {}", POPUP_BIN_ENV, overridden);
        }
        return Ok(path);
    }
    std::env::current_exe().context("could not locate the current executable")
}

/// Full round trip: write the request, run the popup to completion, then
/// collect whatever it left behind. The request file is removed afterwards
/// whatever the outcome.
pub async fn collect_feedback(
    message: &str,
    full_response: Option<&str>,
    predefined_options: Option<Vec<String>>,
) -> Result<FeedbackResponse> {
    let request = build_request(message, full_response, predefined_options)?;
    let request_path = create_request_file(&request).await?;
    let response_path = protocol::derive_response_path(&request_path)?;

    let outcome = launch_and_wait(&request_path, &response_path, &request.id).await;

    if std::fs::remove_file(&request_path).is_ok() {
        log::debug!("Removed request file {}", request_path.display());
    }
    outcome
}

async fn launch_and_wait(
    request_path: &Path,
    response_path: &Path,
    request_id: &str,
) -> Result<FeedbackResponse> {
    let popup = find_popup_executable()?;
    log::info!(
        "Launching {} for request {}",
        popup.display(),
        request_id
    );

    let status = tokio::process::Command::new(&popup)
        .arg("--request-file")
        .arg(request_path)
        .status()
        .await
        .with_context(|| format!("could not launch popup {}", popup.display()))?;
    log::debug!("Popup exited with {}", status);

    if response_path.exists() {
        read_response_file(response_path)
    } else {
        // The popup closed without answering. An absent response file is
        // the cancellation signal, not an error.
        log::info!("No response file for request {}; treating as cancelled", request_id);
        Ok(cancelled_response(request_id))
    }
}

/// Reads and consumes a response file. The exchange is one-shot, so the
/// file must not be readable twice.
pub fn read_response_file(path: &Path) -> Result<FeedbackResponse> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("could not read response file {}", path.display()))?;
    let response: FeedbackResponse = serde_json::from_str(&raw)
        .with_context(|| format!("malformed response file {}", path.display()))?;

    if let Err(e) = std::fs::remove_file(path) {
        log::warn!("Could not remove response file {}: {}", path.display(), e);
    }
    Ok(response)
}

pub fn cancelled_response(request_id: &str) -> FeedbackResponse {
    FeedbackResponse {
        request_id: request_id.to_string(),
        user_input: None,
        selected_options: Vec::new(),
        images: Vec::new(),
        file_references: Vec::new(),
        cancelled: true,
    }
}

/// One human-readable digest of what came back, for transcripts and logs.
pub fn summarize_response(response: &FeedbackResponse) -> String {
    if response.cancelled {
        return "[User cancelled or provided no feedback]".to_string();
    }

    let mut sections: Vec<String> = Vec::new();
    if let Some(input) = &response.user_input {
        sections.push(input.clone());
    }
    if !response.images.is_empty() {
        sections.push(format!("[{} image attachment(s)]", response.images.len()));
    }
    if !response.file_references.is_empty() {
        let listed: Vec<String> = response
            .file_references
            .iter()
            .map(|r| r.display_name.clone())
            .collect();
        sections.push(format!("Referenced: {}", listed.join(", ")));
    }

    if sections.is_empty() {
        return "[User provided no feedback]".to_string();
    }
    sections.join("\n\n")
}
