use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("no interactive capture tool on this platform")]
    Unsupported,
    #[error("failed to run capture tool: {0}")]
    Spawn(String),
}

/// OS-provided interactive screenshot tool, run as a child process. The user
/// drives the selection inside the tool; a missing output file means they
/// dismissed it.
#[async_trait]
pub trait CaptureTool: Send + Sync {
    /// Returns true when the tool produced `output`.
    async fn run(&self, output: &Path) -> Result<bool, ToolError>;
}

pub struct SystemCaptureTool;

impl SystemCaptureTool {
    pub fn available() -> bool {
        cfg!(target_os = "macos")
    }
}

#[async_trait]
impl CaptureTool for SystemCaptureTool {
    async fn run(&self, output: &Path) -> Result<bool, ToolError> {
        if !Self::available() {
            return Err(ToolError::Unsupported);
        }

        let status = Command::new("screencapture")
            .arg("-i")
            .arg("-x")
            .arg(output)
            .status()
            .await
            .map_err(|e| ToolError::Spawn(e.to_string()))?;

        if !status.success() {
            log::debug!("Capture tool exited with {}", status);
            return Ok(false);
        }

        Ok(output.exists())
    }
}
