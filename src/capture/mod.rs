pub mod native;
pub mod screen;

use base64::{engine::general_purpose::STANDARD, Engine};
use image::GenericImageView;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::time::Duration;
use thiserror::Error;

pub use native::{CaptureTool, SystemCaptureTool, ToolError};
pub use screen::{DisplayInfo, GrabError, GrabbedFrame, ScreenGrabber, XcapGrabber};

/// Selections at or below this edge length (display px) are ignored.
pub const MIN_SELECTION_PX: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SelectionRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaptureResult {
    pub data: String,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    pub size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CaptureState {
    Idle,
    Capturing,
    Selecting,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("a capture is already in progress")]
    Busy,
    #[error("window control failed: {0}")]
    Window(String),
    #[error(transparent)]
    Grab(#[from] GrabError),
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error("selection is below the minimum size")]
    TooSmall,
    #[error("no selection to confirm")]
    NoSelection,
    #[error("operation not valid in the current capture state")]
    State,
    #[error("failed to read captured frame: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decode captured frame: {0}")]
    Decode(String),
    #[error("failed to encode captured frame: {0}")]
    Encode(String),
}

/// Thin handle onto the application window; implemented by the shell.
pub trait WindowControl: Send + Sync {
    fn hide(&self) -> Result<(), String>;
    fn show(&self) -> Result<(), String>;
    /// Fullscreen, borderless, always-on-top for rectangle selection.
    fn enter_selection_overlay(&self) -> Result<(), String>;
    fn exit_selection_overlay(&self) -> Result<(), String>;
}

/// Window control for runs without a graphical shell.
pub struct HeadlessWindow;

impl WindowControl for HeadlessWindow {
    fn hide(&self) -> Result<(), String> {
        log::debug!("headless window: hide");
        Ok(())
    }

    fn show(&self) -> Result<(), String> {
        log::debug!("headless window: show");
        Ok(())
    }

    fn enter_selection_overlay(&self) -> Result<(), String> {
        log::debug!("headless window: enter selection overlay");
        Ok(())
    }

    fn exit_selection_overlay(&self) -> Result<(), String> {
        log::debug!("headless window: exit selection overlay");
        Ok(())
    }
}

/// Capture strategy, picked once at startup. Platforms with a trusted
/// interactive screenshot tool delegate to it; everywhere else the app grabs
/// the screen itself and runs its own selection overlay.
pub enum CaptureFlow {
    NativeTool(Box<dyn CaptureTool>),
    Software(Box<dyn ScreenGrabber>),
}

impl CaptureFlow {
    pub fn detect() -> Self {
        if SystemCaptureTool::available() {
            CaptureFlow::NativeTool(Box::new(SystemCaptureTool))
        } else {
            CaptureFlow::Software(Box::new(XcapGrabber))
        }
    }
}

#[derive(Debug)]
pub enum StartOutcome {
    Captured(CaptureResult),
    /// The user dismissed the interactive tool. Not an error.
    Cancelled,
    /// Software flow only: a frame is held and the overlay is up.
    SelectionPending,
}

struct SelectionSession {
    frame: image::DynamicImage,
    frame_width: u32,
    frame_height: u32,
    rect: Option<SelectionRect>,
    frozen: bool,
}

pub struct CaptureManager {
    flow: CaptureFlow,
    state: CaptureState,
    settle: Duration,
    session: Option<SelectionSession>,
}

enum FlowOutcome {
    Native(Result<Option<CaptureResult>, CaptureError>),
    Frame(Result<(image::DynamicImage, u32, u32), CaptureError>),
}

impl CaptureManager {
    pub fn new(flow: CaptureFlow, hide_settle_ms: u64) -> Self {
        Self {
            flow,
            state: CaptureState::Idle,
            settle: Duration::from_millis(hide_settle_ms),
            session: None,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Pixel size of the held frame while a selection is pending.
    pub fn pending_frame_size(&self) -> Option<(u32, u32)> {
        self.session.as_ref().map(|s| (s.frame_width, s.frame_height))
    }

    /// True once a frozen selection passes the minimum-size check.
    pub fn has_selection(&self) -> bool {
        self.session
            .as_ref()
            .and_then(|s| s.rect.filter(|_| s.frozen))
            .map(|r| rect_large_enough(&r))
            .unwrap_or(false)
    }

    /// Hides the window and runs the configured flow. The native flow
    /// completes in one call; the software flow parks in `Selecting` until
    /// the user confirms or cancels a rectangle.
    pub async fn start(
        &mut self,
        window: &dyn WindowControl,
    ) -> Result<StartOutcome, CaptureError> {
        if self.state != CaptureState::Idle {
            return Err(CaptureError::Busy);
        }
        self.state = CaptureState::Capturing;

        if let Err(e) = window.hide() {
            self.state = CaptureState::Idle;
            return Err(CaptureError::Window(e));
        }
        // Let the window manager finish the hide before anything hits the
        // screen buffer.
        tokio::time::sleep(self.settle).await;

        let outcome = match &self.flow {
            CaptureFlow::NativeTool(tool) => {
                FlowOutcome::Native(run_native_tool(tool.as_ref()).await)
            }
            CaptureFlow::Software(grabber) => {
                FlowOutcome::Frame(load_frame(grabber.as_ref()).await)
            }
        };

        match outcome {
            FlowOutcome::Native(result) => {
                self.state = CaptureState::Idle;
                // The window comes back no matter how the tool run went.
                if let Err(e) = window.show() {
                    log::error!("Failed to restore window after capture: {}", e);
                }
                match result? {
                    Some(capture) => Ok(StartOutcome::Captured(capture)),
                    None => Ok(StartOutcome::Cancelled),
                }
            }
            FlowOutcome::Frame(result) => {
                let (frame, frame_width, frame_height) = match result {
                    Ok(frame) => frame,
                    Err(e) => {
                        self.state = CaptureState::Idle;
                        if let Err(we) = window.show() {
                            log::error!("Failed to restore window after grab error: {}", we);
                        }
                        return Err(e);
                    }
                };

                self.session = Some(SelectionSession {
                    frame,
                    frame_width,
                    frame_height,
                    rect: None,
                    frozen: false,
                });
                self.state = CaptureState::Selecting;

                if let Err(e) = window.enter_selection_overlay() {
                    self.session = None;
                    self.state = CaptureState::Idle;
                    if let Err(we) = window.show() {
                        log::error!("Failed to restore window after overlay error: {}", we);
                    }
                    return Err(CaptureError::Window(e));
                }

                Ok(StartOutcome::SelectionPending)
            }
        }
    }

    /// Live drag update; display coordinates.
    pub fn update_selection(&mut self, rect: SelectionRect) -> Result<(), CaptureError> {
        if self.state != CaptureState::Selecting {
            return Err(CaptureError::State);
        }
        let session = self.session.as_mut().ok_or(CaptureError::State)?;
        session.rect = Some(rect);
        session.frozen = false;
        Ok(())
    }

    /// Mouse release: keep the rectangle without cropping yet.
    pub fn freeze_selection(&mut self) -> Result<(), CaptureError> {
        if self.state != CaptureState::Selecting {
            return Err(CaptureError::State);
        }
        let session = self.session.as_mut().ok_or(CaptureError::State)?;
        session.frozen = true;
        Ok(())
    }

    /// Crops the held frame to the frozen selection. `display_width` and
    /// `display_height` are the logical size of the selection surface; the
    /// rectangle is scaled by captured/display per axis before cropping.
    pub fn confirm_selection(
        &mut self,
        window: &dyn WindowControl,
        display_width: f64,
        display_height: f64,
    ) -> Result<CaptureResult, CaptureError> {
        if self.state != CaptureState::Selecting {
            return Err(CaptureError::State);
        }
        let session = self.session.as_ref().ok_or(CaptureError::State)?;
        let rect = session.rect.ok_or(CaptureError::NoSelection)?;
        if !rect_large_enough(&rect) {
            return Err(CaptureError::TooSmall);
        }

        let result = crop_frame(
            &session.frame,
            &rect,
            display_width,
            display_height,
            session.frame_width,
            session.frame_height,
        );

        self.session = None;
        self.state = CaptureState::Idle;
        if let Err(e) = window.exit_selection_overlay() {
            log::error!("Failed to leave selection overlay: {}", e);
        }

        result
    }

    pub fn cancel_selection(&mut self, window: &dyn WindowControl) -> Result<(), CaptureError> {
        if self.state != CaptureState::Selecting {
            return Err(CaptureError::State);
        }
        self.session = None;
        self.state = CaptureState::Idle;
        if let Err(e) = window.exit_selection_overlay() {
            log::error!("Failed to leave selection overlay: {}", e);
        }
        log::info!("Selection cancelled");
        Ok(())
    }
}

fn rect_large_enough(rect: &SelectionRect) -> bool {
    rect.width > MIN_SELECTION_PX && rect.height > MIN_SELECTION_PX
}

async fn run_native_tool(tool: &dyn CaptureTool) -> Result<Option<CaptureResult>, CaptureError> {
    let output = std::env::temp_dir().join(format!(
        "handback_capture_{}.png",
        chrono::Utc::now().timestamp_millis()
    ));

    let produced = tool.run(&output).await?;
    if !produced {
        log::info!("Interactive capture dismissed");
        return Ok(None);
    }

    let bytes = tokio::fs::read(&output).await?;
    let _ = tokio::fs::remove_file(&output).await;

    let decoded =
        image::load_from_memory(&bytes).map_err(|e| CaptureError::Decode(e.to_string()))?;
    let (width, height) = decoded.dimensions();
    log::info!("Interactive capture produced {}x{} image", width, height);

    Ok(Some(CaptureResult {
        data: STANDARD.encode(&bytes),
        mime_type: "image/png".to_string(),
        width,
        height,
        size: bytes.len(),
    }))
}

async fn load_frame(
    grabber: &dyn ScreenGrabber,
) -> Result<(image::DynamicImage, u32, u32), CaptureError> {
    let frame = grabber.grab(None)?;
    let bytes = tokio::fs::read(&frame.path).await?;
    let _ = tokio::fs::remove_file(&frame.path).await;

    let decoded =
        image::load_from_memory(&bytes).map_err(|e| CaptureError::Decode(e.to_string()))?;
    let (width, height) = decoded.dimensions();
    if (width, height) != (frame.width, frame.height) {
        log::warn!(
            "Grabbed frame reports {}x{} but decodes to {}x{}",
            frame.width,
            frame.height,
            width,
            height
        );
    }

    Ok((decoded, width, height))
}

fn crop_frame(
    frame: &image::DynamicImage,
    rect: &SelectionRect,
    display_width: f64,
    display_height: f64,
    frame_width: u32,
    frame_height: u32,
) -> Result<CaptureResult, CaptureError> {
    let scale_x = if display_width > 0.0 {
        frame_width as f64 / display_width
    } else {
        1.0
    };
    let scale_y = if display_height > 0.0 {
        frame_height as f64 / display_height
    } else {
        1.0
    };

    let x = ((rect.x.max(0.0) * scale_x).round() as u32).min(frame_width.saturating_sub(1));
    let y = ((rect.y.max(0.0) * scale_y).round() as u32).min(frame_height.saturating_sub(1));
    let width = ((rect.width * scale_x).round() as u32).clamp(1, frame_width - x);
    let height = ((rect.height * scale_y).round() as u32).clamp(1, frame_height - y);

    let cropped = frame.crop_imm(x, y, width, height);
    let (out_width, out_height) = cropped.dimensions();

    let mut buffer = Cursor::new(Vec::new());
    cropped
        .write_to(&mut buffer, image::ImageFormat::Png)
        .map_err(|e| CaptureError::Encode(e.to_string()))?;
    let bytes = buffer.into_inner();

    Ok(CaptureResult {
        data: STANDARD.encode(&bytes),
        mime_type: "image/png".to_string(),
        width: out_width,
        height: out_height,
        size: bytes.len(),
    })
}
