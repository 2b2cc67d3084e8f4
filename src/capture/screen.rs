use serde::Serialize;
use std::io::Cursor;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, Serialize)]
pub struct DisplayInfo {
    pub id: u32,
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub is_primary: bool,
}

#[derive(Debug, Clone)]
pub struct GrabbedFrame {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Error)]
pub enum GrabError {
    #[error("failed to list displays: {0}")]
    List(String),
    #[error("no display available")]
    NoDisplay,
    #[error("display {0} not found")]
    NotFound(u32),
    #[error("failed to capture display: {0}")]
    Capture(String),
    #[error("failed to encode frame: {0}")]
    Encode(String),
    #[error("failed to write frame: {0}")]
    Io(#[from] std::io::Error),
}

/// Silent full-screen grab, returned as a PNG on disk so the selection
/// overlay can load it after the window is back.
pub trait ScreenGrabber: Send + Sync {
    fn list_displays(&self) -> Result<Vec<DisplayInfo>, GrabError>;
    fn grab(&self, display: Option<u32>) -> Result<GrabbedFrame, GrabError>;
}

pub struct XcapGrabber;

impl ScreenGrabber for XcapGrabber {
    fn list_displays(&self) -> Result<Vec<DisplayInfo>, GrabError> {
        let monitors = xcap::Monitor::all().map_err(|e| GrabError::List(e.to_string()))?;

        let mut displays = Vec::new();
        for (i, monitor) in monitors.iter().enumerate() {
            let name = monitor.name().map_err(|e| GrabError::List(e.to_string()))?;
            let x = monitor.x().map_err(|e| GrabError::List(e.to_string()))?;
            let y = monitor.y().map_err(|e| GrabError::List(e.to_string()))?;
            let width = monitor.width().map_err(|e| GrabError::List(e.to_string()))?;
            let height = monitor.height().map_err(|e| GrabError::List(e.to_string()))?;
            let is_primary = monitor
                .is_primary()
                .map_err(|e| GrabError::List(e.to_string()))?;

            displays.push(DisplayInfo {
                id: i as u32,
                name,
                x,
                y,
                width,
                height,
                is_primary,
            });
        }

        Ok(displays)
    }

    fn grab(&self, display: Option<u32>) -> Result<GrabbedFrame, GrabError> {
        let monitors = xcap::Monitor::all().map_err(|e| GrabError::List(e.to_string()))?;

        let monitor = match display {
            Some(id) => monitors
                .get(id as usize)
                .ok_or(GrabError::NotFound(id))?,
            None => monitors
                .iter()
                .find(|m| m.is_primary().unwrap_or(false))
                .or_else(|| monitors.first())
                .ok_or(GrabError::NoDisplay)?,
        };

        let image = monitor
            .capture_image()
            .map_err(|e| GrabError::Capture(e.to_string()))?;
        let width = image.width();
        let height = image.height();

        let mut buffer = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(image)
            .write_to(&mut buffer, image::ImageFormat::Png)
            .map_err(|e| GrabError::Encode(e.to_string()))?;

        let path = std::env::temp_dir().join(format!(
            "handback_frame_{}.png",
            chrono::Utc::now().timestamp_millis()
        ));
        std::fs::write(&path, buffer.into_inner())?;
        log::debug!("Grabbed {}x{} frame to {}", width, height, path.display());

        Ok(GrabbedFrame {
            path,
            width,
            height,
        })
    }
}
