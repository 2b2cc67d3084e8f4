use image::RgbaImage;
use std::io::Cursor;
use thiserror::Error;

use super::{ImageIntakeError, ImagePipeline, ImagePreview};

#[derive(Debug, Error)]
pub enum ClipboardError {
    #[error("clipboard unavailable: {0}")]
    Unavailable(String),
    #[error("clipboard holds no image")]
    Empty,
    #[error("clipboard bitmap is malformed: {0}")]
    Malformed(String),
    #[error(transparent)]
    Intake(#[from] ImageIntakeError),
}

/// Raw RGBA bitmap as clipboards hand them out.
#[derive(Debug, Clone)]
pub struct ClipboardBitmap {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

pub trait ClipboardSource {
    fn read_bitmap(&mut self) -> Result<ClipboardBitmap, ClipboardError>;
}

pub struct SystemClipboard {
    inner: arboard::Clipboard,
}

impl SystemClipboard {
    pub fn new() -> Result<Self, ClipboardError> {
        let inner =
            arboard::Clipboard::new().map_err(|e| ClipboardError::Unavailable(e.to_string()))?;
        Ok(Self { inner })
    }
}

impl ClipboardSource for SystemClipboard {
    fn read_bitmap(&mut self) -> Result<ClipboardBitmap, ClipboardError> {
        let image = self.inner.get_image().map_err(|e| match e {
            arboard::Error::ContentNotAvailable => ClipboardError::Empty,
            other => ClipboardError::Unavailable(other.to_string()),
        })?;

        Ok(ClipboardBitmap {
            width: image.width as u32,
            height: image.height as u32,
            rgba: image.bytes.into_owned(),
        })
    }
}

/// Pastes the clipboard bitmap through the pipeline as a PNG.
pub async fn acquire_from_clipboard(
    pipeline: &ImagePipeline,
    source: &mut dyn ClipboardSource,
) -> Result<ImagePreview, ClipboardError> {
    let bitmap = source.read_bitmap()?;
    log::debug!("Clipboard holds a {}x{} bitmap", bitmap.width, bitmap.height);
    let png = encode_bitmap_png(&bitmap)?;
    Ok(pipeline.acquire(&png, "image/png").await?)
}

fn encode_bitmap_png(bitmap: &ClipboardBitmap) -> Result<Vec<u8>, ClipboardError> {
    let image = RgbaImage::from_raw(bitmap.width, bitmap.height, bitmap.rgba.clone())
        .ok_or_else(|| {
            ClipboardError::Malformed("byte length does not match dimensions".to_string())
        })?;

    let mut buffer = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut buffer, image::ImageFormat::Png)
        .map_err(|e| ClipboardError::Malformed(e.to_string()))?;
    Ok(buffer.into_inner())
}
