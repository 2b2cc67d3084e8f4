pub mod backend;
pub mod clipboard;

use base64::{engine::general_purpose::STANDARD, Engine};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use rand::Rng;
use serde::Serialize;
use std::io::Cursor;
use std::sync::Arc;
use thiserror::Error;

pub use backend::{BackendError, HttpImageBackend, ImageBackend, ProcessedImage};

use crate::config::AppConfig;

/// Hard ceiling on a transmitted image payload. Uploads above it are
/// rejected outright, never truncated.
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;
/// Longer-dimension bound after normalization.
pub const MAX_DIMENSION: u32 = 4096;
pub const JPEG_QUALITY: u8 = 85;
const MIN_JPEG_QUALITY: u8 = 10;

pub const SUPPORTED_MIME_TYPES: [&str; 6] = [
    "image/png",
    "image/jpeg",
    "image/jpg",
    "image/gif",
    "image/webp",
    "image/bmp",
];

#[derive(Debug, Error)]
pub enum ImageIntakeError {
    #[error("unsupported image type: {0}")]
    UnsupportedFormat(String),
    #[error("image is {size} bytes, over the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },
    #[error("failed to decode image: {0}")]
    Decode(String),
    #[error("failed to encode image: {0}")]
    Encode(String),
}

/// Normalized attachment held for display and submission. `size` is the
/// decoded payload length, not the encoded string length.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImagePreview {
    pub id: String,
    pub data: String,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    pub size: usize,
}

impl ImagePreview {
    /// Wraps a finished capture as an attachment. Captures are user-framed
    /// and already encoded, so they skip normalization.
    pub fn from_capture(capture: &crate::capture::CaptureResult) -> Self {
        Self {
            id: attachment_id(),
            data: capture.data.clone(),
            mime_type: capture.mime_type.clone(),
            width: capture.width,
            height: capture.height,
            size: capture.size,
        }
    }
}

/// Millisecond timestamp plus a short random suffix. Local only, never
/// transmitted.
pub(crate) fn attachment_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!("{}-{}", chrono::Utc::now().timestamp_millis(), suffix)
}

/// Turns raw bytes plus a declared MIME type into a validated, bounded,
/// dimension-known preview. Tries the remote backend first when one is
/// configured; any backend error falls back to local normalization.
#[derive(Clone)]
pub struct ImagePipeline {
    backend: Option<Arc<dyn ImageBackend>>,
}

impl ImagePipeline {
    pub fn new() -> Self {
        Self { backend: None }
    }

    pub fn with_backend(backend: Arc<dyn ImageBackend>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        match &config.backend_url {
            Some(url) => Self::with_backend(Arc::new(HttpImageBackend::new(
                url.clone(),
                config.backend_timeout_secs,
            ))),
            None => Self::new(),
        }
    }

    pub async fn acquire(
        &self,
        raw: &[u8],
        declared_mime: &str,
    ) -> Result<ImagePreview, ImageIntakeError> {
        let mime = declared_mime.to_ascii_lowercase();
        if !SUPPORTED_MIME_TYPES.contains(&mime.as_str()) {
            return Err(ImageIntakeError::UnsupportedFormat(declared_mime.to_string()));
        }
        if raw.len() > MAX_IMAGE_BYTES {
            return Err(ImageIntakeError::TooLarge {
                size: raw.len(),
                limit: MAX_IMAGE_BYTES,
            });
        }

        if let Some(backend) = &self.backend {
            match remote_normalize(backend.as_ref(), raw, &mime).await {
                Ok(preview) => return Ok(preview),
                Err(e) => {
                    log::warn!("Backend processing failed, normalizing locally: {}", e);
                }
            }
        }

        local_normalize(raw, &mime)
    }
}

async fn remote_normalize(
    backend: &dyn ImageBackend,
    raw: &[u8],
    mime: &str,
) -> Result<ImagePreview, BackendError> {
    let processed = backend.process(raw, mime).await?;
    let payload = STANDARD.decode(&processed.data)?;
    let decoded = image::load_from_memory(&payload)
        .map_err(|e| BackendError::Undecodable(e.to_string()))?;
    let (width, height) = decoded.dimensions();

    Ok(ImagePreview {
        id: attachment_id(),
        data: processed.data,
        mime_type: processed.mime_type,
        width,
        height,
        size: payload.len(),
    })
}

fn local_normalize(raw: &[u8], mime: &str) -> Result<ImagePreview, ImageIntakeError> {
    let decoded =
        image::load_from_memory(raw).map_err(|e| ImageIntakeError::Decode(e.to_string()))?;
    let (width, height) = decoded.dimensions();

    let fits = width <= MAX_DIMENSION && height <= MAX_DIMENSION;
    if fits && raw.len() < MAX_IMAGE_BYTES / 2 {
        return Ok(ImagePreview {
            id: attachment_id(),
            data: STANDARD.encode(raw),
            mime_type: mime.to_string(),
            width,
            height,
            size: raw.len(),
        });
    }

    let resized = resize_to_fit(&decoded, MAX_DIMENSION);
    let (out_width, out_height) = resized.dimensions();

    let (bytes, out_mime) = if mime == "image/png" {
        let png = encode_png(&resized)?;
        if png.len() <= MAX_IMAGE_BYTES {
            (png, "image/png")
        } else {
            (compress_to_fit(&resized, MAX_IMAGE_BYTES)?, "image/jpeg")
        }
    } else {
        (compress_to_fit(&resized, MAX_IMAGE_BYTES)?, "image/jpeg")
    };

    log::debug!(
        "Normalized {}x{} ({} bytes) to {}x{} ({} bytes, {})",
        width,
        height,
        raw.len(),
        out_width,
        out_height,
        bytes.len(),
        out_mime
    );

    Ok(ImagePreview {
        id: attachment_id(),
        data: STANDARD.encode(&bytes),
        mime_type: out_mime.to_string(),
        width: out_width,
        height: out_height,
        size: bytes.len(),
    })
}

pub(crate) fn fit_dimensions(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    if width <= max_dimension && height <= max_dimension {
        return (width, height);
    }
    let ratio = (max_dimension as f64 / width as f64).min(max_dimension as f64 / height as f64);
    let new_width = ((width as f64 * ratio).round() as u32).max(1);
    let new_height = ((height as f64 * ratio).round() as u32).max(1);
    (new_width, new_height)
}

fn resize_to_fit(image: &DynamicImage, max_dimension: u32) -> DynamicImage {
    let (width, height) = image.dimensions();
    let (new_width, new_height) = fit_dimensions(width, height, max_dimension);
    if (new_width, new_height) == (width, height) {
        return image.clone();
    }
    image.resize_exact(new_width, new_height, FilterType::Lanczos3)
}

fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, ImageIntakeError> {
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, image::ImageFormat::Png)
        .map_err(|e| ImageIntakeError::Encode(e.to_string()))?;
    Ok(buffer.into_inner())
}

fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, ImageIntakeError> {
    let rgb = image.to_rgb8();
    let mut jpeg = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut jpeg, quality);
    encoder
        .encode_image(&rgb)
        .map_err(|e| ImageIntakeError::Encode(e.to_string()))?;
    Ok(jpeg)
}

/// Re-encodes with descending JPEG quality until the payload fits.
fn compress_to_fit(image: &DynamicImage, max_bytes: usize) -> Result<Vec<u8>, ImageIntakeError> {
    let mut quality = JPEG_QUALITY;
    loop {
        let jpeg = encode_jpeg(image, quality)?;
        if jpeg.len() <= max_bytes || quality <= MIN_JPEG_QUALITY {
            return Ok(jpeg);
        }
        quality = quality.saturating_sub(10);
    }
}
