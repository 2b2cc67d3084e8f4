use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use std::path::PathBuf;

use super::{is_image_path, mime_for_extension, FileReference};
use crate::image::{ImagePipeline, ImagePreview};

/// Paths split by extension only. The filesystem is not consulted here, so a
/// directory named `shots.png` lands in `image_paths`; ingestion corrects
/// that when it stats the path.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DropClassification {
    pub image_paths: Vec<String>,
    pub other_paths: Vec<String>,
}

pub fn classify<S: AsRef<str>>(paths: &[S]) -> DropClassification {
    let mut split = DropClassification::default();
    for path in paths {
        let path = path.as_ref();
        if is_image_path(path) {
            split.image_paths.push(path.to_string());
        } else {
            split.other_paths.push(path.to_string());
        }
    }
    split
}

#[derive(Debug, Clone)]
pub enum DropEvent {
    Entered(Vec<String>),
    Dropped(Vec<String>),
    Left,
}

/// Everything one drop produced. Images went through the normalization
/// pipeline; the rest became references.
#[derive(Debug, Default)]
pub struct DropIntake {
    pub images: Vec<ImagePreview>,
    pub references: Vec<FileReference>,
}

impl DropIntake {
    fn merge(&mut self, other: DropIntake) {
        self.images.extend(other.images);
        self.references.extend(other.references);
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty() && self.references.is_empty()
    }
}

pub struct DropHandler {
    pipeline: ImagePipeline,
    concurrency: usize,
}

impl DropHandler {
    pub fn new(pipeline: ImagePipeline, concurrency: usize) -> Self {
        Self {
            pipeline,
            concurrency: concurrency.max(1),
        }
    }

    /// Only a drop ingests content. Enter and leave are hover bookkeeping for
    /// the shell and yield nothing.
    pub async fn handle_event(&self, event: DropEvent) -> DropIntake {
        match event {
            DropEvent::Entered(paths) => {
                let split = classify(&paths);
                log::debug!(
                    "Drag entered with {} image path(s), {} other path(s)",
                    split.image_paths.len(),
                    split.other_paths.len()
                );
                DropIntake::default()
            }
            DropEvent::Left => {
                log::debug!("Drag left the window");
                DropIntake::default()
            }
            DropEvent::Dropped(paths) => self.ingest_paths(&paths).await,
        }
    }

    /// Top-level fan-out is bounded; a single unreadable path never aborts
    /// the rest of the drop.
    pub async fn ingest_paths(&self, paths: &[String]) -> DropIntake {
        let mut intake = DropIntake::default();
        let mut parts = stream::iter(paths.iter().cloned())
            .map(|path| self.ingest_one(PathBuf::from(path)))
            .buffer_unordered(self.concurrency);
        while let Some(part) = parts.next().await {
            intake.merge(part);
        }
        intake
    }

    fn ingest_one(&self, path: PathBuf) -> BoxFuture<'_, DropIntake> {
        Box::pin(async move {
            let display = path.to_string_lossy().to_string();
            let mut intake = DropIntake::default();

            let metadata = match tokio::fs::metadata(&path).await {
                Ok(m) => m,
                Err(e) => {
                    log::warn!(
                        "Could not stat dropped path {}: {}; keeping a flat reference",
                        display,
                        e
                    );
                    intake.references.push(FileReference::from_path(&display));
                    return intake;
                }
            };

            if metadata.is_dir() {
                intake.references.push(FileReference::from_dir_path(&display));
                let mut entries = match tokio::fs::read_dir(&path).await {
                    Ok(entries) => entries,
                    Err(e) => {
                        log::warn!("Could not list {}: {}", display, e);
                        return intake;
                    }
                };
                loop {
                    match entries.next_entry().await {
                        Ok(Some(entry)) => intake.merge(self.ingest_one(entry.path()).await),
                        Ok(None) => break,
                        Err(e) => {
                            log::warn!("Could not read an entry under {}: {}", display, e);
                            break;
                        }
                    }
                }
                return intake;
            }

            if is_image_path(&display) {
                match tokio::fs::read(&path).await {
                    Ok(raw) => {
                        let mime =
                            mime_for_extension(&display).unwrap_or("application/octet-stream");
                        match self.pipeline.acquire(&raw, mime).await {
                            Ok(preview) => intake.images.push(preview),
                            Err(e) => {
                                log::warn!("Dropped image {} was not ingestible: {}", display, e)
                            }
                        }
                    }
                    Err(e) => log::warn!("Could not read dropped image {}: {}", display, e),
                }
            } else {
                let mut reference = FileReference::from_path(&display);
                reference.size = Some(metadata.len());
                intake.references.push(reference);
            }

            intake
        })
    }
}
