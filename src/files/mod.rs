pub mod drop;

use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;

use crate::image::attachment_id;
use crate::platform::Platform;

/// Caps applied at the multi-file selection point, not at single-reference
/// construction.
pub const MAX_FILE_REFERENCES: usize = 10;
pub const MAX_FILE_BYTES: u64 = 5 * 1024 * 1024;

pub const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "gif", "webp", "bmp"];

pub fn is_image_path(path: &str) -> bool {
    extension_of(path)
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

pub fn mime_for_extension(path: &str) -> Option<&'static str> {
    match extension_of(path)?.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "bmp" => Some("image/bmp"),
        "txt" | "md" | "log" => Some("text/plain"),
        "json" => Some("application/json"),
        "pdf" => Some("application/pdf"),
        _ => None,
    }
}

fn extension_of(path: &str) -> Option<String> {
    std::path::Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

fn basename(path: &str, platform: Platform) -> String {
    let sep = platform.separator();
    let trimmed = path.trim_end_matches(sep);
    trimmed.rsplit(sep).next().unwrap_or(trimmed).to_string()
}

/// A path attached by reference rather than by content. Paths are stored in
/// the current platform's separator convention; `display_name` is derived
/// once and stays stable for the attachment's lifetime.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileReference {
    pub id: String,
    pub name: Option<String>,
    pub display_name: String,
    pub path: String,
    pub size: Option<u64>,
    pub mime_type: Option<String>,
    pub is_image: bool,
    pub is_directory: bool,
}

impl FileReference {
    pub fn from_path(path: &str) -> Self {
        Self::from_path_on(Platform::current(), path)
    }

    pub fn from_path_on(platform: Platform, path: &str) -> Self {
        Self::build(platform, path, false)
    }

    pub fn from_dir_path(path: &str) -> Self {
        Self::from_dir_path_on(Platform::current(), path)
    }

    pub fn from_dir_path_on(platform: Platform, path: &str) -> Self {
        Self::build(platform, path, true)
    }

    /// Handle-style intake where only metadata is known; the name stands in
    /// for the path.
    pub fn from_parts(name: &str, size: u64, mime_type: Option<&str>) -> Self {
        let mut reference = Self::build(Platform::current(), name, false);
        reference.size = Some(size);
        if let Some(mime) = mime_type {
            reference.mime_type = Some(mime.to_string());
        }
        reference
    }

    fn build(platform: Platform, path: &str, is_directory: bool) -> Self {
        let normalized = platform.normalize_separators(path);
        let base = basename(&normalized, platform);

        let display_name = if is_directory {
            format!("📁 {}", base)
        } else {
            format!("@{}", base)
        };
        let mime_type = if is_directory {
            None
        } else {
            Some(
                mime_for_extension(&base)
                    .unwrap_or("application/octet-stream")
                    .to_string(),
            )
        };

        Self {
            id: attachment_id(),
            display_name,
            path: normalized,
            size: None,
            mime_type,
            is_image: !is_directory && is_image_path(&base),
            is_directory,
            name: Some(base),
        }
    }

    pub fn basename(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.path)
    }

    /// Two references collide iff their basenames are equal, case-sensitive,
    /// regardless of directory.
    pub fn collides_with(&self, other: &FileReference) -> bool {
        self.basename() == other.basename()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    OverCap,
    OverSize { size: u64 },
    Duplicate,
    Unreadable(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedFile {
    pub path: String,
    pub reason: SkipReason,
}

#[derive(Debug, Default)]
pub struct SelectionOutcome {
    pub accepted: Vec<FileReference>,
    pub skipped: Vec<SkippedFile>,
}

/// Builds references for a picked batch against the already-attached set.
/// The count cap truncates the new batch only; oversized files and basename
/// duplicates are skipped with a reason.
pub async fn select_files(existing: &[FileReference], picked: &[PathBuf]) -> SelectionOutcome {
    let mut outcome = SelectionOutcome::default();

    for path in picked {
        let lossy = path.to_string_lossy().to_string();

        if existing.len() + outcome.accepted.len() >= MAX_FILE_REFERENCES {
            log::warn!("Reference cap of {} reached; skipping {}", MAX_FILE_REFERENCES, lossy);
            outcome.skipped.push(SkippedFile {
                path: lossy,
                reason: SkipReason::OverCap,
            });
            continue;
        }

        let metadata = match tokio::fs::metadata(path).await {
            Ok(m) => m,
            Err(e) => {
                log::warn!("Could not stat {}: {}", lossy, e);
                outcome.skipped.push(SkippedFile {
                    path: lossy,
                    reason: SkipReason::Unreadable(e.to_string()),
                });
                continue;
            }
        };

        let reference = if metadata.is_dir() {
            FileReference::from_dir_path(&lossy)
        } else {
            if metadata.len() > MAX_FILE_BYTES {
                log::warn!(
                    "{} is {} bytes, over the per-file cap; skipping",
                    lossy,
                    metadata.len()
                );
                outcome.skipped.push(SkippedFile {
                    path: lossy,
                    reason: SkipReason::OverSize {
                        size: metadata.len(),
                    },
                });
                continue;
            }
            let mut r = FileReference::from_path(&lossy);
            r.size = Some(metadata.len());
            r
        };

        let duplicate = existing
            .iter()
            .chain(outcome.accepted.iter())
            .any(|r| r.collides_with(&reference));
        if duplicate {
            log::debug!("{} duplicates an attached reference; skipping", lossy);
            outcome.skipped.push(SkippedFile {
                path: lossy,
                reason: SkipReason::Duplicate,
            });
            continue;
        }

        outcome.accepted.push(reference);
    }

    outcome
}

/// System file chooser; implemented by the shell. An empty result is a
/// dismissed dialog, not an error.
#[async_trait]
pub trait FileDialog: Send + Sync {
    async fn pick_files(&self, extensions: &[&str]) -> Vec<PathBuf>;
}

pub async fn select_from_dialog(
    dialog: &dyn FileDialog,
    extensions: &[&str],
    existing: &[FileReference],
) -> SelectionOutcome {
    let picked = dialog.pick_files(extensions).await;
    if picked.is_empty() {
        log::info!("File dialog dismissed");
        return SelectionOutcome::default();
    }
    select_files(existing, &picked).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_basename_in_different_directories_collides() {
        let a = FileReference::from_path_on(Platform::Linux, "/alpha/report.txt");
        let b = FileReference::from_path_on(Platform::Linux, "/beta/report.txt");
        assert!(a.collides_with(&b));
    }

    #[test]
    fn basename_comparison_is_case_sensitive() {
        let a = FileReference::from_path_on(Platform::Linux, "/alpha/Report.txt");
        let b = FileReference::from_path_on(Platform::Linux, "/beta/report.txt");
        assert!(!a.collides_with(&b));
    }

    #[test]
    fn display_identity_prefixes_files_and_directories() {
        let file = FileReference::from_path_on(Platform::Linux, "/work/notes.md");
        assert_eq!(file.display_name, "@notes.md");
        assert!(!file.is_directory);

        let dir = FileReference::from_dir_path_on(Platform::Linux, "/work/assets");
        assert_eq!(dir.display_name, "📁 assets");
        assert!(dir.is_directory);
        assert!(dir.mime_type.is_none());
    }

    #[test]
    fn paths_are_normalized_to_the_platform_convention() {
        let on_linux = FileReference::from_path_on(Platform::Linux, "C:\\work\\report.txt");
        assert_eq!(on_linux.path, "C:/work/report.txt");
        assert_eq!(on_linux.basename(), "report.txt");

        let on_windows = FileReference::from_path_on(Platform::Windows, "/tmp/shot.png");
        assert_eq!(on_windows.path, "\\tmp\\shot.png");
        assert_eq!(on_windows.basename(), "shot.png");
        assert!(on_windows.is_image);
    }

    #[test]
    fn unknown_extension_falls_back_to_octet_stream() {
        let reference = FileReference::from_path_on(Platform::Linux, "/data/blob.xyz");
        assert_eq!(
            reference.mime_type.as_deref(),
            Some("application/octet-stream")
        );
    }

    #[test]
    fn image_extension_classification() {
        assert!(is_image_path("/a/b.png"));
        assert!(is_image_path("/a/b.PNG"));
        assert!(is_image_path("shot.webp"));
        assert!(!is_image_path("/a/c.txt"));
        assert!(!is_image_path("noextension"));
    }

    #[tokio::test]
    async fn count_cap_truncates_the_new_batch_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut picked = Vec::new();
        for i in 0..12 {
            let path = dir.path().join(format!("file_{:02}.txt", i));
            std::fs::write(&path, b"contents").unwrap();
            picked.push(path);
        }

        let outcome = select_files(&[], &picked).await;
        assert_eq!(outcome.accepted.len(), MAX_FILE_REFERENCES);
        assert_eq!(outcome.skipped.len(), 2);
        assert!(outcome
            .skipped
            .iter()
            .all(|s| s.reason == SkipReason::OverCap));
    }

    #[tokio::test]
    async fn existing_references_count_against_the_cap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("extra.txt");
        std::fs::write(&path, b"x").unwrap();

        let existing: Vec<FileReference> = (0..MAX_FILE_REFERENCES)
            .map(|i| FileReference::from_path_on(Platform::Linux, &format!("/old/file_{}.txt", i)))
            .collect();

        let outcome = select_files(&existing, &[path]).await;
        assert!(outcome.accepted.is_empty());
        assert_eq!(outcome.skipped[0].reason, SkipReason::OverCap);
    }

    #[tokio::test]
    async fn oversized_file_is_skipped_with_a_reason() {
        let dir = tempfile::tempdir().unwrap();
        let big = dir.path().join("big.bin");
        std::fs::write(&big, vec![0u8; (MAX_FILE_BYTES + 1) as usize]).unwrap();
        let small = dir.path().join("small.txt");
        std::fs::write(&small, b"ok").unwrap();

        let outcome = select_files(&[], &[big, small]).await;
        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.accepted[0].basename(), "small.txt");
        assert!(matches!(
            outcome.skipped[0].reason,
            SkipReason::OverSize { .. }
        ));
    }

    #[tokio::test]
    async fn duplicate_basenames_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let inner = dir.path().join("inner");
        std::fs::create_dir(&inner).unwrap();
        let first = dir.path().join("same.txt");
        let second = inner.join("same.txt");
        std::fs::write(&first, b"a").unwrap();
        std::fs::write(&second, b"b").unwrap();

        let outcome = select_files(&[], &[first, second]).await;
        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.skipped[0].reason, SkipReason::Duplicate);
    }

    #[tokio::test]
    async fn missing_file_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let ghost = dir.path().join("ghost.txt");
        let real = dir.path().join("real.txt");
        std::fs::write(&real, b"here").unwrap();

        let outcome = select_files(&[], &[ghost, real]).await;
        assert_eq!(outcome.accepted.len(), 1);
        assert!(matches!(
            outcome.skipped[0].reason,
            SkipReason::Unreadable(_)
        ));
    }

    struct FakeDialog {
        paths: Vec<PathBuf>,
    }

    #[async_trait]
    impl FileDialog for FakeDialog {
        async fn pick_files(&self, _extensions: &[&str]) -> Vec<PathBuf> {
            self.paths.clone()
        }
    }

    #[tokio::test]
    async fn dismissed_dialog_yields_empty_outcome() {
        let dialog = FakeDialog { paths: Vec::new() };
        let outcome = select_from_dialog(&dialog, &[], &[]).await;
        assert!(outcome.accepted.is_empty());
        assert!(outcome.skipped.is_empty());
    }

    #[tokio::test]
    async fn dialog_selection_flows_through_the_caps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("picked.txt");
        std::fs::write(&path, b"picked").unwrap();
        let dialog = FakeDialog { paths: vec![path] };

        let outcome = select_from_dialog(&dialog, &["txt"], &[]).await;
        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.accepted[0].display_name, "@picked.txt");
    }
}
