use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use super::protocol::{
    self, FeedbackRequest, FeedbackResponse, FileReferenceAttachment, ImageAttachment,
    ProtocolError,
};
use crate::files::FileReference;
use crate::image::ImagePreview;

pub type SessionHandle = Arc<Mutex<ExchangeSession>>;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct LaunchArgs {
    pub popup_mode: bool,
    pub request_file: Option<PathBuf>,
}

impl LaunchArgs {
    /// Unknown arguments are ignored so hosts can pass their own flags
    /// alongside ours.
    pub fn parse<I>(args: I) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut parsed = Self::default();
        let mut iter = args.into_iter();
        while let Some(arg) = iter.next() {
            match arg.as_ref() {
                "--popup" | "-p" => parsed.popup_mode = true,
                "--request-file" | "-r" => {
                    parsed.popup_mode = true;
                    if let Some(path) = iter.next() {
                        parsed.request_file = Some(PathBuf::from(path.as_ref()));
                    }
                }
                _ => {}
            }
        }
        parsed
    }

    pub fn is_exchange_session(&self) -> bool {
        self.popup_mode || self.request_file.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Uninitialized,
    AwaitingRequest,
    Ready,
    Submitted,
    Cancelled,
    Terminated,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no request is loaded")]
    NoRequest,
    #[error("the exchange is already resolved")]
    AlreadyResolved,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Writes the resolved response where the host expects it. Injected so the
/// session logic can be exercised without touching the filesystem.
#[async_trait]
pub trait ResponseWriter: Send + Sync {
    async fn write(&self, path: &Path, response: &FeedbackResponse) -> Result<(), ProtocolError>;
}

pub struct FileResponseWriter;

#[async_trait]
impl ResponseWriter for FileResponseWriter {
    async fn write(&self, path: &Path, response: &FeedbackResponse) -> Result<(), ProtocolError> {
        protocol::write_response(path, response)
    }
}

/// Termination is requested, never performed inline by the session.
pub trait ProcessControl: Send + Sync {
    fn request_exit(&self, code: i32);
}

pub struct SystemProcessControl;

impl ProcessControl for SystemProcessControl {
    fn request_exit(&self, code: i32) {
        std::process::exit(code);
    }
}

/// Joins selected option labels and the trimmed free text with newlines.
/// Nothing at all composes to `None`, not an empty string.
pub fn compose_user_input(selected: &[String], free_text: &str) -> Option<String> {
    let mut lines: Vec<String> = selected.to_vec();
    let trimmed = free_text.trim();
    if !trimmed.is_empty() {
        lines.push(trimmed.to_string());
    }
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

/// What the user has assembled so far. Attachments deduplicate on add:
/// images by payload, references by basename.
#[derive(Debug, Default)]
pub struct ResponseDraft {
    pub free_text: String,
    pub selected_options: Vec<String>,
    pub images: Vec<ImagePreview>,
    pub file_references: Vec<FileReference>,
}

impl ResponseDraft {
    pub fn set_text(&mut self, text: &str) {
        self.free_text = text.to_string();
    }

    pub fn toggle_option(&mut self, label: &str) -> bool {
        if let Some(pos) = self.selected_options.iter().position(|o| o == label) {
            self.selected_options.remove(pos);
            false
        } else {
            self.selected_options.push(label.to_string());
            true
        }
    }

    pub fn add_image(&mut self, preview: ImagePreview) -> bool {
        if self.images.iter().any(|p| p.data == preview.data) {
            log::debug!("Duplicate image payload ignored");
            return false;
        }
        self.images.push(preview);
        true
    }

    pub fn remove_image(&mut self, id: &str) -> bool {
        let before = self.images.len();
        self.images.retain(|p| p.id != id);
        self.images.len() != before
    }

    pub fn add_reference(&mut self, reference: FileReference) -> bool {
        if self
            .file_references
            .iter()
            .any(|r| r.collides_with(&reference))
        {
            log::debug!("Duplicate reference {} ignored", reference.display_name);
            return false;
        }
        self.file_references.push(reference);
        true
    }

    pub fn remove_reference(&mut self, id: &str) -> bool {
        let before = self.file_references.len();
        self.file_references.retain(|r| r.id != id);
        self.file_references.len() != before
    }

    pub fn is_empty(&self) -> bool {
        self.free_text.trim().is_empty()
            && self.selected_options.is_empty()
            && self.images.is_empty()
            && self.file_references.is_empty()
    }
}

pub struct ExchangeSession {
    state: SessionState,
    request: Option<FeedbackRequest>,
    request_path: Option<PathBuf>,
    response_path: Option<PathBuf>,
    pub draft: ResponseDraft,
}

impl Default for ExchangeSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ExchangeSession {
    pub fn new() -> Self {
        Self {
            state: SessionState::Uninitialized,
            request: None,
            request_path: None,
            response_path: None,
            draft: ResponseDraft::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn request(&self) -> Option<&FeedbackRequest> {
        self.request.as_ref()
    }

    pub fn request_path(&self) -> Option<&Path> {
        self.request_path.as_deref()
    }

    pub fn response_path(&self) -> Option<&Path> {
        self.response_path.as_deref()
    }

    pub fn is_resolved(&self) -> bool {
        matches!(
            self.state,
            SessionState::Submitted | SessionState::Cancelled | SessionState::Terminated
        )
    }

    /// Applies the launch arguments once. A request file that cannot be
    /// loaded resets the session rather than leaving it half-initialized.
    pub fn initialize(&mut self, args: &LaunchArgs) {
        if self.state != SessionState::Uninitialized {
            log::warn!("Session already initialized; ignoring");
            return;
        }
        if !args.is_exchange_session() {
            log::info!("No exchange flags given; session stays idle");
            return;
        }

        self.state = SessionState::AwaitingRequest;

        let Some(path) = args.request_file.clone() else {
            log::info!("Popup mode without a request file; awaiting one");
            return;
        };
        if let Err(e) = self.load_request(&path) {
            log::error!("Could not load request {}: {}", path.display(), e);
            self.reset();
        }
    }

    pub fn load_request(&mut self, path: &Path) -> Result<(), SessionError> {
        if self.is_resolved() {
            return Err(SessionError::AlreadyResolved);
        }

        let request = protocol::read_request(path)?;
        protocol::validate_request(&request)?;
        let response_path = protocol::derive_response_path(path)?;

        log::info!("Loaded request {} from {}", request.id, path.display());
        self.request = Some(request);
        self.request_path = Some(path.to_path_buf());
        self.response_path = Some(response_path);
        self.state = SessionState::Ready;
        Ok(())
    }

    /// Selected options in the request's declared order; selections with no
    /// predefined counterpart keep their insertion order at the tail.
    pub fn ordered_selections(&self) -> Vec<String> {
        let selected = &self.draft.selected_options;
        let Some(request) = &self.request else {
            return selected.clone();
        };
        let predefined = request.predefined_options.as_deref().unwrap_or(&[]);

        let mut ordered: Vec<String> = predefined
            .iter()
            .filter(|option| selected.iter().any(|s| s == *option))
            .cloned()
            .collect();
        for extra in selected {
            if !predefined.iter().any(|option| option == extra) {
                ordered.push(extra.clone());
            }
        }
        ordered
    }

    pub async fn submit(
        &mut self,
        writer: &dyn ResponseWriter,
        process: &dyn ProcessControl,
    ) -> Result<(), SessionError> {
        if self.is_resolved() {
            return Err(SessionError::AlreadyResolved);
        }
        if self.state != SessionState::Ready {
            return Err(SessionError::NoRequest);
        }

        let response = self.build_response();
        self.resolve(response, SessionState::Submitted, writer, process)
            .await
    }

    /// Before a request is loaded there is nothing to answer, so cancelling
    /// closes without writing anything.
    pub async fn cancel(
        &mut self,
        writer: &dyn ResponseWriter,
        process: &dyn ProcessControl,
    ) -> Result<(), SessionError> {
        if self.is_resolved() {
            return Err(SessionError::AlreadyResolved);
        }

        if self.state == SessionState::Ready {
            let response = self.cancelled_response();
            return self
                .resolve(response, SessionState::Cancelled, writer, process)
                .await;
        }

        log::info!("Cancelled before any request was loaded; closing without a response");
        self.state = SessionState::Cancelled;
        process.request_exit(0);
        self.state = SessionState::Terminated;
        Ok(())
    }

    fn build_response(&self) -> FeedbackResponse {
        let selected = self.ordered_selections();
        FeedbackResponse {
            request_id: self.request_id(),
            user_input: compose_user_input(&selected, &self.draft.free_text),
            selected_options: selected,
            images: self.draft.images.iter().map(ImageAttachment::from).collect(),
            file_references: self
                .draft
                .file_references
                .iter()
                .map(FileReferenceAttachment::from)
                .collect(),
            cancelled: false,
        }
    }

    /// A cancelled exchange discards the draft; the host only learns that
    /// the user declined.
    fn cancelled_response(&self) -> FeedbackResponse {
        FeedbackResponse {
            request_id: self.request_id(),
            user_input: None,
            selected_options: Vec::new(),
            images: Vec::new(),
            file_references: Vec::new(),
            cancelled: true,
        }
    }

    fn request_id(&self) -> String {
        self.request
            .as_ref()
            .map(|r| r.id.clone())
            .unwrap_or_default()
    }

    /// Termination is requested whether or not the write succeeded; a popup
    /// that lingers after resolution would stall the host forever.
    async fn resolve(
        &mut self,
        response: FeedbackResponse,
        resolved: SessionState,
        writer: &dyn ResponseWriter,
        process: &dyn ProcessControl,
    ) -> Result<(), SessionError> {
        let path = self.response_path.clone().ok_or(SessionError::NoRequest)?;

        let written = writer.write(&path, &response).await;
        match &written {
            Ok(()) => log::info!(
                "Response for {} written to {}",
                response.request_id,
                path.display()
            ),
            Err(e) => log::error!("Could not write response to {}: {}", path.display(), e),
        }

        self.state = resolved;
        process.request_exit(0);
        self.state = SessionState::Terminated;
        written.map_err(SessionError::from)
    }

    fn reset(&mut self) {
        self.state = SessionState::Uninitialized;
        self.request = None;
        self.request_path = None;
        self.response_path = None;
        self.draft = ResponseDraft::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingWriter {
        writes: Mutex<Vec<(PathBuf, FeedbackResponse)>>,
        fail: bool,
    }

    impl RecordingWriter {
        fn new() -> Self {
            Self {
                writes: Mutex::new(Vec::new()),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                writes: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        fn written(&self) -> Vec<(PathBuf, FeedbackResponse)> {
            self.writes.lock().clone()
        }
    }

    #[async_trait]
    impl ResponseWriter for RecordingWriter {
        async fn write(
            &self,
            path: &Path,
            response: &FeedbackResponse,
        ) -> Result<(), ProtocolError> {
            if self.fail {
                return Err(ProtocolError::Write {
                    path: path.to_path_buf(),
                    source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
                });
            }
            self.writes.lock().push((path.to_path_buf(), response.clone()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingExit {
        codes: Mutex<Vec<i32>>,
    }

    impl ProcessControl for RecordingExit {
        fn request_exit(&self, code: i32) {
            self.codes.lock().push(code);
        }
    }

    fn request_on_disk(dir: &Path, id: &str, options: Option<Vec<&str>>) -> PathBuf {
        let path = dir.join(protocol::request_file_name(id));
        let request = serde_json::json!({
            "id": id,
            "message": "Need your call on this",
            "predefined_options": options,
            "created_at": chrono::Utc::now().to_rfc3339(),
        });
        std::fs::write(&path, serde_json::to_string_pretty(&request).unwrap()).unwrap();
        path
    }

    fn preview(id: &str, data: &str) -> ImagePreview {
        ImagePreview {
            id: id.to_string(),
            data: data.to_string(),
            mime_type: "image/png".to_string(),
            width: 2,
            height: 2,
            size: data.len(),
        }
    }

    #[test]
    fn launch_args_parse_request_file_and_imply_popup_mode() {
        let args = LaunchArgs::parse(["--request-file", "/tmp/handback_request_1.json"]);
        assert!(args.popup_mode);
        assert_eq!(
            args.request_file,
            Some(PathBuf::from("/tmp/handback_request_1.json"))
        );

        let short = LaunchArgs::parse(["-r", "/tmp/r.json", "--verbose"]);
        assert!(short.popup_mode);
        assert!(short.request_file.is_some());

        let popup_only = LaunchArgs::parse(["-p"]);
        assert!(popup_only.popup_mode);
        assert!(popup_only.request_file.is_none());

        let none = LaunchArgs::parse(["--verbose"]);
        assert!(!none.is_exchange_session());
    }

    #[test]
    fn flag_without_a_value_still_enters_popup_mode() {
        let args = LaunchArgs::parse(["--request-file"]);
        assert!(args.popup_mode);
        assert!(args.request_file.is_none());

        let mut session = ExchangeSession::new();
        session.initialize(&args);
        assert_eq!(session.state(), SessionState::AwaitingRequest);
    }

    #[test]
    fn no_flags_leave_the_session_uninitialized() {
        let mut session = ExchangeSession::new();
        session.initialize(&LaunchArgs::default());
        assert_eq!(session.state(), SessionState::Uninitialized);
    }

    #[tokio::test]
    async fn cancel_before_any_request_writes_nothing_but_still_exits() {
        let mut session = ExchangeSession::new();
        session.initialize(&LaunchArgs {
            popup_mode: true,
            request_file: None,
        });
        assert_eq!(session.state(), SessionState::AwaitingRequest);

        let writer = RecordingWriter::new();
        let exit = RecordingExit::default();
        session.cancel(&writer, &exit).await.unwrap();

        assert!(writer.written().is_empty());
        assert_eq!(*exit.codes.lock(), vec![0]);
        assert_eq!(session.state(), SessionState::Terminated);
    }

    #[tokio::test]
    async fn full_submission_flow_writes_next_to_the_request() {
        let dir = tempfile::tempdir().unwrap();
        let request_path = request_on_disk(dir.path(), "req-1", Some(vec!["Approve", "Reject"]));

        let mut session = ExchangeSession::new();
        session.initialize(&LaunchArgs {
            popup_mode: true,
            request_file: Some(request_path),
        });
        assert_eq!(session.state(), SessionState::Ready);

        session.draft.toggle_option("Reject");
        session.draft.toggle_option("Approve");
        session.draft.set_text("  ship it  ");

        let writer = RecordingWriter::new();
        let exit = RecordingExit::default();
        session.submit(&writer, &exit).await.unwrap();

        let written = writer.written();
        assert_eq!(written.len(), 1);
        assert_eq!(
            written[0].0,
            dir.path().join(protocol::response_file_name("req-1"))
        );

        let response = &written[0].1;
        assert_eq!(response.request_id, "req-1");
        assert!(!response.cancelled);
        assert_eq!(response.selected_options, vec!["Approve", "Reject"]);
        assert_eq!(
            response.user_input.as_deref(),
            Some("Approve\nReject\nship it")
        );
        assert_eq!(*exit.codes.lock(), vec![0]);
        assert_eq!(session.state(), SessionState::Terminated);
    }

    #[test]
    fn user_input_joins_options_and_trimmed_text() {
        assert_eq!(
            compose_user_input(&["Continue".to_string()], " ok "),
            Some("Continue\nok".to_string())
        );
        assert_eq!(
            compose_user_input(&["A".to_string(), "B".to_string()], ""),
            Some("A\nB".to_string())
        );
        assert_eq!(compose_user_input(&[], "just text"), Some("just text".to_string()));
        assert_eq!(compose_user_input(&[], "   \n  "), None);
    }

    #[tokio::test]
    async fn whitespace_only_submission_is_null_input_not_a_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let request_path = request_on_disk(dir.path(), "req-2", None);

        let mut session = ExchangeSession::new();
        session.initialize(&LaunchArgs {
            popup_mode: true,
            request_file: Some(request_path),
        });
        session.draft.set_text("   \n ");

        let writer = RecordingWriter::new();
        let exit = RecordingExit::default();
        session.submit(&writer, &exit).await.unwrap();

        let response = &writer.written()[0].1;
        assert_eq!(response.user_input, None);
        assert!(!response.cancelled);
    }

    #[tokio::test]
    async fn cancelling_a_ready_exchange_discards_the_draft() {
        let dir = tempfile::tempdir().unwrap();
        let request_path = request_on_disk(dir.path(), "req-3", Some(vec!["Keep going"]));

        let mut session = ExchangeSession::new();
        session.initialize(&LaunchArgs {
            popup_mode: true,
            request_file: Some(request_path),
        });
        session.draft.toggle_option("Keep going");
        session.draft.set_text("half-typed thought");

        let writer = RecordingWriter::new();
        let exit = RecordingExit::default();
        session.cancel(&writer, &exit).await.unwrap();

        let response = &writer.written()[0].1;
        assert!(response.cancelled);
        assert_eq!(response.user_input, None);
        assert!(response.selected_options.is_empty());
        assert_eq!(session.state(), SessionState::Terminated);
    }

    #[test]
    fn malformed_request_file_resets_to_uninitialized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(protocol::request_file_name("bad"));
        std::fs::write(&path, b"{ not json").unwrap();

        let mut session = ExchangeSession::new();
        session.initialize(&LaunchArgs {
            popup_mode: true,
            request_file: Some(path),
        });
        assert_eq!(session.state(), SessionState::Uninitialized);
        assert!(session.request().is_none());
    }

    #[test]
    fn markerless_request_path_resets_to_uninitialized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feedback.json");
        std::fs::write(
            &path,
            serde_json::to_string(&serde_json::json!({"id": "x", "message": "hi"})).unwrap(),
        )
        .unwrap();

        let mut session = ExchangeSession::new();
        session.initialize(&LaunchArgs {
            popup_mode: true,
            request_file: Some(path),
        });
        assert_eq!(session.state(), SessionState::Uninitialized);
    }

    #[tokio::test]
    async fn a_resolved_exchange_cannot_be_resolved_again() {
        let dir = tempfile::tempdir().unwrap();
        let request_path = request_on_disk(dir.path(), "req-4", None);

        let mut session = ExchangeSession::new();
        session.initialize(&LaunchArgs {
            popup_mode: true,
            request_file: Some(request_path),
        });

        let writer = RecordingWriter::new();
        let exit = RecordingExit::default();
        session.submit(&writer, &exit).await.unwrap();

        assert!(matches!(
            session.submit(&writer, &exit).await,
            Err(SessionError::AlreadyResolved)
        ));
        assert!(matches!(
            session.cancel(&writer, &exit).await,
            Err(SessionError::AlreadyResolved)
        ));
        assert_eq!(writer.written().len(), 1);
    }

    #[tokio::test]
    async fn submit_without_a_request_is_refused() {
        let mut session = ExchangeSession::new();
        session.initialize(&LaunchArgs {
            popup_mode: true,
            request_file: None,
        });

        let writer = RecordingWriter::new();
        let exit = RecordingExit::default();
        assert!(matches!(
            session.submit(&writer, &exit).await,
            Err(SessionError::NoRequest)
        ));
        assert!(writer.written().is_empty());
        assert!(exit.codes.lock().is_empty());
    }

    #[tokio::test]
    async fn write_failure_still_requests_termination() {
        let dir = tempfile::tempdir().unwrap();
        let request_path = request_on_disk(dir.path(), "req-5", None);

        let mut session = ExchangeSession::new();
        session.initialize(&LaunchArgs {
            popup_mode: true,
            request_file: Some(request_path),
        });

        let writer = RecordingWriter::failing();
        let exit = RecordingExit::default();
        let outcome = session.submit(&writer, &exit).await;

        assert!(matches!(outcome, Err(SessionError::Protocol(_))));
        assert_eq!(*exit.codes.lock(), vec![0]);
        assert_eq!(session.state(), SessionState::Terminated);
    }

    #[test]
    fn draft_rejects_duplicate_image_payloads_and_basenames() {
        let mut draft = ResponseDraft::default();
        assert!(draft.add_image(preview("a", "payload-1")));
        assert!(!draft.add_image(preview("b", "payload-1")));
        assert!(draft.add_image(preview("c", "payload-2")));
        assert_eq!(draft.images.len(), 2);

        assert!(draft.remove_image("a"));
        assert!(!draft.remove_image("a"));

        let first = FileReference::from_path_on(crate::platform::Platform::Linux, "/a/report.txt");
        let clash = FileReference::from_path_on(crate::platform::Platform::Linux, "/b/report.txt");
        assert!(draft.add_reference(first));
        assert!(!draft.add_reference(clash));
        assert_eq!(draft.file_references.len(), 1);
    }

    #[test]
    fn toggling_an_option_twice_clears_it() {
        let mut draft = ResponseDraft::default();
        assert!(draft.toggle_option("A"));
        assert!(!draft.toggle_option("A"));
        assert!(draft.selected_options.is_empty());
    }

    #[tokio::test]
    async fn selections_follow_the_predefined_order_with_extras_last() {
        let dir = tempfile::tempdir().unwrap();
        let request_path = request_on_disk(dir.path(), "req-6", Some(vec!["First", "Second"]));

        let mut session = ExchangeSession::new();
        session.initialize(&LaunchArgs {
            popup_mode: true,
            request_file: Some(request_path),
        });
        session.draft.toggle_option("Custom note");
        session.draft.toggle_option("Second");
        session.draft.toggle_option("First");

        assert_eq!(
            session.ordered_selections(),
            vec!["First", "Second", "Custom note"]
        );
    }
}
