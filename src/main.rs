use anyhow::Result;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};

use handback::capture::{
    CaptureError, CaptureFlow, CaptureManager, CaptureResult, HeadlessWindow, ScreenGrabber,
    SelectionRect, StartOutcome, WindowControl, XcapGrabber,
};
use handback::config::AppConfig;
use handback::files;
use handback::image::clipboard::{acquire_from_clipboard, SystemClipboard};
use handback::image::{ImagePipeline, ImagePreview};
use handback::platform::Platform;
use handback::session::host;
use handback::session::manager::{
    ExchangeSession, FileResponseWriter, LaunchArgs, SessionState, SystemProcessControl,
};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let raw: Vec<String> = std::env::args().skip(1).collect();

    // Host mode writes a request, runs this same binary as the popup, and
    // prints a digest of what came back.
    if let Some(ask) = host_args(&raw) {
        let response =
            host::collect_feedback(&ask.message, ask.full_response.as_deref(), ask.options).await?;
        println!("{}", host::summarize_response(&response));
        return Ok(());
    }

    let args = LaunchArgs::parse(raw.iter());
    if !args.is_exchange_session() {
        print_usage();
        return Ok(());
    }

    let config = AppConfig::load(&AppConfig::default_dir());
    let mut session = ExchangeSession::new();
    session.initialize(&args);

    if session.state() != SessionState::Ready {
        anyhow::bail!("no usable request was loaded; pass --request-file <path>");
    }

    show_request(&session);
    run_console(session, config).await
}

struct HostArgs {
    message: String,
    full_response: Option<String>,
    options: Option<Vec<String>>,
}

fn host_args(args: &[String]) -> Option<HostArgs> {
    let mut message = None;
    let mut full = None;
    let mut options = Vec::new();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--ask" => message = iter.next().cloned(),
            "--full" => full = iter.next().cloned(),
            "--option" => {
                if let Some(label) = iter.next() {
                    options.push(label.clone());
                }
            }
            _ => {}
        }
    }

    Some(HostArgs {
        message: message?,
        full_response: full,
        options: if options.is_empty() {
            None
        } else {
            Some(options)
        },
    })
}

fn print_usage() {
    println!("Usage:");
    println!("  handback --request-file <path>");
    println!("      Answer the given request interactively.");
    println!("  handback --ask <message> [--full <text>] [--option <label>]...");
    println!("      Write a request, run the popup, print a digest of the response.");
}

fn show_request(session: &ExchangeSession) {
    let Some(request) = session.request() else {
        return;
    };

    if let Some(full) = &request.full_response {
        println!("{}", full);
        println!();
    }
    if let Some(message) = &request.message {
        println!("{}", message);
    }
    if let Some(options) = &request.predefined_options {
        println!();
        for (index, option) in options.iter().enumerate() {
            println!("  {}. {}", index + 1, option);
        }
    }
    println!();
    println!(
        "Free text lines queue feedback. @<path> attaches, /capture grabs the screen, \
         /paste takes the clipboard image, numbers like 1,3 toggle options, /submit sends \
         ({} in the app), /cancel closes without answering.",
        Platform::current().submit_hint()
    );
}

async fn run_console(mut session: ExchangeSession, config: AppConfig) -> Result<()> {
    let pipeline = ImagePipeline::from_config(&config);
    let mut capture = CaptureManager::new(CaptureFlow::detect(), config.hide_settle_ms);
    let window = HeadlessWindow;
    let writer = FileResponseWriter;
    let process = SystemProcessControl;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut free_text: Vec<String> = Vec::new();

    loop {
        let line = match lines.next_line().await? {
            Some(line) => line,
            None => {
                log::info!("Input closed; treating as cancel");
                session.cancel(&writer, &process).await?;
                return Ok(());
            }
        };
        let trimmed = line.trim();

        match trimmed {
            "" => continue,
            "/cancel" => {
                session.cancel(&writer, &process).await?;
                return Ok(());
            }
            "/submit" => {
                session.draft.set_text(&free_text.join("\n"));
                session.submit(&writer, &process).await?;
                return Ok(());
            }
            "/capture" => capture_screen(&mut capture, &window, &mut session).await,
            "/displays" => list_displays(),
            "/paste" => paste_clipboard(&pipeline, &mut session).await,
            _ if trimmed.starts_with('@') => {
                attach_path(&pipeline, &mut session, trimmed[1..].trim()).await
            }
            _ => match parse_option_indices(trimmed) {
                Some(indices) => toggle_options(&mut session, &indices),
                None => free_text.push(trimmed.to_string()),
            },
        }
    }
}

async fn capture_screen(
    manager: &mut CaptureManager,
    window: &dyn WindowControl,
    session: &mut ExchangeSession,
) {
    let result = match run_capture(manager, window).await {
        Ok(Some(result)) => result,
        Ok(None) => {
            println!("Capture dismissed.");
            return;
        }
        Err(e) => {
            log::warn!("Capture failed: {}", e);
            return;
        }
    };

    let preview = ImagePreview::from_capture(&result);
    let label = format!("{}x{}", preview.width, preview.height);
    if session.draft.add_image(preview) {
        println!("Captured {}.", label);
    } else {
        println!("That capture is already attached.");
    }
}

async fn run_capture(
    manager: &mut CaptureManager,
    window: &dyn WindowControl,
) -> Result<Option<CaptureResult>, CaptureError> {
    match manager.start(window).await? {
        StartOutcome::Captured(result) => Ok(Some(result)),
        StartOutcome::Cancelled => Ok(None),
        StartOutcome::SelectionPending => {
            // No pointer on a terminal; take the whole held frame.
            let (width, height) = manager.pending_frame_size().ok_or(CaptureError::State)?;
            manager.update_selection(SelectionRect {
                x: 0.0,
                y: 0.0,
                width: width as f64,
                height: height as f64,
            })?;
            manager.freeze_selection()?;
            let result = manager.confirm_selection(window, width as f64, height as f64)?;
            Ok(Some(result))
        }
    }
}

fn list_displays() {
    match XcapGrabber.list_displays() {
        Ok(displays) => {
            for display in displays {
                println!(
                    "  {}: {} {}x{} at ({}, {}){}",
                    display.id,
                    display.name,
                    display.width,
                    display.height,
                    display.x,
                    display.y,
                    if display.is_primary { " [primary]" } else { "" }
                );
            }
        }
        Err(e) => println!("Could not list displays: {}", e),
    }
}

async fn paste_clipboard(pipeline: &ImagePipeline, session: &mut ExchangeSession) {
    let mut clipboard = match SystemClipboard::new() {
        Ok(clipboard) => clipboard,
        Err(e) => {
            println!("{}", e);
            return;
        }
    };
    match acquire_from_clipboard(pipeline, &mut clipboard).await {
        Ok(preview) => {
            let label = format!("{}x{}", preview.width, preview.height);
            if session.draft.add_image(preview) {
                println!("Pasted image ({}).", label);
            } else {
                println!("That image is already attached.");
            }
        }
        Err(e) => println!("{}", e),
    }
}

async fn attach_path(pipeline: &ImagePipeline, session: &mut ExchangeSession, raw: &str) {
    if raw.is_empty() {
        println!("Usage: @<path>");
        return;
    }

    if files::is_image_path(raw) {
        match tokio::fs::read(raw).await {
            Ok(bytes) => {
                let mime = files::mime_for_extension(raw).unwrap_or("application/octet-stream");
                match pipeline.acquire(&bytes, mime).await {
                    Ok(preview) => {
                        let label = format!("{}x{}", preview.width, preview.height);
                        if session.draft.add_image(preview) {
                            println!("Attached image ({}).", label);
                        } else {
                            println!("That image is already attached.");
                        }
                    }
                    Err(e) => println!("Could not ingest {}: {}", raw, e),
                }
            }
            Err(e) => println!("Could not read {}: {}", raw, e),
        }
        return;
    }

    let outcome = files::select_files(&session.draft.file_references, &[PathBuf::from(raw)]).await;
    for skipped in &outcome.skipped {
        println!("Skipped {}: {}", skipped.path, skip_reason_text(&skipped.reason));
    }
    for reference in outcome.accepted {
        println!("Attached {}.", reference.display_name);
        session.draft.add_reference(reference);
    }
}

fn skip_reason_text(reason: &files::SkipReason) -> String {
    match reason {
        files::SkipReason::OverCap => {
            format!("attachment cap of {} reached", files::MAX_FILE_REFERENCES)
        }
        files::SkipReason::OverSize { size } => {
            format!("{} bytes is over the per-file cap", size)
        }
        files::SkipReason::Duplicate => "a file with this name is already attached".to_string(),
        files::SkipReason::Unreadable(e) => e.clone(),
    }
}

fn parse_option_indices(line: &str) -> Option<Vec<usize>> {
    let mut indices = Vec::new();
    for part in line.split(',') {
        let part = part.trim();
        if part.is_empty() {
            return None;
        }
        indices.push(part.parse::<usize>().ok()?);
    }
    Some(indices)
}

fn toggle_options(session: &mut ExchangeSession, indices: &[usize]) {
    let Some(options) = session
        .request()
        .and_then(|r| r.predefined_options.clone())
    else {
        println!("This request has no options.");
        return;
    };

    for index in indices {
        match index.checked_sub(1).and_then(|i| options.get(i)) {
            Some(label) => {
                let selected = session.draft.toggle_option(label);
                println!("{} {}", if selected { "[x]" } else { "[ ]" }, label);
            }
            None => println!("No option {}.", index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_args_require_a_message() {
        assert!(host_args(&["--full".to_string(), "text".to_string()]).is_none());

        let parsed = host_args(&[
            "--ask".to_string(),
            "Proceed?".to_string(),
            "--option".to_string(),
            "Yes".to_string(),
            "--option".to_string(),
            "No".to_string(),
        ])
        .unwrap();
        assert_eq!(parsed.message, "Proceed?");
        assert_eq!(
            parsed.options,
            Some(vec!["Yes".to_string(), "No".to_string()])
        );
        assert!(parsed.full_response.is_none());
    }

    #[test]
    fn option_index_lines_are_distinguished_from_free_text() {
        assert_eq!(parse_option_indices("1"), Some(vec![1]));
        assert_eq!(parse_option_indices("1, 3"), Some(vec![1, 3]));
        assert_eq!(parse_option_indices("not numbers"), None);
        assert_eq!(parse_option_indices("1,"), None);
        assert_eq!(parse_option_indices(""), None);
    }
}
