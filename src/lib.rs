//! File-based feedback exchange between a host process and an interactive
//! popup: the host writes a request file and launches the popup, the popup
//! collects text, options and attachments, then leaves a response file next
//! to the request and exits.

pub mod capture;
pub mod config;
pub mod files;
pub mod image;
pub mod platform;
pub mod session;
