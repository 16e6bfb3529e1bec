//! Language Server Protocol diagnostics for GLSL shaders.
//!
//! The server validates shader sources with an external `glslangValidator`
//! process and reports its findings as LSP diagnostics:
//! - Live text for open documents, disk content for the rest of the workspace
//! - Push (`textDocument/publishDiagnostics`) or pull (`textDocument/diagnostic`)
//!   delivery, chosen from the client's capabilities
//! - Results cached per `(content, configuration)` version so identical
//!   requests never run the validator twice
//!
//! # Architecture
//!
//! - **Main loop**: applies notifications in order and dispatches requests
//! - **Analyzer**: owns the document registry and decides what to validate
//! - **Host**: filesystem and subprocess access, absent when embedded
//!
//! # Example
//!
//! ```no_run
//! fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     glsl_lsp::start_stdio(false)
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod analysis;
pub mod config;
pub mod delivery;
pub mod document;
pub mod error;
pub mod host;
pub mod main_loop;
pub mod telemetry;
pub mod uri;

mod server;
mod vfs;

pub use analysis::Analyzer;
pub use config::Configuration;
pub use delivery::{Client, Delivery};
pub use error::ServerError;
pub use host::{DesktopHost, EmbeddedHost, Host, ValidatorInvocation};
pub use main_loop::{ClientSupport, MainLoopState, run_main_loop};
pub use server::{run_server, server_capabilities, start_stdio};
pub use vfs::Vfs;

/// LSP server version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
