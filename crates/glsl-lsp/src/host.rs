//! Hosting environment: filesystem access and the validator process.
//!
//! [`DesktopHost`] reads documents with tokio's filesystem API and runs the
//! validator as a child process. [`EmbeddedHost`] has neither capability;
//! the server still tracks documents and versions but never validates.

use crate::error::ServerError;
use futures::future::{BoxFuture, FutureExt};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// One validator run: executable, arguments and the text fed on stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorInvocation {
    /// Resolved validator executable.
    pub program: PathBuf,
    /// Command-line arguments.
    pub args: Vec<String>,
    /// Source text written to the process's stdin.
    pub input: String,
}

/// Capabilities the server needs from its environment.
pub trait Host: Send + Sync + 'static {
    /// Whether subprocesses are unavailable in this environment.
    fn is_embedded(&self) -> bool;

    /// Resolve the validator executable, or `None` if it cannot be run.
    fn resolve_validator(&self, name: &str) -> Option<PathBuf>;

    /// Read a document that is not open in the editor.
    fn get_document_content(&self, path: &Path) -> BoxFuture<'static, Result<String, ServerError>>;

    /// Run the validator and return everything it printed.
    ///
    /// A non-zero exit status is not an error: the validator reports
    /// problems in its output and exits with a failure code.
    fn run_validator(
        &self,
        invocation: ValidatorInvocation,
    ) -> BoxFuture<'static, Result<String, ServerError>>;
}

/// Host for a regular desktop process.
#[derive(Debug, Default, Clone, Copy)]
pub struct DesktopHost;

impl Host for DesktopHost {
    fn is_embedded(&self) -> bool {
        false
    }

    fn resolve_validator(&self, name: &str) -> Option<PathBuf> {
        match which::which(name) {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::warn!("Validator {} is not available: {}", name, e);
                None
            }
        }
    }

    fn get_document_content(&self, path: &Path) -> BoxFuture<'static, Result<String, ServerError>> {
        let path = path.to_path_buf();
        async move {
            tokio::fs::read_to_string(&path)
                .await
                .map_err(|source| ServerError::ReadDocument { path, source })
        }
        .boxed()
    }

    fn run_validator(
        &self,
        invocation: ValidatorInvocation,
    ) -> BoxFuture<'static, Result<String, ServerError>> {
        run_validator(invocation).boxed()
    }
}

/// Spawn the validator, feed it the source and collect stdout and stderr.
pub async fn run_validator(invocation: ValidatorInvocation) -> Result<String, ServerError> {
    let ValidatorInvocation {
        program,
        args,
        input,
    } = invocation;

    let mut child = Command::new(&program)
        .args(&args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ServerError::SpawnValidator {
            program: program.clone(),
            source,
        })?;

    let stdin = child.stdin.take();
    let write = async move {
        let Some(mut stdin) = stdin else {
            return Ok(());
        };
        stdin.write_all(input.as_bytes()).await?;
        stdin.shutdown().await
    };

    let (written, output) = tokio::join!(write, child.wait_with_output());
    let io_error = |source| ServerError::ValidatorIo {
        program: program.clone(),
        source,
    };
    // The validator may exit before reading everything; its output still counts.
    match written {
        Err(e) if e.kind() != ErrorKind::BrokenPipe => return Err(io_error(e)),
        _ => {}
    }
    let output = output.map_err(io_error)?;

    tracing::debug!(
        "Validator {} exited with {} ({} bytes of output)",
        program.display(),
        output.status,
        output.stdout.len() + output.stderr.len()
    );

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    if !output.stderr.is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&String::from_utf8_lossy(&output.stderr));
    }
    Ok(text)
}

/// Host without filesystem or subprocess access.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmbeddedHost;

impl Host for EmbeddedHost {
    fn is_embedded(&self) -> bool {
        true
    }

    fn resolve_validator(&self, _name: &str) -> Option<PathBuf> {
        None
    }

    fn get_document_content(&self, _path: &Path) -> BoxFuture<'static, Result<String, ServerError>> {
        futures::future::ready(Ok(String::new())).boxed()
    }

    fn run_validator(
        &self,
        _invocation: ValidatorInvocation,
    ) -> BoxFuture<'static, Result<String, ServerError>> {
        futures::future::ready(Ok(String::new())).boxed()
    }
}
