//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use futures::future::{BoxFuture, FutureExt};
use glsl_lsp::{Client, Configuration, Delivery, Host, ServerError, ValidatorInvocation};
use lsp_types::notification::{Notification, PublishDiagnostics};
use lsp_types::{PublishDiagnosticsParams, Uri};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Semaphore;

/// Host that fakes the validator: every line containing `bad` is reported
/// as an undeclared identifier.
#[derive(Default)]
pub struct FakeHost {
    files: Mutex<HashMap<PathBuf, String>>,
    runs: AtomicUsize,
    reads: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
}

impl FakeHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A host whose validator runs block until [`FakeHost::release`].
    pub fn gated() -> Arc<Self> {
        Arc::new(Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::default()
        })
    }

    pub fn release(&self, runs: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(runs);
        }
    }

    pub fn write(&self, path: &Path, text: &str) {
        self.files.lock().insert(path.to_path_buf(), text.to_string());
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

pub fn fake_output(source: &str) -> String {
    source
        .lines()
        .enumerate()
        .filter(|(_, line)| line.contains("bad"))
        .map(|(i, _)| format!("ERROR: 0:{}: 'bad' : undeclared identifier\n", i + 1))
        .collect()
}

impl Host for FakeHost {
    fn is_embedded(&self) -> bool {
        false
    }

    fn resolve_validator(&self, name: &str) -> Option<PathBuf> {
        Some(PathBuf::from(name))
    }

    fn get_document_content(&self, path: &Path) -> BoxFuture<'static, Result<String, ServerError>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let path = path.to_path_buf();
        let content = self.files.lock().get(&path).cloned();
        async move {
            content.ok_or_else(|| ServerError::ReadDocument {
                path,
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })
        }
        .boxed()
    }

    fn run_validator(
        &self,
        invocation: ValidatorInvocation,
    ) -> BoxFuture<'static, Result<String, ServerError>> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.clone();
        async move {
            if let Some(gate) = gate {
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
            }
            Ok(fake_output(&invocation.input))
        }
        .boxed()
    }
}

/// An absolute path for a shader that only exists in the fake host.
pub fn shader(name: &str) -> PathBuf {
    std::env::temp_dir().join("glsl-lsp-tests").join(name)
}

pub fn uri(path: &Path) -> Uri {
    glsl_lsp::uri::path_to_uri(path).unwrap()
}

/// Configuration without the debounce delay.
pub fn immediate() -> Configuration {
    let mut configuration = Configuration::default();
    configuration.diagnostics.delay = 0;
    configuration
}

pub fn push() -> Delivery {
    Delivery::Push {
        version_support: true,
    }
}

pub fn pull() -> Delivery {
    Delivery::Pull {
        refresh_support: true,
    }
}

pub fn client() -> (Client, crossbeam_channel::Receiver<lsp_server::Message>) {
    let (sender, receiver) = crossbeam_channel::unbounded();
    (Client::new(sender), receiver)
}

/// Every message sent so far.
pub fn drain(receiver: &crossbeam_channel::Receiver<lsp_server::Message>) -> Vec<lsp_server::Message> {
    receiver.try_iter().collect()
}

/// The `publishDiagnostics` notifications among `messages`.
pub fn published(messages: &[lsp_server::Message]) -> Vec<PublishDiagnosticsParams> {
    messages
        .iter()
        .filter_map(|msg| match msg {
            lsp_server::Message::Notification(n) if n.method == PublishDiagnostics::METHOD => {
                serde_json::from_value(n.params.clone()).ok()
            }
            _ => None,
        })
        .collect()
}

/// The responses among `messages`.
pub fn responses(messages: &[lsp_server::Message]) -> Vec<lsp_server::Response> {
    messages
        .iter()
        .filter_map(|msg| match msg {
            lsp_server::Message::Response(r) => Some(r.clone()),
            _ => None,
        })
        .collect()
}
