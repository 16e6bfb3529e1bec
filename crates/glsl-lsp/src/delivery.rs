//! Outgoing messages and the diagnostic delivery strategy.
//!
//! The delivery mode is chosen once from the client's capabilities:
//! push (`textDocument/publishDiagnostics`) when available, otherwise pull
//! (`textDocument/diagnostic`), otherwise diagnostics are disabled.

use crossbeam_channel::Sender;
use lsp_types::notification::{Notification, PublishDiagnostics};
use lsp_types::request::{Request, WorkspaceDiagnosticRefresh};
use lsp_types::{ClientCapabilities, Diagnostic, PublishDiagnosticsParams, Uri};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Cloneable handle for sending messages to the client.
#[derive(Debug, Clone)]
pub struct Client {
    sender: Sender<lsp_server::Message>,
    next_id: Arc<AtomicU64>,
}

impl Client {
    /// Wrap the connection's sender.
    pub fn new(sender: Sender<lsp_server::Message>) -> Self {
        Self {
            sender,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Send a message to the client.
    pub fn send(&self, msg: lsp_server::Message) {
        if let Err(e) = self.sender.send(msg) {
            tracing::error!("Failed to send message: {}", e);
        }
    }

    /// Send a notification.
    pub fn notify(&self, method: &str, params: impl serde::Serialize) {
        let notif = lsp_server::Notification::new(method.to_string(), params);
        self.send(lsp_server::Message::Notification(notif));
    }

    /// Send a server-to-client request and return its id.
    pub fn request(&self, method: &str, params: impl serde::Serialize) -> lsp_server::RequestId {
        let id = lsp_server::RequestId::from(format!(
            "glsl-lsp/{}",
            self.next_id.fetch_add(1, Ordering::Relaxed)
        ));
        let request = lsp_server::Request::new(id.clone(), method.to_string(), params);
        self.send(lsp_server::Message::Request(request));
        id
    }

    /// Answer a client request.
    pub fn respond(&self, response: lsp_server::Response) {
        self.send(lsp_server::Message::Response(response));
    }
}

/// How diagnostics reach the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The server publishes diagnostics whenever they change.
    Push {
        /// The client accepts a document version on published diagnostics.
        version_support: bool,
    },
    /// The client asks for diagnostics.
    Pull {
        /// The client accepts `workspace/diagnostic/refresh`.
        refresh_support: bool,
    },
    /// The client supports neither mode.
    Disabled,
}

impl Delivery {
    /// Select the delivery mode from the client's capabilities.
    ///
    /// `raw` is the capabilities object as sent. The protocol names the
    /// refresh capability `workspace.diagnostics`, which the typed
    /// capabilities do not read, so it is looked up there first.
    pub fn from_capabilities(capabilities: &ClientCapabilities, raw: &serde_json::Value) -> Self {
        let text_document = capabilities.text_document.as_ref();
        if let Some(publish) = text_document.and_then(|td| td.publish_diagnostics.as_ref()) {
            return Self::Push {
                version_support: publish.version_support.unwrap_or(false),
            };
        }
        if text_document.and_then(|td| td.diagnostic.as_ref()).is_some() {
            let refresh_support = raw
                .pointer("/workspace/diagnostics/refreshSupport")
                .and_then(serde_json::Value::as_bool)
                .or_else(|| {
                    capabilities
                        .workspace
                        .as_ref()
                        .and_then(|ws| ws.diagnostic.as_ref())
                        .and_then(|d| d.refresh_support)
                })
                .unwrap_or(false);
            return Self::Pull { refresh_support };
        }
        Self::Disabled
    }

    /// Whether the server pushes diagnostics.
    pub fn is_push(&self) -> bool {
        matches!(self, Self::Push { .. })
    }

    /// Whether the client pulls diagnostics.
    pub fn is_pull(&self) -> bool {
        matches!(self, Self::Pull { .. })
    }

    /// Publish diagnostics for a document. Does nothing outside push mode.
    pub fn publish(&self, client: &Client, uri: Uri, diagnostics: Vec<Diagnostic>, sequence: i32) {
        if let Self::Push { version_support } = *self {
            let params = PublishDiagnosticsParams {
                uri,
                diagnostics,
                version: version_support.then_some(sequence),
            };
            client.notify(PublishDiagnostics::METHOD, params);
        }
    }

    /// Ask a pulling client to re-request diagnostics.
    pub fn refresh(&self, client: &Client) {
        if let Self::Pull {
            refresh_support: true,
        } = *self
        {
            client.request(WorkspaceDiagnosticRefresh::METHOD, ());
        }
    }
}
