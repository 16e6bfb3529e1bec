//! Main event loop for the LSP server.
//!
//! Notifications are handled synchronously on the loop, in arrival order,
//! so document and configuration versions always reflect the protocol
//! order. Validation and pull requests run as tasks on the same
//! single-threaded runtime and are reaped by the loop.

use crate::analysis::Analyzer;
use crate::config::{CONFIGURATION_SECTION, Configuration};
use crate::delivery::{Client, Delivery};
use crate::error::ServerError;
use crossbeam_channel::Receiver;
use lsp_types::notification::{
    DidChangeConfiguration, DidChangeTextDocument, DidChangeWatchedFiles, DidCloseTextDocument,
    DidOpenTextDocument, Exit, Notification,
};
use lsp_types::request::{
    DocumentDiagnosticRequest, RegisterCapability, Request, Shutdown, UnregisterCapability,
    WorkspaceConfiguration, WorkspaceDiagnosticRequest,
};
use lsp_types::{
    ClientCapabilities, ConfigurationItem, ConfigurationParams, DidChangeWatchedFilesRegistrationOptions,
    FileSystemWatcher, GlobPattern, Registration, RegistrationParams, Unregistration,
    UnregistrationParams, WatchKind,
};
use std::collections::HashSet;
use std::ops::ControlFlow;

const FILE_WATCHER_REGISTRATION: &str = "glsl-lsp/file-watchers";
const CONFIGURATION_REGISTRATION: &str = "glsl-lsp/configuration";

/// What the client can do, as far as the main loop cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientSupport {
    /// How diagnostics are delivered.
    pub delivery: Delivery,
    /// The client answers `workspace/configuration`.
    pub configuration_requests: bool,
    /// File watchers can be registered dynamically.
    pub dynamic_watchers: bool,
    /// `workspace/didChangeConfiguration` can be registered dynamically.
    pub dynamic_configuration: bool,
}

impl ClientSupport {
    /// Read the relevant client capabilities from the `capabilities` object
    /// of the `initialize` request.
    pub fn from_capabilities(raw: &serde_json::Value) -> Self {
        let capabilities: ClientCapabilities = serde_json::from_value(raw.clone())
            .unwrap_or_else(|e| {
                tracing::warn!("Ignoring unreadable client capabilities: {}", e);
                ClientCapabilities::default()
            });
        let workspace = capabilities.workspace.as_ref();
        Self {
            delivery: Delivery::from_capabilities(&capabilities, raw),
            configuration_requests: workspace.and_then(|ws| ws.configuration).unwrap_or(false),
            dynamic_watchers: workspace
                .and_then(|ws| ws.did_change_watched_files.as_ref())
                .and_then(|w| w.dynamic_registration)
                .unwrap_or(false),
            dynamic_configuration: workspace
                .and_then(|ws| ws.did_change_configuration.as_ref())
                .and_then(|c| c.dynamic_registration)
                .unwrap_or(false),
        }
    }
}

/// State managed by the main loop.
pub struct MainLoopState {
    analyzer: Analyzer,
    client: Client,
    support: ClientSupport,
    /// Outstanding `workspace/configuration` requests.
    pending_configuration: HashSet<lsp_server::RequestId>,
    watchers_registered: bool,
    shutdown_requested: bool,
}

impl MainLoopState {
    /// Create the loop state around an analyzer.
    pub fn new(analyzer: Analyzer, client: Client, support: ClientSupport) -> Self {
        Self {
            analyzer,
            client,
            support,
            pending_configuration: HashSet::new(),
            watchers_registered: false,
            shutdown_requested: false,
        }
    }

    /// The analyzer driven by this loop.
    pub fn analyzer(&self) -> &Analyzer {
        &self.analyzer
    }

    /// Whether `shutdown` was received.
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested
    }

    /// Handle one message from the client. Breaks on `exit`.
    pub fn handle_message(&mut self, msg: lsp_server::Message) -> ControlFlow<()> {
        match msg {
            lsp_server::Message::Request(req) => self.handle_request(req),
            lsp_server::Message::Notification(notif) => return self.handle_notification(notif),
            lsp_server::Message::Response(resp) => self.handle_response(resp),
        }
        ControlFlow::Continue(())
    }

    /// Handle an LSP request (expects response).
    fn handle_request(&mut self, req: lsp_server::Request) {
        let id = req.id.clone();

        if self.shutdown_requested {
            self.client.respond(lsp_server::Response::new_err(
                id,
                lsp_server::ErrorCode::InvalidRequest as i32,
                "server is shutting down".to_string(),
            ));
            return;
        }

        // `Ok(None)`: the response is sent by a background task.
        let result: Result<Option<serde_json::Value>, ServerError> = match req.method.as_str() {
            Shutdown::METHOD => {
                tracing::info!("Shutdown requested");
                self.shutdown_requested = true;
                self.analyzer
                    .telemetry()
                    .send_report(&self.analyzer.report());
                Ok(Some(serde_json::Value::Null))
            }
            DocumentDiagnosticRequest::METHOD => serde_json::from_value(req.params)
                .map_err(ServerError::from)
                .and_then(|params| self.analyzer.pull_document_diagnostics(id.clone(), params))
                .map(|()| None),
            WorkspaceDiagnosticRequest::METHOD => serde_json::from_value(req.params)
                .map_err(ServerError::from)
                .map(|params| {
                    self.analyzer.pull_workspace_diagnostics(id.clone(), params);
                    None
                }),
            _ => {
                tracing::warn!("Unhandled request: {}", req.method);
                self.client.respond(lsp_server::Response::new_err(
                    id,
                    lsp_server::ErrorCode::MethodNotFound as i32,
                    format!("Unhandled request: {}", req.method),
                ));
                return;
            }
        };

        match result {
            Ok(Some(value)) => self.client.respond(lsp_server::Response::new_ok(id, value)),
            Ok(None) => {}
            Err(e) => {
                self.analyzer.telemetry().report_error(&req.method, &e);
                self.client.respond(lsp_server::Response::new_err(
                    id,
                    lsp_server::ErrorCode::InternalError as i32,
                    e.to_string(),
                ));
            }
        }
    }

    /// Handle an LSP notification (no response expected).
    fn handle_notification(&mut self, notif: lsp_server::Notification) -> ControlFlow<()> {
        let method = notif.method.clone();
        let result = match notif.method.as_str() {
            DidOpenTextDocument::METHOD => {
                serde_json::from_value::<lsp_types::DidOpenTextDocumentParams>(notif.params)
                    .map_err(ServerError::from)
                    .and_then(|params| {
                        let document = params.text_document;
                        self.analyzer
                            .did_open(&document.uri, &document.text, document.version)
                    })
            }
            DidChangeTextDocument::METHOD => {
                serde_json::from_value::<lsp_types::DidChangeTextDocumentParams>(notif.params)
                    .map_err(ServerError::from)
                    .and_then(|params| {
                        self.analyzer.did_change(
                            &params.text_document.uri,
                            params.content_changes,
                            params.text_document.version,
                        )
                    })
            }
            DidCloseTextDocument::METHOD => {
                serde_json::from_value::<lsp_types::DidCloseTextDocumentParams>(notif.params)
                    .map_err(ServerError::from)
                    .and_then(|params| self.analyzer.did_close(&params.text_document.uri))
            }
            DidChangeWatchedFiles::METHOD => {
                serde_json::from_value::<lsp_types::DidChangeWatchedFilesParams>(notif.params)
                    .map_err(ServerError::from)
                    .map(|params| {
                        tracing::debug!("Watched files changed: {} files", params.changes.len());
                        self.analyzer.did_change_watched_files(params.changes);
                    })
            }
            DidChangeConfiguration::METHOD => {
                serde_json::from_value::<lsp_types::DidChangeConfigurationParams>(notif.params)
                    .map_err(ServerError::from)
                    .and_then(|params| self.on_did_change_configuration(params))
            }
            Exit::METHOD => {
                tracing::info!("Exit notification received");
                return ControlFlow::Break(());
            }
            _ => {
                tracing::debug!("Unhandled notification: {}", notif.method);
                Ok(())
            }
        };

        if let Err(e) = result {
            self.analyzer.telemetry().report_error(&method, &e);
        }
        ControlFlow::Continue(())
    }

    /// Handle a response to a server-initiated request.
    fn handle_response(&mut self, resp: lsp_server::Response) {
        if !self.pending_configuration.remove(&resp.id) {
            if let Some(error) = resp.error {
                tracing::warn!("Client rejected request {}: {}", resp.id, error.message);
            }
            return;
        }

        let configuration = match (resp.result, resp.error) {
            (_, Some(error)) => {
                tracing::warn!("Configuration request failed: {}", error.message);
                Ok(Configuration::default())
            }
            (Some(result), None) => serde_json::from_value::<Vec<serde_json::Value>>(result)
                .map(|items| items.into_iter().next().unwrap_or_default())
                .and_then(Configuration::from_value),
            (None, None) => Ok(Configuration::default()),
        };

        match configuration {
            Ok(configuration) => self.set_configuration(configuration),
            Err(e) => {
                let error = ServerError::from(e);
                self.analyzer
                    .telemetry()
                    .report_error(WorkspaceConfiguration::METHOD, &error);
                self.set_configuration(Configuration::default());
            }
        }
    }

    /// Register watchers and fetch the configuration once the client is
    /// initialized.
    pub fn on_initialized(&mut self) {
        tracing::info!("Client initialized");
        self.register_file_watchers();
        if self.support.dynamic_configuration {
            let registration = Registration {
                id: CONFIGURATION_REGISTRATION.to_string(),
                method: DidChangeConfiguration::METHOD.to_string(),
                register_options: None,
            };
            self.client.request(
                RegisterCapability::METHOD,
                RegistrationParams {
                    registrations: vec![registration],
                },
            );
        }
        if self.support.configuration_requests {
            self.request_configuration();
        }
    }

    fn on_did_change_configuration(
        &mut self,
        params: lsp_types::DidChangeConfigurationParams,
    ) -> Result<(), ServerError> {
        if self.support.configuration_requests {
            self.request_configuration();
            return Ok(());
        }
        let configuration = Configuration::from_settings(&params.settings)?;
        self.set_configuration(configuration);
        Ok(())
    }

    fn request_configuration(&mut self) {
        let params = ConfigurationParams {
            items: vec![ConfigurationItem {
                scope_uri: None,
                section: Some(CONFIGURATION_SECTION.to_string()),
            }],
        };
        let id = self.client.request(WorkspaceConfiguration::METHOD, params);
        self.pending_configuration.insert(id);
    }

    fn set_configuration(&mut self, configuration: Configuration) {
        let extensions_changed =
            self.analyzer.configuration().file_extensions != configuration.file_extensions;
        self.analyzer.apply_configuration(configuration);
        if extensions_changed {
            self.register_file_watchers();
        }
    }

    /// Watch every configured shader extension, replacing earlier watchers.
    fn register_file_watchers(&mut self) {
        if !self.support.dynamic_watchers {
            return;
        }
        if self.watchers_registered {
            let unregistration = Unregistration {
                id: FILE_WATCHER_REGISTRATION.to_string(),
                method: DidChangeWatchedFiles::METHOD.to_string(),
            };
            self.client.request(
                UnregisterCapability::METHOD,
                UnregistrationParams {
                    unregisterations: vec![unregistration],
                },
            );
        }

        let extensions = self.analyzer.configuration().file_extensions.all();
        let watchers = extensions
            .iter()
            .map(|extension| FileSystemWatcher {
                glob_pattern: GlobPattern::String(format!("**/*{extension}")),
                kind: Some(WatchKind::all()),
            })
            .collect();
        let registration = Registration {
            id: FILE_WATCHER_REGISTRATION.to_string(),
            method: DidChangeWatchedFiles::METHOD.to_string(),
            register_options: Some(
                serde_json::to_value(DidChangeWatchedFilesRegistrationOptions { watchers })
                    .unwrap_or_default(),
            ),
        };
        self.client.request(
            RegisterCapability::METHOD,
            RegistrationParams {
                registrations: vec![registration],
            },
        );
        self.watchers_registered = true;
        tracing::info!("Registered file watchers for {}", extensions.join(", "));
    }

    /// Wait for outstanding background work.
    pub async fn settle(&mut self) {
        self.analyzer.settle().await;
    }
}

/// Run the main loop until `exit` or until the client disconnects.
///
/// Returns whether `shutdown` was requested before the loop ended.
pub async fn run_main_loop(receiver: Receiver<lsp_server::Message>, mut state: MainLoopState) -> bool {
    let (sender, mut messages) = tokio::sync::mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for msg in receiver {
            if sender.send(msg).is_err() {
                break;
            }
        }
    });

    tracing::info!("Main loop started");
    // The handshake already consumed `initialized`.
    state.on_initialized();

    loop {
        tokio::select! {
            msg = messages.recv() => {
                let Some(msg) = msg else { break };
                if state.handle_message(msg).is_break() {
                    break;
                }
            }
            () = state.analyzer.join_next_task(), if state.analyzer.has_tasks() => {}
        }
    }

    tracing::info!("Main loop ended");
    state.shutdown_requested
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_support() {
        let support = ClientSupport::from_capabilities(&json!({
            "workspace": {
                "configuration": true,
                "didChangeWatchedFiles": { "dynamicRegistration": true },
                "didChangeConfiguration": { "dynamicRegistration": false }
            },
            "textDocument": { "publishDiagnostics": {} }
        }));
        assert!(support.configuration_requests);
        assert!(support.dynamic_watchers);
        assert!(!support.dynamic_configuration);
        assert!(support.delivery.is_push());
    }

    #[test]
    fn test_client_support_defaults() {
        let support = ClientSupport::from_capabilities(&json!({}));
        assert_eq!(
            support,
            ClientSupport {
                delivery: Delivery::Disabled,
                configuration_requests: false,
                dynamic_watchers: false,
                dynamic_configuration: false,
            }
        );
    }

    #[test]
    fn test_client_support_reads_refresh_capability() {
        let support = ClientSupport::from_capabilities(&json!({
            "workspace": { "diagnostics": { "refreshSupport": true } },
            "textDocument": { "diagnostic": { "dynamicRegistration": false } }
        }));
        assert_eq!(
            support.delivery,
            Delivery::Pull {
                refresh_support: true
            }
        );
    }
}
