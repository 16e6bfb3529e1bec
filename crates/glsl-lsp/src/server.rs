//! Main LSP server implementation.

use crate::analysis::Analyzer;
use crate::config::Configuration;
use crate::delivery::Client;
use crate::host::{DesktopHost, EmbeddedHost, Host};
use crate::main_loop::{ClientSupport, MainLoopState, run_main_loop};
use lsp_server::Connection;
use lsp_types::{
    DiagnosticOptions, DiagnosticServerCapabilities, InitializeParams, InitializeResult,
    ServerCapabilities, ServerInfo, TextDocumentSyncCapability, TextDocumentSyncKind,
};
use std::sync::Arc;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Capabilities advertised for the chosen delivery mode.
pub fn server_capabilities(support: &ClientSupport) -> ServerCapabilities {
    let diagnostic_provider = support.delivery.is_pull().then(|| {
        DiagnosticServerCapabilities::Options(DiagnosticOptions {
            identifier: Some("glslang".to_string()),
            inter_file_dependencies: false,
            workspace_diagnostics: true,
            work_done_progress_options: Default::default(),
        })
    });
    ServerCapabilities {
        text_document_sync: Some(TextDocumentSyncCapability::Kind(
            TextDocumentSyncKind::INCREMENTAL,
        )),
        diagnostic_provider,
        ..Default::default()
    }
}

/// Run the handshake and serve `connection` until the client exits.
pub fn run_server(connection: Connection, host: Arc<dyn Host>) -> Result<(), BoxError> {
    let (id, params) = connection.initialize_start()?;
    let raw_capabilities = params.get("capabilities").cloned().unwrap_or_default();
    let init_params: InitializeParams = serde_json::from_value(params)?;
    let support = ClientSupport::from_capabilities(&raw_capabilities);
    tracing::info!("Client support: {:?}", support);

    if let Some(folders) = &init_params.workspace_folders {
        if let Some(folder) = folders.first() {
            tracing::info!("Workspace root: {}", folder.uri.as_str());
        }
    }

    let init_result = InitializeResult {
        capabilities: server_capabilities(&support),
        server_info: Some(ServerInfo {
            name: "glsl-lsp".to_string(),
            version: Some(crate::VERSION.to_string()),
        }),
    };
    connection.initialize_finish(id, serde_json::to_value(init_result)?)?;
    tracing::info!("LSP initialized successfully");

    let configuration = match init_params.initialization_options {
        Some(options) => Configuration::from_value(options).unwrap_or_else(|e| {
            tracing::warn!("Ignoring invalid initialization options: {}", e);
            Configuration::default()
        }),
        None => Configuration::default(),
    };

    let Connection { sender, receiver } = connection;
    let client = Client::new(sender);
    let analyzer = Analyzer::new(
        host,
        client.clone(),
        support.delivery,
        configuration,
        support.configuration_requests,
    );
    let state = MainLoopState::new(analyzer, client, support);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let clean = runtime.block_on(run_main_loop(receiver, state));

    if clean {
        tracing::info!("Server shutdown complete");
        Ok(())
    } else {
        Err("connection closed without a shutdown request".into())
    }
}

/// Start the LSP server using stdio transport.
pub fn start_stdio(embedded: bool) -> Result<(), BoxError> {
    tracing::info!(
        "Starting GLSL Language Server v{} on stdio{}",
        crate::VERSION,
        if embedded { " (embedded)" } else { "" }
    );

    let (connection, io_threads) = Connection::stdio();
    let host: Arc<dyn Host> = if embedded {
        Arc::new(EmbeddedHost)
    } else {
        Arc::new(DesktopHost)
    };
    run_server(connection, host)?;

    io_threads.join()?;
    Ok(())
}
