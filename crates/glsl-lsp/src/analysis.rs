//! Validation orchestration.
//!
//! The [`Analyzer`] owns the document registry and reacts to document
//! lifecycle events, disk events and configuration changes by deciding
//! which documents to validate, retract or forget. Validation itself runs
//! in background tasks on immutable snapshots of the configuration; the
//! per-document versioned executor makes sure each `(content,
//! configuration)` version runs the validator at most once.

use crate::config::{Configuration, ConfigurationChange};
use crate::delivery::{Client, Delivery};
use crate::document::{Diagnostics, DocumentInfo, Documents};
use crate::error::{ServerError, SharedResult};
use crate::host::{Host, ValidatorInvocation};
use crate::telemetry::{Report, Telemetry};
use crate::uri::{path_to_uri, uri_to_path};
use crate::vfs::Vfs;
use glsl_validate::{DiagnosticVersion, parse_output, validator_args};
use lsp_types::request::{DocumentDiagnosticRequest, Request, WorkspaceDiagnosticRequest};
use lsp_types::{
    DocumentDiagnosticParams, DocumentDiagnosticReport, DocumentDiagnosticReportResult,
    FileChangeType, FileEvent, FullDocumentDiagnosticReport, RelatedFullDocumentDiagnosticReport,
    RelatedUnchangedDocumentDiagnosticReport, TextDocumentContentChangeEvent,
    UnchangedDocumentDiagnosticReport, Uri, WorkspaceDiagnosticParams, WorkspaceDiagnosticReport,
    WorkspaceDiagnosticReportResult, WorkspaceDocumentDiagnosticReport,
    WorkspaceFullDocumentDiagnosticReport, WorkspaceUnchangedDocumentDiagnosticReport,
};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;
use tokio::task::JoinSet;

/// Everything a validation task needs, captured when the task is started.
#[derive(Clone)]
struct ValidationContext {
    vfs: Arc<RwLock<Vfs>>,
    host: Arc<dyn Host>,
    client: Client,
    delivery: Delivery,
    telemetry: Arc<Telemetry>,
    configuration: Arc<Configuration>,
    configuration_version: Arc<AtomicU32>,
    validator: Option<PathBuf>,
}

impl ValidationContext {
    /// Whether `version` is still the document's latest version.
    fn is_current(&self, info: &DocumentInfo, version: DiagnosticVersion) -> bool {
        info.version(self.configuration_version.load(Ordering::SeqCst)) == version
    }
}

/// Diagnostics for `version`, from the cache or a fresh validator run.
async fn validate(
    ctx: &ValidationContext,
    info: &Arc<DocumentInfo>,
    version: DiagnosticVersion,
) -> SharedResult<Diagnostics> {
    info.diagnostics
        .get_diagnostics(version, || {
            let ctx = ctx.clone();
            let info = Arc::clone(info);
            async move { run_validation(ctx, info, version).await }
        })
        .await
}

async fn run_validation(
    ctx: ValidationContext,
    info: Arc<DocumentInfo>,
    version: DiagnosticVersion,
) -> SharedResult<Diagnostics> {
    let diagnostics = Arc::new(collect_diagnostics(&ctx, &info).await?);

    if ctx.delivery.is_push() {
        if ctx.is_current(&info, version) {
            match path_to_uri(info.path()) {
                Ok(uri) => ctx.delivery.publish(
                    &ctx.client,
                    uri,
                    diagnostics.to_vec(),
                    info.diagnostics.increase_sequence(),
                ),
                Err(e) => tracing::warn!("Cannot publish diagnostics: {}", e),
            }
        } else {
            tracing::debug!(
                "Not publishing superseded diagnostics for {} at {}",
                info.path().display(),
                version
            );
        }
    }
    Ok(diagnostics)
}

async fn collect_diagnostics(
    ctx: &ValidationContext,
    info: &DocumentInfo,
) -> SharedResult<Vec<lsp_types::Diagnostic>> {
    let configuration = &ctx.configuration;
    let Some(stage) = configuration
        .file_extensions
        .stage_for(&info.path().to_string_lossy())
    else {
        return Ok(Vec::new());
    };
    let Some(program) = ctx.validator.clone() else {
        return Ok(Vec::new());
    };

    let text = info.content.get_text(info.path(), &ctx.vfs, &ctx.host).await?;
    let invocation = ValidatorInvocation {
        program,
        args: validator_args(
            stage,
            &configuration.compiler.target_environment,
            &configuration.compiler.glsl_version,
            &configuration.compiler.defines,
        ),
        input: text.to_string(),
    };

    let started = Instant::now();
    let output = ctx.host.run_validator(invocation).await.map_err(Arc::new)?;
    ctx.telemetry.add_validation_measurement(started.elapsed());

    let diagnostics = parse_output(&output, &text, configuration.output_options());
    tracing::debug!(
        "Validated {} as {}: {} diagnostics in {:?}",
        info.path().display(),
        stage,
        diagnostics.len(),
        started.elapsed()
    );
    Ok(diagnostics)
}

fn full_report(version: DiagnosticVersion, diagnostics: &Diagnostics) -> FullDocumentDiagnosticReport {
    FullDocumentDiagnosticReport {
        result_id: Some(version.to_string()),
        items: diagnostics.to_vec(),
    }
}

/// Owner of all document state; reacts to protocol and disk events.
pub struct Analyzer {
    documents: Documents,
    vfs: Arc<RwLock<Vfs>>,
    host: Arc<dyn Host>,
    client: Client,
    delivery: Delivery,
    telemetry: Arc<Telemetry>,
    configuration: Arc<Configuration>,
    configuration_version: Arc<AtomicU32>,
    validator: Option<PathBuf>,
    ready: bool,
    tasks: JoinSet<()>,
}

impl Analyzer {
    /// Create an analyzer.
    ///
    /// When `wait_for_configuration` is set, nothing is validated until the
    /// first [`Analyzer::apply_configuration`] call.
    pub fn new(
        host: Arc<dyn Host>,
        client: Client,
        delivery: Delivery,
        configuration: Configuration,
        wait_for_configuration: bool,
    ) -> Self {
        let validator = host.resolve_validator(configuration.validator());
        Self {
            documents: Documents::new(),
            vfs: Arc::new(RwLock::new(Vfs::new())),
            host,
            telemetry: Arc::new(Telemetry::new(client.clone())),
            client,
            delivery,
            configuration: Arc::new(configuration),
            configuration_version: Arc::new(AtomicU32::new(0)),
            validator,
            ready: !wait_for_configuration,
            tasks: JoinSet::new(),
        }
    }

    /// Current configuration snapshot.
    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    /// Current global configuration version.
    pub fn configuration_version(&self) -> u32 {
        self.configuration_version.load(Ordering::SeqCst)
    }

    /// Selected delivery mode.
    pub fn delivery(&self) -> Delivery {
        self.delivery
    }

    /// Telemetry sink.
    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// The record for `path`, if the server knows the document.
    pub fn document(&self, path: &Path) -> Option<Arc<DocumentInfo>> {
        self.documents.get(path)
    }

    /// Number of known documents.
    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    fn context(&self) -> ValidationContext {
        ValidationContext {
            vfs: Arc::clone(&self.vfs),
            host: Arc::clone(&self.host),
            client: self.client.clone(),
            delivery: self.delivery,
            telemetry: Arc::clone(&self.telemetry),
            configuration: Arc::clone(&self.configuration),
            configuration_version: Arc::clone(&self.configuration_version),
            validator: self.validator.clone(),
        }
    }

    fn is_mapped(&self, path: &Path) -> bool {
        self.configuration
            .file_extensions
            .stage_for(&path.to_string_lossy())
            .is_some()
    }

    /// Whether diagnostics should exist for the document at all.
    fn in_scope(&self, info: &DocumentInfo) -> bool {
        !self.host.is_embedded()
            && self.configuration.diagnostics.enable
            && (self.configuration.diagnostics.workspace || info.content.is_opened())
    }

    // ------------------------------------------------------------------
    // Editor events
    // ------------------------------------------------------------------

    /// `textDocument/didOpen`.
    pub fn did_open(&mut self, uri: &Uri, text: &str, version: i32) -> Result<(), ServerError> {
        let path = uri_to_path(uri)?;
        tracing::info!("Document opened: {}", path.display());

        self.vfs.write().open(path.clone(), text, version);
        let info = self.documents.get_or_create(&path);
        info.content.set_opened(true);
        info.content.increase_version();
        self.analyze_document(&info);
        Ok(())
    }

    /// `textDocument/didChange`.
    pub fn did_change(
        &mut self,
        uri: &Uri,
        changes: Vec<TextDocumentContentChangeEvent>,
        version: i32,
    ) -> Result<(), ServerError> {
        let path = uri_to_path(uri)?;
        if !self.vfs.write().apply_changes(&path, changes, version) {
            return Err(ServerError::OpenDocumentMissing(path));
        }
        let info = self.documents.get_or_create(&path);
        info.content.increase_version();
        self.analyze_document(&info);
        Ok(())
    }

    /// `textDocument/didClose`.
    ///
    /// The document's text now comes from disk, so its version moves on.
    /// Outside workspace scope its diagnostics are retracted; in workspace
    /// scope it is validated again from disk.
    pub fn did_close(&mut self, uri: &Uri) -> Result<(), ServerError> {
        let path = uri_to_path(uri)?;
        tracing::info!("Document closed: {}", path.display());

        self.vfs.write().close(&path);
        let info = self.documents.get_or_create(&path);
        info.content.set_opened(false);
        info.content.increase_version();
        if self.configuration.diagnostics.workspace {
            self.analyze_document(&info);
        } else {
            self.retract(&info);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Disk events
    // ------------------------------------------------------------------

    /// `workspace/didChangeWatchedFiles`.
    pub fn did_change_watched_files(&mut self, changes: Vec<FileEvent>) {
        for change in changes {
            let path = match uri_to_path(&change.uri) {
                Ok(path) => path,
                Err(e) => {
                    tracing::debug!("Ignoring watched file event: {}", e);
                    continue;
                }
            };
            if !self.is_mapped(&path) {
                continue;
            }
            match change.typ {
                FileChangeType::CREATED => self.disk_add(&path),
                FileChangeType::CHANGED => self.disk_change(&path),
                FileChangeType::DELETED => self.disk_delete(&path),
                other => tracing::debug!("Unknown file change type {:?}", other),
            }
        }
    }

    /// A document appeared on disk.
    pub fn disk_add(&mut self, path: &Path) {
        let info = self.documents.get_or_create(path);
        if !info.content.is_opened() {
            self.analyze_document(&info);
        }
    }

    /// A document changed on disk.
    pub fn disk_change(&mut self, path: &Path) {
        let info = self.documents.get_or_create(path);
        if !info.content.is_opened() {
            info.content.increase_version();
            self.analyze_document(&info);
        }
    }

    /// A document was deleted from disk.
    pub fn disk_delete(&mut self, path: &Path) {
        let Some(info) = self.documents.get(path) else {
            return;
        };
        if info.content.is_opened() {
            return;
        }
        // Anything still running for the old content must not publish.
        info.content.increase_version();
        if self.configuration.diagnostics.workspace {
            self.retract(&info);
        }
        self.documents.remove(path);
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    /// Replace the configuration and revalidate what it affects.
    pub fn apply_configuration(&mut self, configuration: Configuration) {
        let change = ConfigurationChange::between(&self.configuration, &configuration);
        let first = !self.ready;
        if first || self.configuration.validator() != configuration.validator() {
            self.validator = self.host.resolve_validator(configuration.validator());
        }
        self.configuration = Arc::new(configuration);
        self.ready = true;
        tracing::info!("Configuration applied: {:?}", change);

        if change.bumps_version() {
            self.configuration_version.fetch_add(1, Ordering::SeqCst);
        }
        if change.extensions_changed {
            self.remove_invalid_documents();
        }

        if first {
            self.analyze_all_documents();
            return;
        }
        if change.enable_changed && !self.configuration.diagnostics.enable {
            self.retract_all();
            self.delivery.refresh(&self.client);
            return;
        }
        if change.workspace_changed && !self.configuration.diagnostics.workspace {
            for info in self.documents.all() {
                if !info.content.is_opened() {
                    info.content.increase_version();
                    self.retract(&info);
                }
            }
        }
        if change.bumps_version() || change.workspace_changed {
            self.analyze_all_documents();
            self.delivery.refresh(&self.client);
        }
    }

    /// Forget unopened documents that no longer map to a shader stage.
    fn remove_invalid_documents(&mut self) {
        for info in self.documents.all() {
            if !info.content.is_opened() && !self.is_mapped(info.path()) {
                info.content.increase_version();
                self.retract(&info);
                self.documents.remove(info.path());
            }
        }
    }

    // ------------------------------------------------------------------
    // Analysis
    // ------------------------------------------------------------------

    /// Validate a document in the background if it is in scope.
    ///
    /// The task waits for the configured delay first and gives up if the
    /// document changed in the meantime.
    pub fn analyze_document(&mut self, info: &Arc<DocumentInfo>) {
        if !self.ready || self.delivery == Delivery::Disabled || !self.in_scope(info) {
            return;
        }
        let ctx = self.context();
        let info = Arc::clone(info);
        let version = info.version(self.configuration_version());
        let delay = self.configuration.delay();

        self.tasks.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
                if !ctx.is_current(&info, version) {
                    tracing::trace!("Skipping superseded validation of {}", info.path().display());
                    return;
                }
            }
            if let Err(e) = validate(&ctx, &info, version).await {
                ctx.telemetry.report_error("validation", &*e);
            }
        });
    }

    /// Validate every known document that is in scope.
    pub fn analyze_all_documents(&mut self) {
        for info in self.documents.all() {
            self.analyze_document(&info);
        }
    }

    /// Withdraw the diagnostics shown for a document.
    fn retract(&self, info: &DocumentInfo) {
        info.diagnostics.set_display_version(None);
        if self.delivery.is_push() {
            match path_to_uri(info.path()) {
                Ok(uri) => self.delivery.publish(
                    &self.client,
                    uri,
                    Vec::new(),
                    info.diagnostics.increase_sequence(),
                ),
                Err(e) => tracing::warn!("Cannot retract diagnostics: {}", e),
            }
        }
    }

    fn retract_all(&self) {
        for info in self.documents.all() {
            self.retract(&info);
        }
    }

    // ------------------------------------------------------------------
    // Pull requests
    // ------------------------------------------------------------------

    /// `textDocument/diagnostic`: answered from a background task.
    pub fn pull_document_diagnostics(
        &mut self,
        id: lsp_server::RequestId,
        params: DocumentDiagnosticParams,
    ) -> Result<(), ServerError> {
        let path = uri_to_path(&params.text_document.uri)?;
        let info = self.documents.get_or_create(&path);

        if !self.in_scope(&info) {
            let report = DocumentDiagnosticReportResult::Report(DocumentDiagnosticReport::Full(
                RelatedFullDocumentDiagnosticReport {
                    related_documents: None,
                    full_document_diagnostic_report: FullDocumentDiagnosticReport {
                        result_id: None,
                        items: Vec::new(),
                    },
                },
            ));
            self.client
                .respond(lsp_server::Response::new_ok(id, report));
            return Ok(());
        }

        let version = info.version(self.configuration_version());
        let result_id = version.to_string();
        if info.diagnostics.display_version() == Some(version)
            && params.previous_result_id.as_deref() == Some(result_id.as_str())
        {
            let report = DocumentDiagnosticReportResult::Report(
                DocumentDiagnosticReport::Unchanged(RelatedUnchangedDocumentDiagnosticReport {
                    related_documents: None,
                    unchanged_document_diagnostic_report: UnchangedDocumentDiagnosticReport {
                        result_id,
                    },
                }),
            );
            self.client
                .respond(lsp_server::Response::new_ok(id, report));
            return Ok(());
        }

        let ctx = self.context();
        self.tasks.spawn(async move {
            let response = match validate(&ctx, &info, version).await {
                Ok(diagnostics) => {
                    info.diagnostics.set_display_version(Some(version));
                    let report = DocumentDiagnosticReportResult::Report(
                        DocumentDiagnosticReport::Full(RelatedFullDocumentDiagnosticReport {
                            related_documents: None,
                            full_document_diagnostic_report: full_report(version, &diagnostics),
                        }),
                    );
                    lsp_server::Response::new_ok(id, report)
                }
                Err(e) => {
                    ctx.telemetry
                        .report_error(DocumentDiagnosticRequest::METHOD, &*e);
                    lsp_server::Response::new_err(
                        id,
                        lsp_server::ErrorCode::InternalError as i32,
                        e.to_string(),
                    )
                }
            };
            ctx.client.respond(response);
        });
        Ok(())
    }

    /// `workspace/diagnostic`: reports for every unopened in-scope document.
    ///
    /// Open documents are left to `textDocument/diagnostic`.
    pub fn pull_workspace_diagnostics(
        &mut self,
        id: lsp_server::RequestId,
        params: WorkspaceDiagnosticParams,
    ) {
        let targets: Vec<_> = self
            .documents
            .all()
            .into_iter()
            .filter(|info| !info.content.is_opened() && self.in_scope(info))
            .filter_map(|info| {
                let uri = path_to_uri(info.path()).ok()?;
                let version = info.version(self.configuration_version());
                let previous = params
                    .previous_result_ids
                    .iter()
                    .find(|p| p.uri == uri)
                    .map(|p| p.value.clone());
                Some((info, uri, version, previous))
            })
            .collect();

        let ctx = self.context();
        self.tasks.spawn(async move {
            let reports = targets.into_iter().map(|(info, uri, version, previous)| {
                let ctx = ctx.clone();
                async move {
                    let result_id = version.to_string();
                    if info.diagnostics.display_version() == Some(version)
                        && previous.as_deref() == Some(result_id.as_str())
                    {
                        return Some(WorkspaceDocumentDiagnosticReport::Unchanged(
                            WorkspaceUnchangedDocumentDiagnosticReport {
                                uri,
                                version: None,
                                unchanged_document_diagnostic_report:
                                    UnchangedDocumentDiagnosticReport { result_id },
                            },
                        ));
                    }
                    match validate(&ctx, &info, version).await {
                        Ok(diagnostics) => {
                            info.diagnostics.set_display_version(Some(version));
                            Some(WorkspaceDocumentDiagnosticReport::Full(
                                WorkspaceFullDocumentDiagnosticReport {
                                    uri,
                                    version: None,
                                    full_document_diagnostic_report: full_report(
                                        version,
                                        &diagnostics,
                                    ),
                                },
                            ))
                        }
                        Err(e) => {
                            ctx.telemetry
                                .report_error(WorkspaceDiagnosticRequest::METHOD, &*e);
                            None
                        }
                    }
                }
            });
            let items = futures::future::join_all(reports)
                .await
                .into_iter()
                .flatten()
                .collect();
            let report =
                WorkspaceDiagnosticReportResult::Report(WorkspaceDiagnosticReport { items });
            ctx.client.respond(lsp_server::Response::new_ok(id, report));
        });
    }

    // ------------------------------------------------------------------
    // Tasks
    // ------------------------------------------------------------------

    /// Whether background tasks are running.
    pub fn has_tasks(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Wait for the next background task to finish.
    pub async fn join_next_task(&mut self) {
        if let Some(Err(e)) = self.tasks.join_next().await {
            tracing::error!("Background task failed: {}", e);
        }
    }

    /// Wait for every background task to finish.
    pub async fn settle(&mut self) {
        while self.has_tasks() {
            self.join_next_task().await;
        }
    }

    /// Usage report for telemetry.
    pub fn report(&self) -> Report {
        let lengths: Vec<usize> = self
            .documents
            .all()
            .iter()
            .filter_map(|info| info.content.loaded_length(info.path(), &self.vfs))
            .collect();
        let average_document_length = if lengths.is_empty() {
            0.0
        } else {
            lengths.iter().sum::<usize>() as f64 / lengths.len() as f64
        };
        Report {
            document_count: self.documents.len(),
            average_document_length,
            diagnostics_enabled: self.configuration.diagnostics.enable,
            workspace_diagnostics: self.configuration.diagnostics.workspace,
            mark_the_whole_line: self.configuration.diagnostics.mark_the_whole_line,
            configuration_target_environment: self.configuration.compiler.target_environment.clone(),
            configuration_glsl_version: self.configuration.compiler.glsl_version.clone(),
            validator_available: self.validator.is_some(),
            validation_count: self.telemetry.validation_count(),
            average_validation_millis: self.telemetry.average_validation_time().as_secs_f64()
                * 1000.0,
        }
    }
}
