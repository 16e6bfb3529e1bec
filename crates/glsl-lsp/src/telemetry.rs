//! Telemetry events sent to the client.
//!
//! Errors are reported with every filesystem path replaced by `<path>`.

use crate::delivery::Client;
use lsp_types::notification::{Notification, TelemetryEvent};
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

static PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:[a-zA-Z]:)?(?:[\\/][^\\/:*?"<>|\s]+)+[\\/]?"#).expect("path pattern is valid")
});

/// Replace absolute paths in `text` with `<path>`.
pub fn redact_paths(text: &str) -> String {
    PATH.replace_all(text, "<path>").into_owned()
}

/// Error event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename = "error", rename_all = "camelCase")]
pub struct ErrorEvent {
    /// Where the error surfaced.
    pub name: String,
    /// The error and its sources, redacted.
    pub message: String,
}

/// Usage report payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename = "report", rename_all = "camelCase")]
pub struct Report {
    /// Documents known to the server.
    pub document_count: usize,
    /// Mean length in characters of documents whose text has been loaded.
    pub average_document_length: f64,
    /// Whether validation is enabled.
    pub diagnostics_enabled: bool,
    /// Whether unopened documents are validated.
    pub workspace_diagnostics: bool,
    /// Whether whole lines are marked.
    pub mark_the_whole_line: bool,
    /// Configured `--target-env` value.
    pub configuration_target_environment: String,
    /// Configured `--glsl-version` value.
    pub configuration_glsl_version: String,
    /// Whether the validator could be resolved.
    pub validator_available: bool,
    /// Validator runs so far.
    pub validation_count: u64,
    /// Mean validator run time in milliseconds.
    pub average_validation_millis: f64,
}

/// Error reporting and validation measurements.
#[derive(Debug)]
pub struct Telemetry {
    client: Client,
    validations: AtomicU64,
    validation_micros: AtomicU64,
}

impl Telemetry {
    /// Create a telemetry sink sending through `client`.
    pub fn new(client: Client) -> Self {
        Self {
            client,
            validations: AtomicU64::new(0),
            validation_micros: AtomicU64::new(0),
        }
    }

    /// Record one validator run.
    pub fn add_validation_measurement(&self, elapsed: Duration) {
        self.validations.fetch_add(1, Ordering::Relaxed);
        self.validation_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    /// Number of validator runs recorded.
    pub fn validation_count(&self) -> u64 {
        self.validations.load(Ordering::Relaxed)
    }

    /// Mean validator run time, zero before the first run.
    pub fn average_validation_time(&self) -> Duration {
        let count = self.validation_count();
        if count == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(self.validation_micros.load(Ordering::Relaxed) / count)
    }

    /// Report an error that escaped a handler.
    pub fn report_error(&self, name: &str, error: &(dyn std::error::Error + 'static)) {
        let mut message = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        tracing::error!("{}: {}", name, message);
        self.client.notify(
            TelemetryEvent::METHOD,
            ErrorEvent {
                name: name.to_string(),
                message: redact_paths(&message),
            },
        );
    }

    /// Send a usage report.
    pub fn send_report(&self, report: &Report) {
        self.client.notify(TelemetryEvent::METHOD, report);
    }
}
