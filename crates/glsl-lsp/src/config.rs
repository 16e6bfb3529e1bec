//! Server configuration.
//!
//! Settings live under the `glslLanguageServer` section of the client's
//! configuration. Every field has a default so partial payloads are fine.

use glsl_validate::{OutputOptions, StageExtensions};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Configuration section requested from the client.
pub const CONFIGURATION_SECTION: &str = "glslLanguageServer";

/// Default validator executable, looked up on `PATH`.
pub const DEFAULT_VALIDATOR: &str = "glslangValidator";

/// Effective settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Configuration {
    /// Diagnostic settings.
    pub diagnostics: DiagnosticsConfiguration,
    /// Validator invocation settings.
    pub compiler: CompilerConfiguration,
    /// Extension to shader stage mapping.
    pub file_extensions: StageExtensions,
}

/// Settings under `diagnostics`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiagnosticsConfiguration {
    /// Run the validator at all.
    pub enable: bool,
    /// Mark whole lines instead of the reported snippet.
    pub mark_the_whole_line: bool,
    /// Validate unopened documents too.
    pub workspace: bool,
    /// Debounce delay before validating an edited document, in milliseconds.
    pub delay: u64,
}

impl Default for DiagnosticsConfiguration {
    fn default() -> Self {
        Self {
            enable: true,
            mark_the_whole_line: false,
            workspace: false,
            delay: 300,
        }
    }
}

/// Settings under `compiler`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompilerConfiguration {
    /// Value for `--target-env`; empty omits the flag.
    pub target_environment: String,
    /// Value for `--glsl-version`; empty omits the flag.
    pub glsl_version: String,
    /// Validator executable; defaults to [`DEFAULT_VALIDATOR`].
    pub path: Option<String>,
    /// Preprocessor macros passed as `-D` flags.
    pub defines: BTreeMap<String, String>,
}

impl Configuration {
    /// Parse a configuration payload, falling back to defaults for `null`.
    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value)
    }

    /// Parse the configuration out of a `didChangeConfiguration` settings
    /// payload, which nests it under [`CONFIGURATION_SECTION`].
    pub fn from_settings(settings: &serde_json::Value) -> Result<Self, serde_json::Error> {
        Self::from_value(
            settings
                .get(CONFIGURATION_SECTION)
                .cloned()
                .unwrap_or(serde_json::Value::Null),
        )
    }

    /// Options for turning validator output into diagnostics.
    pub fn output_options(&self) -> OutputOptions {
        OutputOptions {
            mark_the_whole_line: self.diagnostics.mark_the_whole_line,
        }
    }

    /// Debounce delay for edited documents.
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.diagnostics.delay)
    }

    /// Validator executable name or path.
    pub fn validator(&self) -> &str {
        self.compiler
            .path
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_VALIDATOR)
    }
}

/// What changed between two configuration snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigurationChange {
    /// The enable flag flipped.
    pub enable_changed: bool,
    /// Anything that changes the validator's command or the parsed ranges.
    pub validation_changed: bool,
    /// The extension-to-stage mapping changed.
    pub extensions_changed: bool,
    /// The workspace scope flag flipped.
    pub workspace_changed: bool,
}

impl ConfigurationChange {
    /// Compare two snapshots.
    pub fn between(old: &Configuration, new: &Configuration) -> Self {
        let enable_changed = old.diagnostics.enable != new.diagnostics.enable;
        let extensions_changed = old.file_extensions != new.file_extensions;
        let validation_changed = enable_changed
            || extensions_changed
            || old.diagnostics.mark_the_whole_line != new.diagnostics.mark_the_whole_line
            || old.compiler.target_environment != new.compiler.target_environment
            || old.compiler.glsl_version != new.compiler.glsl_version
            || old.compiler.defines != new.compiler.defines
            || old.validator() != new.validator();
        Self {
            enable_changed,
            validation_changed,
            extensions_changed,
            workspace_changed: old.diagnostics.workspace != new.diagnostics.workspace,
        }
    }

    /// Whether the configuration version must be bumped.
    pub fn bumps_version(&self) -> bool {
        self.validation_changed
    }
}
