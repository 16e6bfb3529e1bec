//! Versioned diagnostic engine for the GLSL language server.
//!
//! This crate holds everything about validation that does not need a
//! process or a filesystem, so it can run inside restricted hosts too:
//!
//! - [`VersionedExecutor`]: coalescing memoizer keyed by a version token
//! - [`DiagnosticVersion`]: the `(content, configuration)` token
//! - [`stage`]: file-extension to shader-stage mapping and validator arguments
//! - [`output`]: validator output to positioned LSP diagnostics
//!
//! # Example
//!
//! ```
//! use glsl_validate::output::{OutputOptions, parse_output};
//!
//! let source = "void main() {\n  foo();\n}\n";
//! let output = "ERROR: 0:2: 'foo' : no matching overloaded function found";
//! let diagnostics = parse_output(output, source, OutputOptions::default());
//! assert_eq!(diagnostics.len(), 1);
//! assert_eq!(diagnostics[0].range.start.character, 2);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod executor;
pub mod output;
pub mod stage;
mod version;

pub use executor::VersionedExecutor;
pub use output::{OutputOptions, parse_output};
pub use stage::{ShaderStage, StageExtensions, validator_args};
pub use version::{DiagnosticVersion, ParseVersionError};

/// Executor for diagnostics, using component-wise coverage of the token.
pub fn diagnostics_executor<T, E>() -> VersionedExecutor<T, DiagnosticVersion, E> {
    VersionedExecutor::with_coverage(DiagnosticVersion::covers)
}
