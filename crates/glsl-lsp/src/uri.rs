//! Conversion between protocol URIs and filesystem paths.
//!
//! Documents are keyed by filesystem path so that `file:///a%20b.frag` and
//! `file:///a b.frag` style spellings of the same file share one record.

use crate::error::ServerError;
use lsp_types::Uri;
use std::path::{Path, PathBuf};
use url::Url;

/// Convert a `file:` URI to a filesystem path.
pub fn uri_to_path(uri: &Uri) -> Result<PathBuf, ServerError> {
    Url::parse(uri.as_str())
        .ok()
        .filter(|url| url.scheme() == "file")
        .and_then(|url| url.to_file_path().ok())
        .ok_or_else(|| ServerError::InvalidUri(uri.as_str().to_string()))
}

/// Convert an absolute filesystem path to a `file:` URI.
pub fn path_to_uri(path: &Path) -> Result<Uri, ServerError> {
    let invalid = || ServerError::InvalidUri(path.display().to_string());
    let url = Url::from_file_path(path).map_err(|()| invalid())?;
    url.as_str().parse::<Uri>().map_err(|_| invalid())
}
