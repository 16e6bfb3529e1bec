//! Per-document state and the document registry.
//!
//! Every document the server has heard of (opened, seen on disk or asked
//! about) has exactly one [`DocumentInfo`], keyed by filesystem path. The
//! record carries the content version, the open flag and the cached text
//! and diagnostics. Versions are atomics so that validation tasks can check
//! whether their snapshot is still current; they are only written from the
//! main loop.

use crate::error::{ServerError, SharedError, SharedResult};
use crate::host::Host;
use crate::vfs::Vfs;
use glsl_validate::{DiagnosticVersion, VersionedExecutor, diagnostics_executor};
use lsp_types::Diagnostic;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};

/// Diagnostics for one version of a document.
pub type Diagnostics = Arc<Vec<Diagnostic>>;

/// Content of a document: version, open flag and on-disk text cache.
#[derive(Debug)]
pub struct DocumentContent {
    version: AtomicU32,
    opened: AtomicBool,
    disk: VersionedExecutor<Arc<str>, u32, SharedError>,
}

impl DocumentContent {
    fn new() -> Self {
        Self {
            version: AtomicU32::new(1),
            opened: AtomicBool::new(false),
            disk: VersionedExecutor::new(),
        }
    }

    /// Current content version.
    pub fn version(&self) -> u32 {
        self.version.load(Ordering::SeqCst)
    }

    /// Record an edit or disk change; returns the new version.
    pub fn increase_version(&self) -> u32 {
        self.version.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Whether the editor has the document open.
    pub fn is_opened(&self) -> bool {
        self.opened.load(Ordering::SeqCst)
    }

    /// Mark the document open or closed.
    pub fn set_opened(&self, opened: bool) {
        self.opened.store(opened, Ordering::SeqCst);
    }

    /// Length in characters of the text last seen for this document: the
    /// editor text when open, the last disk read otherwise.
    pub fn loaded_length(&self, path: &Path, vfs: &RwLock<Vfs>) -> Option<usize> {
        if self.is_opened() {
            return vfs.read().document_length(path);
        }
        self.disk.completed_result().map(|text| text.chars().count())
    }

    /// Current text: live editor text when open, disk content otherwise.
    ///
    /// An open document missing from the VFS is an internal inconsistency
    /// and fails with [`ServerError::OpenDocumentMissing`].
    pub async fn get_text(
        &self,
        path: &Path,
        vfs: &RwLock<Vfs>,
        host: &Arc<dyn Host>,
    ) -> SharedResult<Arc<str>> {
        if self.is_opened() {
            return vfs
                .read()
                .get_content(path)
                .map(Arc::from)
                .ok_or_else(|| Arc::new(ServerError::OpenDocumentMissing(path.to_path_buf())));
        }
        self.disk
            .get_result(self.version(), || {
                let read = host.get_document_content(path);
                async move { read.await.map(Arc::from).map_err(Arc::new) }
            })
            .await
    }
}

/// Diagnostic bookkeeping for a document.
#[derive(Debug)]
pub struct DocumentDiagnostics {
    sequence: AtomicI32,
    display_version: Mutex<Option<DiagnosticVersion>>,
    executor: VersionedExecutor<Diagnostics, DiagnosticVersion, SharedError>,
}

impl DocumentDiagnostics {
    fn new() -> Self {
        Self {
            sequence: AtomicI32::new(0),
            display_version: Mutex::new(None),
            executor: diagnostics_executor(),
        }
    }

    /// Next notification sequence number.
    pub fn increase_sequence(&self) -> i32 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Version of the diagnostics last handed to a pulling client.
    pub fn display_version(&self) -> Option<DiagnosticVersion> {
        *self.display_version.lock()
    }

    /// Remember which version a pulling client is displaying.
    pub fn set_display_version(&self, version: Option<DiagnosticVersion>) {
        *self.display_version.lock() = version;
    }

    /// Diagnostics covering `version`, computing them with `produce` if needed.
    pub async fn get_diagnostics<F, Fut>(
        &self,
        version: DiagnosticVersion,
        produce: F,
    ) -> SharedResult<Diagnostics>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = SharedResult<Diagnostics>> + Send + 'static,
    {
        self.executor.get_result(version, produce).await
    }
}

/// Everything the server tracks for one document.
#[derive(Debug)]
pub struct DocumentInfo {
    path: PathBuf,
    /// Text and version.
    pub content: DocumentContent,
    /// Diagnostic state.
    pub diagnostics: DocumentDiagnostics,
}

impl DocumentInfo {
    /// Create a record for a document seen for the first time.
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            content: DocumentContent::new(),
            diagnostics: DocumentDiagnostics::new(),
        }
    }

    /// Filesystem path of the document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Diagnostic version for the given configuration version.
    pub fn version(&self, configuration_version: u32) -> DiagnosticVersion {
        DiagnosticVersion::new(self.content.version(), configuration_version)
    }
}

/// Registry of all known documents.
#[derive(Debug, Default)]
pub struct Documents {
    documents: HashMap<PathBuf, Arc<DocumentInfo>>,
}

impl Documents {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The record for `path`, created on first reference.
    pub fn get_or_create(&mut self, path: &Path) -> Arc<DocumentInfo> {
        if let Some(info) = self.documents.get(path) {
            return Arc::clone(info);
        }
        let info = Arc::new(DocumentInfo::new(path.to_path_buf()));
        self.documents.insert(path.to_path_buf(), Arc::clone(&info));
        info
    }

    /// The record for `path`, if any.
    pub fn get(&self, path: &Path) -> Option<Arc<DocumentInfo>> {
        self.documents.get(path).cloned()
    }

    /// Drop the record for `path`.
    pub fn remove(&mut self, path: &Path) -> Option<Arc<DocumentInfo>> {
        self.documents.remove(path)
    }

    /// All records.
    pub fn all(&self) -> Vec<Arc<DocumentInfo>> {
        self.documents.values().cloned().collect()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::EmbeddedHost;

    #[test]
    fn test_one_record_per_path() {
        let mut documents = Documents::new();
        let a = documents.get_or_create(Path::new("/s/a.frag"));
        let again = documents.get_or_create(Path::new("/s/a.frag"));
        assert!(Arc::ptr_eq(&a, &again));
        assert_eq!(documents.len(), 1);

        documents.remove(Path::new("/s/a.frag"));
        let fresh = documents.get_or_create(Path::new("/s/a.frag"));
        assert!(!Arc::ptr_eq(&a, &fresh));
        assert_eq!(fresh.content.version(), 1);
    }

    #[test]
    fn test_versions() {
        let info = DocumentInfo::new(PathBuf::from("/s/a.vert"));
        assert_eq!(info.version(0), DiagnosticVersion::new(1, 0));
        assert_eq!(info.content.increase_version(), 2);
        assert_eq!(info.version(5), DiagnosticVersion::new(2, 5));
        assert_eq!(info.diagnostics.increase_sequence(), 1);
        assert_eq!(info.diagnostics.increase_sequence(), 2);
    }

    #[tokio::test]
    async fn test_open_document_text_comes_from_vfs() {
        let path = PathBuf::from("/s/a.frag");
        let info = DocumentInfo::new(path.clone());
        let vfs = RwLock::new(Vfs::new());
        let host: Arc<dyn Host> = Arc::new(EmbeddedHost);

        info.content.set_opened(true);
        let missing = info.content.get_text(&path, &vfs, &host).await;
        match missing {
            Err(e) => assert!(matches!(e.as_ref(), ServerError::OpenDocumentMissing(_))),
            Ok(text) => panic!("unexpected text {text:?}"),
        }

        vfs.write().open(path.clone(), "void main() {}", 1);
        let text = info.content.get_text(&path, &vfs, &host).await.unwrap();
        assert_eq!(&*text, "void main() {}");
    }

    #[tokio::test]
    async fn test_closed_document_text_is_cached_per_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.comp");
        std::fs::write(&path, "first").unwrap();

        let info = DocumentInfo::new(path.clone());
        let vfs = RwLock::new(Vfs::new());
        let host: Arc<dyn Host> = Arc::new(crate::host::DesktopHost);

        assert_eq!(&*info.content.get_text(&path, &vfs, &host).await.unwrap(), "first");
        std::fs::write(&path, "second").unwrap();
        // Same version: served from the cache.
        assert_eq!(&*info.content.get_text(&path, &vfs, &host).await.unwrap(), "first");

        info.content.increase_version();
        assert_eq!(&*info.content.get_text(&path, &vfs, &host).await.unwrap(), "second");
    }
}
