//! Virtual File System for documents open in the editor.
//!
//! The VFS holds the live text of every open document and applies the
//! incremental edits sent by the editor. Unopened documents are never
//! stored here; they are read from disk on demand.

use lsp_types::{Position, TextDocumentContentChangeEvent};
use ropey::Rope;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// An open document.
#[derive(Debug)]
pub struct Document {
    /// The document content as a rope for efficient editing.
    content: Rope,
    /// The version reported by the editor.
    version: i32,
}

impl Document {
    /// Create a new document with the given content.
    pub fn new(content: &str, version: i32) -> Self {
        Self {
            content: Rope::from_str(content),
            version,
        }
    }

    /// Get the document content as a string.
    pub fn text(&self) -> String {
        self.content.to_string()
    }

    /// Get the editor's version of the document.
    pub fn version(&self) -> i32 {
        self.version
    }

    /// Apply editor changes in order.
    ///
    /// A change without a range replaces the whole document. Ranged changes
    /// use UTF-16 positions; positions past the end are clamped.
    pub fn apply_changes(&mut self, changes: Vec<TextDocumentContentChangeEvent>, version: i32) {
        for change in changes {
            match change.range {
                Some(range) => {
                    let start = self.char_index(range.start);
                    let end = self.char_index(range.end).max(start);
                    self.content.remove(start..end);
                    self.content.insert(start, &change.text);
                }
                None => self.content = Rope::from_str(&change.text),
            }
        }
        self.version = version;
    }

    fn char_index(&self, position: Position) -> usize {
        let line = position.line as usize;
        if line >= self.content.len_lines() {
            return self.content.len_chars();
        }
        let line_start = self.content.line_to_char(line);
        let line_slice = self.content.line(line);
        let column = (position.character as usize).min(line_slice.len_utf16_cu());
        line_start + line_slice.utf16_cu_to_char(column)
    }
}

/// Virtual file system for managing open documents.
#[derive(Debug, Default)]
pub struct Vfs {
    /// Open documents indexed by path.
    documents: HashMap<PathBuf, Document>,
}

impl Vfs {
    /// Create a new empty VFS.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a document in the VFS.
    pub fn open(&mut self, path: PathBuf, content: &str, version: i32) {
        self.documents.insert(path, Document::new(content, version));
    }

    /// Close a document in the VFS.
    pub fn close(&mut self, path: &Path) {
        self.documents.remove(path);
    }

    /// Get document content as a string.
    pub fn get_content(&self, path: &Path) -> Option<String> {
        self.documents.get(path).map(Document::text)
    }

    /// Length of an open document in characters.
    pub fn document_length(&self, path: &Path) -> Option<usize> {
        self.documents.get(path).map(|doc| doc.content.len_chars())
    }

    /// Apply editor changes to an open document.
    ///
    /// Returns `false` if the document is not open.
    pub fn apply_changes(
        &mut self,
        path: &Path,
        changes: Vec<TextDocumentContentChangeEvent>,
        version: i32,
    ) -> bool {
        match self.documents.get_mut(path) {
            Some(doc) => {
                tracing::debug!(
                    "Applying {} changes to {} (editor version {} -> {})",
                    changes.len(),
                    path.display(),
                    doc.version(),
                    version
                );
                doc.apply_changes(changes, version);
                true
            }
            None => false,
        }
    }
}
