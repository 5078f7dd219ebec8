//! Raw I/O against a hosted document service.
//!
//! A document is a named bundle of files plus a free-text description. The
//! description doubles as a discriminator: the index document is found by
//! [`INDEX_MARKER`]. This trait handles the "how" (HTTP vs memory), while
//! [`super::remote::RemoteStore`] handles the "what" (index consistency).

use crate::error::Result;
use std::collections::BTreeMap;

/// Description carried by the index document.
pub const INDEX_MARKER: &str = "promptstash-index";

/// File name of the index inside its document.
pub const INDEX_FILE: &str = "index.json";

/// A document as listed: no file contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSummary {
    pub id: String,
    pub html_url: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub id: String,
    pub html_url: String,
    pub description: String,
    pub public: bool,
    pub files: BTreeMap<String, String>,
    /// Opaque version tag used for conditional edits.
    pub version: Option<String>,
}

impl Document {
    /// The named file, or the first file when `name` is absent.
    pub fn file(&self, name: Option<&str>) -> Option<&str> {
        match name {
            Some(n) => self.files.get(n).map(String::as_str),
            None => self.files.values().next().map(String::as_str),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDocument {
    pub description: String,
    pub public: bool,
    pub files: BTreeMap<String, String>,
}

impl NewDocument {
    pub fn single(description: impl Into<String>, public: bool, file: impl Into<String>, content: impl Into<String>) -> Self {
        let mut files = BTreeMap::new();
        files.insert(file.into(), content.into());
        Self {
            description: description.into(),
            public,
            files,
        }
    }
}

/// A partial edit. A file mapped to `None` is removed from the document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentEdit {
    pub description: Option<String>,
    pub files: BTreeMap<String, Option<String>>,
    /// Apply only if the document is still at this version.
    pub if_version: Option<String>,
}

impl DocumentEdit {
    pub fn put(mut self, file: impl Into<String>, content: impl Into<String>) -> Self {
        self.files.insert(file.into(), Some(content.into()));
        self
    }

    pub fn remove(mut self, file: impl Into<String>) -> Self {
        self.files.insert(file.into(), None);
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn if_version(mut self, version: Option<String>) -> Self {
        self.if_version = version;
        self
    }
}

/// Operations offered by the hosted document service.
///
/// Errors: `Auth` for rejected credentials, `NotFound` for unknown ids,
/// `Conflict` when `if_version` no longer matches, `Network` for everything
/// else that went wrong in transport.
pub trait DocumentService {
    fn list_documents(&self) -> Result<Vec<DocumentSummary>>;

    fn get_document(&self, id: &str) -> Result<Document>;

    fn create_document(&self, doc: &NewDocument) -> Result<Document>;

    fn edit_document(&self, id: &str, edit: &DocumentEdit) -> Result<Document>;

    fn delete_document(&self, id: &str) -> Result<()>;
}
