use super::documents::{Document, DocumentEdit, DocumentService, DocumentSummary, NewDocument};
use crate::error::{Result, StashError};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::rc::Rc;

#[derive(Default)]
struct State {
    documents: BTreeMap<String, Document>,
    next_id: u64,
    offline: bool,
    auth_expired: bool,
    unreachable: HashSet<String>,
    pending_conflicts: u32,
    edit_calls: u32,
}

/// In-memory document service for testing.
///
/// Uses `Rc<RefCell<_>>` since the engine is single-threaded; clones share the
/// same state, so a test can keep a handle to inject failures after handing
/// the service to a store.
#[derive(Clone, Default)]
pub struct MemDocumentService {
    state: Rc<RefCell<State>>,
}

impl MemDocumentService {
    pub const BASE_URL: &'static str = "https://gist.example.test";

    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails with a network error while set.
    pub fn set_offline(&self, offline: bool) {
        self.state.borrow_mut().offline = offline;
    }

    /// Every call fails with an auth error while set.
    pub fn set_auth_expired(&self, expired: bool) {
        self.state.borrow_mut().auth_expired = expired;
    }

    /// `get_document` for this id fails with a network error.
    pub fn set_unreachable(&self, id: &str, unreachable: bool) {
        let mut state = self.state.borrow_mut();
        if unreachable {
            state.unreachable.insert(id.to_string());
        } else {
            state.unreachable.remove(id);
        }
    }

    /// The next `count` conditional edits report a version conflict.
    pub fn inject_conflicts(&self, count: u32) {
        self.state.borrow_mut().pending_conflicts = count;
    }

    pub fn document_count(&self) -> usize {
        self.state.borrow().documents.len()
    }

    pub fn edit_calls(&self) -> u32 {
        self.state.borrow().edit_calls
    }

    pub fn find_by_description(&self, description: &str) -> Option<Document> {
        self.state
            .borrow()
            .documents
            .values()
            .find(|d| d.description == description)
            .cloned()
    }

    /// Insert a document directly, bypassing failure injection.
    pub fn seed(&self, doc: &NewDocument) -> Document {
        let mut state = self.state.borrow_mut();
        Self::insert(&mut state, doc)
    }

    /// Mutate a stored document out-of-band, as another client would.
    pub fn tamper(&self, id: &str, f: impl FnOnce(&mut Document)) -> bool {
        let mut state = self.state.borrow_mut();
        match state.documents.get_mut(id) {
            Some(doc) => {
                f(doc);
                Self::bump(doc);
                true
            }
            None => false,
        }
    }

    fn insert(state: &mut State, doc: &NewDocument) -> Document {
        state.next_id += 1;
        let id = format!("doc{:04}", state.next_id);
        let stored = Document {
            html_url: format!("{}/{}", Self::BASE_URL, id),
            id: id.clone(),
            description: doc.description.clone(),
            public: doc.public,
            files: doc.files.clone(),
            version: Some("v1".to_string()),
        };
        state.documents.insert(id, stored.clone());
        stored
    }

    fn bump(doc: &mut Document) {
        let next = doc
            .version
            .as_deref()
            .and_then(|v| v.trim_start_matches('v').parse::<u64>().ok())
            .unwrap_or(0)
            + 1;
        doc.version = Some(format!("v{}", next));
    }

    fn check(&self, operation: &str) -> Result<()> {
        let state = self.state.borrow();
        if state.auth_expired {
            return Err(StashError::Auth("token expired".to_string()));
        }
        if state.offline {
            return Err(StashError::network(operation, None, "simulated network failure"));
        }
        Ok(())
    }
}

impl DocumentService for MemDocumentService {
    fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        self.check("list documents")?;
        let state = self.state.borrow();
        Ok(state
            .documents
            .values()
            .map(|d| DocumentSummary {
                id: d.id.clone(),
                html_url: d.html_url.clone(),
                description: d.description.clone(),
            })
            .collect())
    }

    fn get_document(&self, id: &str) -> Result<Document> {
        self.check("get document")?;
        let state = self.state.borrow();
        if state.unreachable.contains(id) {
            return Err(StashError::network("get document", Some(500), "simulated outage"));
        }
        state
            .documents
            .get(id)
            .cloned()
            .ok_or_else(|| StashError::NotFound(format!("document {}", id)))
    }

    fn create_document(&self, doc: &NewDocument) -> Result<Document> {
        self.check("create document")?;
        let mut state = self.state.borrow_mut();
        Ok(Self::insert(&mut state, doc))
    }

    fn edit_document(&self, id: &str, edit: &DocumentEdit) -> Result<Document> {
        self.check("edit document")?;
        let mut state = self.state.borrow_mut();
        state.edit_calls += 1;

        if edit.if_version.is_some() && state.pending_conflicts > 0 {
            state.pending_conflicts -= 1;
            return Err(StashError::Conflict { attempts: 1 });
        }

        let doc = state
            .documents
            .get_mut(id)
            .ok_or_else(|| StashError::NotFound(format!("document {}", id)))?;

        if let Some(expected) = &edit.if_version {
            if doc.version.as_ref() != Some(expected) {
                return Err(StashError::Conflict { attempts: 1 });
            }
        }

        if let Some(description) = &edit.description {
            doc.description = description.clone();
        }
        for (name, content) in &edit.files {
            match content {
                Some(text) => {
                    doc.files.insert(name.clone(), text.clone());
                }
                None => {
                    doc.files.remove(name);
                }
            }
        }
        Self::bump(doc);
        Ok(doc.clone())
    }

    fn delete_document(&self, id: &str) -> Result<()> {
        self.check("delete document")?;
        let mut state = self.state.borrow_mut();
        state
            .documents
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StashError::NotFound(format!("document {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn create_get_and_delete() {
        let svc = MemDocumentService::new();
        let doc = svc
            .create_document(&NewDocument::single("desc", false, "a.yaml", "hello"))
            .unwrap();
        assert!(doc.html_url.ends_with(&doc.id));
        assert_eq!(svc.get_document(&doc.id).unwrap().file(None), Some("hello"));

        svc.delete_document(&doc.id).unwrap();
        assert_eq!(svc.get_document(&doc.id).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn edit_renames_and_bumps_version() {
        let svc = MemDocumentService::new();
        let doc = svc
            .create_document(&NewDocument::single("d", false, "old.yaml", "x"))
            .unwrap();
        let edited = svc
            .edit_document(&doc.id, &DocumentEdit::default().remove("old.yaml").put("new.yaml", "y"))
            .unwrap();
        assert_eq!(edited.files.len(), 1);
        assert_eq!(edited.file(Some("new.yaml")), Some("y"));
        assert_ne!(edited.version, doc.version);
    }

    #[test]
    fn stale_version_conflicts() {
        let svc = MemDocumentService::new();
        let doc = svc
            .create_document(&NewDocument::single("d", false, "f", "1"))
            .unwrap();
        svc.edit_document(&doc.id, &DocumentEdit::default().put("f", "2"))
            .unwrap();
        let err = svc
            .edit_document(&doc.id, &DocumentEdit::default().put("f", "3").if_version(doc.version))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn clones_share_failure_injection() {
        let svc = MemDocumentService::new();
        let handle = svc.clone();
        handle.set_offline(true);
        assert_eq!(svc.list_documents().unwrap_err().kind(), ErrorKind::Network);
        handle.set_offline(false);
        handle.set_auth_expired(true);
        assert_eq!(svc.list_documents().unwrap_err().kind(), ErrorKind::Auth);
    }
}
