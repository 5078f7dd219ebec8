//! # Remote Document Store
//!
//! Keeps one index document plus one content document per prompt on a hosted
//! [`DocumentService`].
//!
//! ## Initialization
//!
//! `Uninitialized → locate or create the index document → Ready`. This runs
//! lazily on the first operation and the index document id is remembered for
//! the life of the store. A read that had to create the index answers
//! `NoIndex`; once the index has been written it answers `EmptyCollection`
//! when there is nothing in it.
//!
//! ## Index Writes
//!
//! Every mutation is a read-modify-write of the whole index document. The
//! write is conditional on the version that was read; if another writer got
//! there first the cycle is re-run, up to `max_attempts` times, after which
//! the operation fails with `Conflict`.
//!
//! Content documents are written before the index so that a crash leaves an
//! orphan document (harmless) rather than an entry pointing at nothing. An
//! entry whose content cannot be fetched is skipped when listing. When every
//! entry is skipped, `list` answers `EmptyCollection` only if the content
//! documents are gone; if any fetch failed in transport or auth, that error is
//! returned instead so callers can tell an outage from an empty collection.
//!
//! ## Failures
//!
//! Transport and auth failures are returned unchanged. This store never falls
//! back to anything.

use super::documents::{Document, DocumentEdit, DocumentService, NewDocument, INDEX_FILE, INDEX_MARKER};
use super::PromptStore;
use crate::error::{ErrorKind, Result, StashError};
use crate::model::{Collection, Index, IndexEntry, Prompt};
use chrono::Utc;
use once_cell::unsync::OnceCell;
use std::cell::Cell;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

pub struct RemoteStore<D: DocumentService> {
    service: D,
    index_id: OnceCell<String>,
    /// Set when this store created the index and nothing has been written yet.
    fresh_index: Cell<bool>,
    max_attempts: u32,
}

impl<D: DocumentService> RemoteStore<D> {
    pub fn new(service: D) -> Self {
        Self {
            service,
            index_id: OnceCell::new(),
            fresh_index: Cell::new(false),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Id of the index document, locating or creating it on first use.
    pub fn index_document_id(&self) -> Result<&str> {
        self.index_id
            .get_or_try_init(|| self.locate_or_create_index())
            .map(String::as_str)
    }

    fn locate_or_create_index(&self) -> Result<String> {
        let documents = self.service.list_documents()?;
        let mut markers = documents.iter().filter(|d| d.description == INDEX_MARKER);
        if let Some(found) = markers.next() {
            if markers.next().is_some() {
                tracing::warn!(id = %found.id, "multiple index documents found; using the first");
            }
            tracing::debug!(id = %found.id, "located remote index");
            return Ok(found.id.clone());
        }

        let empty = serde_json::to_string_pretty(&Index::default())?;
        let created = self
            .service
            .create_document(&NewDocument::single(INDEX_MARKER, false, INDEX_FILE, empty))?;
        tracing::info!(id = %created.id, "created remote prompt index");
        self.fresh_index.set(true);
        Ok(created.id)
    }

    fn read_index(&self) -> Result<(Index, Option<String>)> {
        let id = self.index_document_id()?;
        let doc = self.service.get_document(id)?;
        let index = match doc.file(Some(INDEX_FILE)) {
            Some(text) if !text.trim().is_empty() => serde_json::from_str(text)?,
            _ => Index::default(),
        };
        Ok((index, doc.version))
    }

    /// Read the index, apply `mutate`, write it back conditionally. Retries on
    /// version conflicts.
    fn commit_index<T>(&self, mut mutate: impl FnMut(&mut Index) -> T) -> Result<T> {
        let id = self.index_document_id()?.to_string();
        for attempt in 1..=self.max_attempts {
            let (mut index, version) = self.read_index()?;
            let out = mutate(&mut index);
            index.last_updated = Utc::now();
            let body = serde_json::to_string_pretty(&index)?;
            let edit = DocumentEdit::default().put(INDEX_FILE, body).if_version(version);
            match self.service.edit_document(&id, &edit) {
                Ok(_) => {
                    self.fresh_index.set(false);
                    return Ok(out);
                }
                Err(err) if err.kind() == ErrorKind::Conflict => {
                    tracing::warn!(attempt, max = self.max_attempts, "index write conflicted; retrying");
                }
                Err(err) => return Err(err),
            }
        }
        Err(StashError::Conflict {
            attempts: self.max_attempts,
        })
    }

    fn fetch_content(&self, entry: &IndexEntry) -> Result<String> {
        let doc = self.service.get_document(entry.id())?;
        content_of(&doc, Some(&entry.file_path))
    }

    fn add_to(&mut self, which: Collection, prompt: &Prompt) -> Result<Prompt> {
        let (index, _) = self.read_index()?;
        if let Some(existing) = index.find_by_identity(which, &prompt.name, &prompt.author) {
            tracing::debug!(name = %prompt.name, "prompt exists; updating instead");
            let mut target = prompt.clone();
            target.gist_url = existing.gist_url.clone();
            target.id = existing.id().to_string();
            return self.update_in(which, &target);
        }

        let public = which == Collection::Exports;
        let doc = self.service.create_document(&NewDocument::single(
            document_description(prompt),
            public,
            prompt.file_name(),
            prompt.content.as_str(),
        ))?;

        let mut stored = prompt.clone();
        stored.id = doc.id.clone();
        stored.gist_url = doc.html_url.clone();
        let entry = IndexEntry::from_prompt(&stored, Utc::now());

        if let Err(err) = self.commit_index(|idx| idx.upsert(which, entry.clone())) {
            if let Err(cleanup) = self.service.delete_document(&doc.id) {
                tracing::warn!(id = %doc.id, error = %cleanup, "failed to remove orphaned content document");
            }
            return Err(err);
        }
        Ok(stored)
    }

    fn update_in(&mut self, which: Collection, prompt: &Prompt) -> Result<Prompt> {
        let (index, _) = self.read_index()?;
        let found = if !prompt.gist_url.is_empty() {
            index.find_by_locator(which, &prompt.gist_url)
        } else if !prompt.id.is_empty() {
            index.find_by_id(which, &prompt.id)
        } else {
            index.find_by_identity(which, &prompt.name, &prompt.author)
        };
        let existing = found
            .cloned()
            .ok_or_else(|| StashError::NotFound(format!("prompt '{}'", prompt.name)))?;

        let new_file = prompt.file_name();
        let mut edit = DocumentEdit::default()
            .describe(document_description(prompt))
            .put(new_file.clone(), prompt.content.as_str());
        if !existing.file_path.is_empty() && existing.file_path != new_file {
            edit = edit.remove(existing.file_path.clone());
        }
        self.service.edit_document(existing.id(), &edit)?;

        let mut stored = prompt.clone();
        stored.id = existing.id().to_string();
        stored.gist_url = existing.gist_url.clone();
        let entry = IndexEntry::from_prompt(&stored, Utc::now());
        self.commit_index(|idx| idx.upsert(which, entry.clone()))?;
        Ok(stored)
    }
}

impl<D: DocumentService> PromptStore for RemoteStore<D> {
    fn list(&self) -> Result<Vec<Prompt>> {
        let (index, _) = self.read_index()?;
        if index.entries.is_empty() {
            return Err(if self.fresh_index.get() {
                StashError::NoIndex
            } else {
                StashError::EmptyCollection
            });
        }

        let mut prompts = Vec::with_capacity(index.entries.len());
        // Last transport or auth failure among skipped entries.
        let mut outage = None;
        for entry in index.entries {
            match self.fetch_content(&entry) {
                Ok(content) => prompts.push(entry.into_prompt_with_content(content)),
                Err(err) => {
                    tracing::debug!(url = %entry.gist_url, error = %err, "skipping unreachable prompt");
                    if !err.is_authoritative() {
                        outage = Some(err);
                    }
                }
            }
        }

        if prompts.is_empty() {
            return Err(outage.unwrap_or(StashError::EmptyCollection));
        }
        Ok(prompts)
    }

    fn get_content(&self, id: &str) -> Result<String> {
        let (index, _) = self.read_index()?;
        let file_path = index
            .find_by_id(Collection::Entries, id)
            .or_else(|| index.find_by_id(Collection::Exports, id))
            .map(|e| e.file_path.clone());
        let doc = self.service.get_document(id)?;
        content_of(&doc, file_path.as_deref())
    }

    fn add(&mut self, prompt: &Prompt) -> Result<Prompt> {
        self.add_to(Collection::Entries, prompt)
    }

    fn update(&mut self, prompt: &Prompt) -> Result<Prompt> {
        self.update_in(Collection::Entries, prompt)
    }

    fn delete(&mut self, keyword: &str) -> Result<Vec<IndexEntry>> {
        let (index, _) = self.read_index()?;
        let matched: Vec<IndexEntry> = index
            .entries
            .iter()
            .filter(|e| e.matches_locator(keyword))
            .cloned()
            .collect();
        if matched.is_empty() {
            return Ok(Vec::new());
        }

        for entry in &matched {
            match self.service.delete_document(entry.id()) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    tracing::debug!(id = %entry.id(), "content document already gone");
                }
                Err(err) => return Err(err),
            }
        }

        self.commit_index(|idx| idx.remove_matching(Collection::Entries, keyword))
    }

    fn add_export(&mut self, prompt: &Prompt) -> Result<Prompt> {
        self.add_to(Collection::Exports, prompt)
    }

    fn update_export(&mut self, prompt: &Prompt) -> Result<Prompt> {
        self.update_in(Collection::Exports, prompt)
    }

    fn get_exports(&self) -> Result<Vec<IndexEntry>> {
        let (index, _) = self.read_index()?;
        Ok(index.exports)
    }
}

fn content_of(doc: &Document, file_path: Option<&str>) -> Result<String> {
    file_path
        .and_then(|path| doc.file(Some(path)))
        .or_else(|| doc.file(None))
        .map(str::to_string)
        .ok_or_else(|| StashError::NotFound(format!("content of document {}", doc.id)))
}

fn document_description(prompt: &Prompt) -> String {
    if prompt.description.trim().is_empty() {
        prompt.name.clone()
    } else {
        prompt.description.clone()
    }
}
