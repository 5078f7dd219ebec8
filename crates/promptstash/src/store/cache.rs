//! # Local Cache Store
//!
//! Disk mirror of the remote index and content documents. Pure storage: no
//! fallback policy lives here.
//!
//! - Directories are owner-only (0700), files owner read/write (0600).
//!   Existing directories with looser modes are tightened by
//!   [`CacheStore::ensure_layout`].
//! - Every write goes to a temp file in the target directory, has its
//!   permissions fixed, then is renamed over the target.
//! - Content is opaque text, written and read back byte-for-byte.

use super::{MirrorStore, PromptStore};
use crate::error::{Result, StashError, StorageError, StorageErrorKind};
use crate::model::{CacheInfo, Collection, Index, IndexEntry, Prompt, CONTENT_EXT};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;
use walkdir::WalkDir;

const INDEX_FILE: &str = "index.json";
const CONTENT_DIR: &str = "prompts";

pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    pub fn content_dir(&self) -> PathBuf {
        self.root.join(CONTENT_DIR)
    }

    pub fn content_path(&self, id: &str) -> PathBuf {
        self.content_dir().join(format!("{}{}", id, CONTENT_EXT))
    }

    /// Create the cache root and content directory, owner-only.
    pub fn ensure_layout(&self) -> Result<()> {
        ensure_private_dir(&self.root)?;
        ensure_private_dir(&self.content_dir())
    }

    /// Record count, byte size and timestamp of the cache. Never fails: an
    /// unreadable index counts as zero prompts, and paths that error during
    /// the walk are skipped.
    pub fn cache_info(&self) -> CacheInfo {
        let (total_prompts, last_updated) = match self.load_index() {
            Ok(index) => (index.entries.len(), Some(index.last_updated)),
            Err(err) => {
                tracing::debug!(error = %err, "cache index unavailable for info");
                (0, None)
            }
        };

        let cache_size = WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.metadata().ok())
            .filter(|meta| meta.is_file())
            .map(|meta| meta.len())
            .sum();

        CacheInfo {
            total_prompts,
            cache_size,
            last_updated,
        }
    }

    fn require_locator(prompt: &Prompt) -> Result<()> {
        if prompt.gist_url.is_empty() {
            return Err(StorageError::new(
                StorageErrorKind::Invalid,
                "",
                format!("prompt '{}' has no remote locator", prompt.name),
            )
            .into());
        }
        Ok(())
    }

    /// Index for a write: a missing index starts empty, a corrupt one is an error.
    fn load_index_for_write(&self) -> Result<Index> {
        match self.load_index() {
            Ok(index) => Ok(index),
            Err(err) if err.storage_kind() == Some(StorageErrorKind::Missing) => Ok(Index::default()),
            Err(err) => Err(err),
        }
    }

    fn upsert(&self, which: Collection, prompt: &Prompt) -> Result<Prompt> {
        Self::require_locator(prompt)?;
        let mut index = self.load_index_for_write()?;

        let mut stored = prompt.clone();
        stored.id = crate::model::id_from_locator(&prompt.gist_url).to_string();
        let now = Utc::now();
        index.upsert(which, IndexEntry::from_prompt(&stored, now));
        index.last_updated = now;

        self.save_content(&stored.id, &stored.content)?;
        self.save_index(&index)?;
        Ok(stored)
    }
}

impl MirrorStore for CacheStore {
    fn load_index(&self) -> Result<Index> {
        let path = self.index_path();
        let text = fs::read_to_string(&path).map_err(|e| StorageError::io(&path, &e))?;
        serde_json::from_str(&text).map_err(|e| {
            StorageError::new(StorageErrorKind::Corrupt, &path, e.to_string()).into()
        })
    }

    fn save_index(&self, index: &Index) -> Result<()> {
        self.ensure_layout()?;
        let text = serde_json::to_string_pretty(index)?;
        write_atomic(&self.index_path(), &text)
    }

    fn load_content(&self, id: &str) -> Result<String> {
        let path = self.content_path(id);
        fs::read_to_string(&path).map_err(|e| StorageError::io(&path, &e).into())
    }

    fn save_content(&self, id: &str, text: &str) -> Result<()> {
        self.ensure_layout()?;
        write_atomic(&self.content_path(id), text)
    }

    fn delete_content(&self, id: &str) -> Result<()> {
        let path = self.content_path(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(&path, &e).into()),
        }
    }
}

impl PromptStore for CacheStore {
    /// Metadata projections of the cached entries. Content is left empty;
    /// use [`PromptStore::get_content`] to read it.
    fn list(&self) -> Result<Vec<Prompt>> {
        let index = self.load_index()?;
        if index.entries.is_empty() {
            return Err(StashError::EmptyCollection);
        }
        Ok(index.entries.iter().map(IndexEntry::to_prompt).collect())
    }

    fn get_content(&self, id: &str) -> Result<String> {
        self.load_content(id)
    }

    fn add(&mut self, prompt: &Prompt) -> Result<Prompt> {
        self.upsert(Collection::Entries, prompt)
    }

    fn update(&mut self, prompt: &Prompt) -> Result<Prompt> {
        self.upsert(Collection::Entries, prompt)
    }

    fn delete(&mut self, keyword: &str) -> Result<Vec<IndexEntry>> {
        let mut index = self.load_index_for_write()?;
        let removed = index.remove_matching(Collection::Entries, keyword);
        if removed.is_empty() {
            return Ok(removed);
        }
        for entry in &removed {
            self.delete_content(entry.id())?;
        }
        index.last_updated = Utc::now();
        self.save_index(&index)?;
        Ok(removed)
    }

    fn add_export(&mut self, prompt: &Prompt) -> Result<Prompt> {
        self.upsert(Collection::Exports, prompt)
    }

    fn update_export(&mut self, prompt: &Prompt) -> Result<Prompt> {
        self.upsert(Collection::Exports, prompt)
    }

    fn get_exports(&self) -> Result<Vec<IndexEntry>> {
        Ok(self.load_index()?.exports)
    }
}

fn ensure_private_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path).map_err(|e| StorageError::io(path, &e))?;
    }
    set_mode(path, 0o700)
}

/// Write to a temp file beside `target`, fix permissions, rename over it.
fn write_atomic(target: &Path, text: &str) -> Result<()> {
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let name = target
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("cache");
    let tmp = dir.join(format!(".{}-{}.tmp", name, Uuid::new_v4()));

    let result = fs::write(&tmp, text)
        .map_err(|e| StashError::from(StorageError::io(&tmp, &e)))
        .and_then(|_| set_mode(&tmp, 0o600))
        .and_then(|_| fs::rename(&tmp, target).map_err(|e| StorageError::io(target, &e).into()));

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let current = fs::metadata(path)
        .map_err(|e| StorageError::io(path, &e))?
        .permissions()
        .mode()
        & 0o777;
    if current != mode {
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .map_err(|e| StorageError::io(path, &e))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
