//! # Tiered Store
//!
//! Composes an authoritative remote store with a local mirror behind the same
//! [`PromptStore`] interface.
//!
//! ## Reads (`list`, `get`, `get_content`, `get_exports`)
//!
//! 1. Ask the remote.
//! 2. On success, mirror the result into the cache (best-effort) and return it.
//! 3. On failure with `force_remote` set, return the remote error as
//!    `RemoteOnly` without looking at the cache.
//! 4. Otherwise answer from the cache. If that fails too, return `Fallback`
//!    carrying both causes.
//!
//! `NoIndex`, `EmptyCollection` and `NotFound` from the remote describe its
//! state, not its reachability, and are returned as-is.
//!
//! ## Writes
//!
//! Always remote first; a remote failure aborts the write and the cache is not
//! touched. After a remote success the cache is updated to match.
//!
//! ## Mirror failures
//!
//! Never returned to the caller. They are handed to a [`MirrorObserver`]; the
//! default one logs them.
//!
//! ## Timestamp stability
//!
//! A refresh that finds an entry already cached (same `gistURL`) keeps that
//! entry's cached `lastUpdated`. The index's own `lastUpdated` only moves when
//! the set of entries changes.

use super::cache::CacheStore;
use super::{MirrorStore, PromptStore};
use crate::error::{Result, StashError, StorageErrorKind};
use crate::model::{CacheInfo, Collection, Index, IndexEntry, Prompt};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorOp {
    List,
    Get,
    GetContent,
    GetExports,
    Add,
    Update,
    Delete,
    AddExport,
    UpdateExport,
}

/// Receives cache mirror failures that were kept from the caller.
pub trait MirrorObserver {
    fn mirror_failed(&self, operation: MirrorOp, error: &StashError);
}

impl<F> MirrorObserver for F
where
    F: Fn(MirrorOp, &StashError),
{
    fn mirror_failed(&self, operation: MirrorOp, error: &StashError) {
        self(operation, error)
    }
}

/// Default observer: logs and moves on.
pub struct LogObserver;

impl MirrorObserver for LogObserver {
    fn mirror_failed(&self, operation: MirrorOp, error: &StashError) {
        tracing::warn!(?operation, error = %error, "cache mirror failed");
    }
}

/// How a read refresh treats cached entries the remote did not return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Refresh {
    /// The remote result is the full set (`list`).
    Replace,
    /// The remote result is a subset (`get`); keep everything else.
    Merge,
}

pub struct TieredStore<R: PromptStore, L: PromptStore + MirrorStore> {
    remote: R,
    cache: L,
    force_remote: bool,
    observer: Box<dyn MirrorObserver>,
}

impl<R: PromptStore, L: PromptStore + MirrorStore> TieredStore<R, L> {
    pub fn new(remote: R, cache: L) -> Self {
        Self {
            remote,
            cache,
            force_remote: false,
            observer: Box::new(LogObserver),
        }
    }

    /// Never answer reads from the cache.
    pub fn with_force_remote(mut self, force_remote: bool) -> Self {
        self.force_remote = force_remote;
        self
    }

    pub fn with_observer(mut self, observer: Box<dyn MirrorObserver>) -> Self {
        self.observer = observer;
        self
    }

    fn observe(&self, operation: MirrorOp, result: Result<()>) {
        if let Err(err) = result {
            self.observer.mirror_failed(operation, &err);
        }
    }

    fn read_through<T>(
        &self,
        operation: MirrorOp,
        from_remote: impl FnOnce(&R) -> Result<T>,
        from_cache: impl FnOnce(&L) -> Result<T>,
        mirror: impl FnOnce(&T) -> Result<()>,
    ) -> Result<T> {
        let remote_err = match from_remote(&self.remote) {
            Ok(value) => {
                self.observe(operation, mirror(&value));
                return Ok(value);
            }
            Err(err) if err.is_authoritative() => return Err(err),
            Err(err) => err,
        };

        if self.force_remote {
            return Err(StashError::RemoteOnly {
                source: Box::new(remote_err),
            });
        }

        tracing::warn!(?operation, error = %remote_err, "remote unavailable; answering from cache");
        from_cache(&self.cache).map_err(|cache_err| StashError::Fallback {
            remote: Box::new(remote_err),
            cache: Box::new(cache_err),
        })
    }

    /// Cached index to reconcile against. A missing or unreadable index is
    /// replaced wholesale.
    fn cached_index(&self) -> Index {
        match self.cache.load_index() {
            Ok(index) => index,
            Err(err) => {
                if err.storage_kind() != Some(StorageErrorKind::Missing) {
                    tracing::debug!(error = %err, "replacing unreadable cache index");
                }
                Index::default()
            }
        }
    }

    fn mirror_prompts(&self, prompts: &[Prompt], mode: Refresh) -> Result<()> {
        let cached = self.cached_index();
        let next = reconcile_index(&cached, prompts, mode, Utc::now());
        self.cache.save_index(&next)?;
        for prompt in prompts {
            self.cache.save_content(&prompt.id, &prompt.content)?;
        }
        Ok(())
    }

    fn mirror_exports(&self, exports: &[IndexEntry]) -> Result<()> {
        let cached = self.cached_index();
        let next = reconcile_exports(&cached, exports, Utc::now());
        self.cache.save_index(&next)
    }
}

impl<R: PromptStore> TieredStore<R, CacheStore> {
    pub fn cache_info(&self) -> CacheInfo {
        self.cache.cache_info()
    }
}

impl<R: PromptStore, L: PromptStore + MirrorStore> PromptStore for TieredStore<R, L> {
    fn list(&self) -> Result<Vec<Prompt>> {
        let result = self.read_through(
            MirrorOp::List,
            |remote| remote.list(),
            |cache| cache.list(),
            |prompts| self.mirror_prompts(prompts, Refresh::Replace),
        );
        if let Err(StashError::EmptyCollection) = &result {
            self.observe(MirrorOp::List, self.mirror_prompts(&[], Refresh::Replace));
        }
        result
    }

    fn get(&self, keyword: &str) -> Result<Vec<Prompt>> {
        self.read_through(
            MirrorOp::Get,
            |remote| remote.get(keyword),
            |cache| cache.get(keyword),
            |prompts| self.mirror_prompts(prompts, Refresh::Merge),
        )
    }

    fn get_content(&self, id: &str) -> Result<String> {
        self.read_through(
            MirrorOp::GetContent,
            |remote| remote.get_content(id),
            |cache| cache.get_content(id),
            |text| self.cache.save_content(id, text),
        )
    }

    fn add(&mut self, prompt: &Prompt) -> Result<Prompt> {
        let stored = self.remote.add(prompt)?;
        let mirrored = self.cache.add(&stored).map(|_| ());
        self.observe(MirrorOp::Add, mirrored);
        Ok(stored)
    }

    fn update(&mut self, prompt: &Prompt) -> Result<Prompt> {
        let stored = self.remote.update(prompt)?;
        let mirrored = self.cache.update(&stored).map(|_| ());
        self.observe(MirrorOp::Update, mirrored);
        Ok(stored)
    }

    fn delete(&mut self, keyword: &str) -> Result<Vec<IndexEntry>> {
        let removed = self.remote.delete(keyword)?;
        if !removed.is_empty() {
            let mirrored = self.cache.delete(keyword).map(|_| ());
            self.observe(MirrorOp::Delete, mirrored);
        }
        Ok(removed)
    }

    fn add_export(&mut self, prompt: &Prompt) -> Result<Prompt> {
        let stored = self.remote.add_export(prompt)?;
        let mirrored = self.cache.add_export(&stored).map(|_| ());
        self.observe(MirrorOp::AddExport, mirrored);
        Ok(stored)
    }

    fn update_export(&mut self, prompt: &Prompt) -> Result<Prompt> {
        let stored = self.remote.update_export(prompt)?;
        let mirrored = self.cache.update_export(&stored).map(|_| ());
        self.observe(MirrorOp::UpdateExport, mirrored);
        Ok(stored)
    }

    fn get_exports(&self) -> Result<Vec<IndexEntry>> {
        self.read_through(
            MirrorOp::GetExports,
            |remote| remote.get_exports(),
            |cache| cache.get_exports(),
            |exports| self.mirror_exports(exports),
        )
    }
}

/// Build the cache index after a successful remote read.
///
/// Entries already cached keep their `last_updated`; the index timestamp only
/// advances when the set of locators changed.
pub(crate) fn reconcile_index(
    cached: &Index,
    prompts: &[Prompt],
    mode: Refresh,
    now: DateTime<Utc>,
) -> Index {
    let mut next = match mode {
        Refresh::Replace => Index {
            entries: Vec::with_capacity(prompts.len()),
            exports: cached.exports.clone(),
            last_updated: cached.last_updated,
        },
        Refresh::Merge => cached.clone(),
    };

    for prompt in prompts {
        let stamp = cached
            .find_by_locator(Collection::Entries, &prompt.gist_url)
            .map(|e| e.last_updated)
            .unwrap_or(now);
        next.upsert(Collection::Entries, IndexEntry::from_prompt(prompt, stamp));
    }

    let unchanged = next.locators(Collection::Entries) == cached.locators(Collection::Entries);
    next.last_updated = if unchanged { cached.last_updated } else { now };
    next
}

pub(crate) fn reconcile_exports(cached: &Index, exports: &[IndexEntry], now: DateTime<Utc>) -> Index {
    let mut next = cached.clone();
    next.exports = exports.to_vec();
    let unchanged = next.locators(Collection::Exports) == cached.locators(Collection::Exports);
    if !unchanged {
        next.last_updated = now;
    }
    next
}
