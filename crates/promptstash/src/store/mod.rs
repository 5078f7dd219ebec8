//! # Storage Layer
//!
//! Every backend implements [`PromptStore`], so callers read and write prompts
//! through one interface no matter where the data lives.
//!
//! ## Tiers
//!
//! ```text
//! caller ──► TieredStore ──► RemoteStore<D: DocumentService>   (authoritative)
//!                  │
//!                  └───────► CacheStore                        (disk mirror)
//! ```
//!
//! - **Remote is truth.** Every write goes to the remote first. A remote
//!   failure aborts the write; the cache is a read fallback, never a write
//!   buffer.
//! - **The cache is always potentially stale.** It is refreshed after every
//!   successful remote operation, best-effort. Mirror failures are reported to
//!   a [`tiered::MirrorObserver`] and never reach the caller.
//! - **Reads degrade.** When the remote is unreachable, reads are answered from
//!   the cache unless `force_remote` is set.
//!
//! ## Implementations
//!
//! - [`remote::RemoteStore`]: the hosted document service, over any
//!   [`documents::DocumentService`] ([`http_backend::HttpDocumentService`] in
//!   production, [`mem_backend::MemDocumentService`] for tests).
//! - [`cache::CacheStore`]: the disk mirror. Also implements [`MirrorStore`].
//! - [`tiered::TieredStore`]: the remote-first policy composing the two.
//!
//! ## Cache Layout
//!
//! ```text
//! <cache root>/
//! ├── index.json          # serialized Index
//! └── prompts/
//!     └── {id}.yaml       # raw prompt content, byte-for-byte
//! ```

use crate::error::Result;
use crate::model::{Index, IndexEntry, Prompt};

pub mod cache;
pub mod documents;
pub mod http_backend;
pub mod mem_backend;
pub mod remote;
pub mod tiered;

/// Uniform contract for prompt storage backends.
pub trait PromptStore {
    /// All prompts derivable from the index.
    ///
    /// Fails with `NoIndex` on first use and `EmptyCollection` when no entry
    /// yields a prompt.
    fn list(&self) -> Result<Vec<Prompt>>;

    /// Case-insensitive substring search over name, author and id.
    fn get(&self, keyword: &str) -> Result<Vec<Prompt>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|p| p.matches_keyword(keyword))
            .collect())
    }

    /// Raw content text, exactly as stored.
    fn get_content(&self, id: &str) -> Result<String>;

    /// Create a prompt, or update the existing one with the same name and author.
    fn add(&mut self, prompt: &Prompt) -> Result<Prompt>;

    /// Replace the content and metadata at the prompt's existing locator.
    fn update(&mut self, prompt: &Prompt) -> Result<Prompt>;

    /// Delete every prompt whose locator contains `keyword` or whose id equals it.
    /// Returns the removed entries; zero matches is not an error.
    fn delete(&mut self, keyword: &str) -> Result<Vec<IndexEntry>>;

    fn add_export(&mut self, prompt: &Prompt) -> Result<Prompt>;

    fn update_export(&mut self, prompt: &Prompt) -> Result<Prompt>;

    fn get_exports(&self) -> Result<Vec<IndexEntry>>;
}

/// Raw index/content primitives of a mirror. No policy.
pub trait MirrorStore {
    fn load_index(&self) -> Result<Index>;

    /// MUST be atomic: readers never observe a half-written index.
    fn save_index(&self, index: &Index) -> Result<()>;

    fn load_content(&self, id: &str) -> Result<String>;

    /// MUST be atomic (write to tmp then rename).
    fn save_content(&self, id: &str, text: &str) -> Result<()>;

    /// Removing content that is not there is not an error.
    fn delete_content(&self, id: &str) -> Result<()>;
}
