//! # Domain Model: Prompts and the Index
//!
//! A [`Prompt`] is the full record: metadata plus a free-form body. The body is
//! opaque to this crate; it is stored and returned byte-for-byte and never
//! parsed or re-serialized.
//!
//! The [`Index`] is the metadata-only view used for listing without fetching
//! every body. It holds one [`IndexEntry`] per live prompt and a separate list
//! of export entries for prompts published to the public channel.
//!
//! ## Identity
//!
//! A prompt is located by its `gist_url`, the canonical remote locator. Its
//! `id` is derived from that locator: the last path segment.
//!
//! ```text
//! https://gist.github.com/0f3a9c  ->  id "0f3a9c"
//! ```
//!
//! ## Index on disk and on the remote
//!
//! ```json
//! {
//!   "entries": [{"gistURL": "...", "filePath": "greeting.yaml", "author": "...",
//!                "name": "...", "lastUpdated": "2024-05-01T10:00:00Z"}],
//!   "exports": [],
//!   "lastUpdated": "2024-05-01T10:00:00Z"
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Extension used for content documents and their cached mirrors.
pub const CONTENT_EXT: &str = ".yaml";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub author: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "gistURL", default)]
    pub gist_url: String,
}

impl Prompt {
    pub fn new(name: impl Into<String>, author: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            author: author.into(),
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Case-insensitive substring match over name, author and id.
    pub fn matches_keyword(&self, keyword: &str) -> bool {
        let needle = keyword.to_lowercase();
        self.name.to_lowercase().contains(&needle)
            || self.author.to_lowercase().contains(&needle)
            || self.id.to_lowercase().contains(&needle)
    }

    /// File name of this prompt's content inside its remote document.
    pub fn file_name(&self) -> String {
        content_file_name(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    #[serde(rename = "gistURL")]
    pub gist_url: String,
    #[serde(rename = "filePath")]
    pub file_path: String,
    pub author: String,
    pub name: String,
    #[serde(rename = "lastUpdated")]
    pub last_updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
}

impl IndexEntry {
    pub fn from_prompt(prompt: &Prompt, last_updated: DateTime<Utc>) -> Self {
        Self {
            gist_url: prompt.gist_url.clone(),
            file_path: prompt.file_name(),
            author: prompt.author.clone(),
            name: prompt.name.clone(),
            last_updated,
            description: prompt.description.clone(),
            tags: prompt.tags.clone(),
            version: prompt.version.clone(),
        }
    }

    pub fn id(&self) -> &str {
        id_from_locator(&self.gist_url)
    }

    /// Substring match on the locator, exact match on the derived id.
    /// An empty keyword matches nothing.
    pub fn matches_locator(&self, keyword: &str) -> bool {
        !keyword.is_empty() && (self.gist_url.contains(keyword) || self.id() == keyword)
    }

    /// Metadata projection back into a prompt. The body is left empty.
    pub fn to_prompt(&self) -> Prompt {
        Prompt {
            id: self.id().to_string(),
            name: self.name.clone(),
            author: self.author.clone(),
            description: self.description.clone(),
            tags: self.tags.clone(),
            version: self.version.clone(),
            content: String::new(),
            gist_url: self.gist_url.clone(),
        }
    }

    pub fn into_prompt_with_content(self, content: String) -> Prompt {
        let mut prompt = self.to_prompt();
        prompt.content = content;
        prompt
    }
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

/// Which list of the index an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Entries,
    Exports,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    #[serde(default)]
    pub entries: Vec<IndexEntry>,
    #[serde(default)]
    pub exports: Vec<IndexEntry>,
    #[serde(rename = "lastUpdated", default = "epoch")]
    pub last_updated: DateTime<Utc>,
}

impl Default for Index {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            exports: Vec::new(),
            last_updated: epoch(),
        }
    }
}

impl Index {
    pub fn collection(&self, which: Collection) -> &Vec<IndexEntry> {
        match which {
            Collection::Entries => &self.entries,
            Collection::Exports => &self.exports,
        }
    }

    pub fn collection_mut(&mut self, which: Collection) -> &mut Vec<IndexEntry> {
        match which {
            Collection::Entries => &mut self.entries,
            Collection::Exports => &mut self.exports,
        }
    }

    pub fn find_by_identity(&self, which: Collection, name: &str, author: &str) -> Option<&IndexEntry> {
        self.collection(which)
            .iter()
            .find(|e| e.name == name && e.author == author)
    }

    pub fn find_by_locator(&self, which: Collection, gist_url: &str) -> Option<&IndexEntry> {
        self.collection(which).iter().find(|e| e.gist_url == gist_url)
    }

    pub fn find_by_id(&self, which: Collection, id: &str) -> Option<&IndexEntry> {
        self.collection(which).iter().find(|e| e.id() == id)
    }

    /// Replace the entry with the same locator, or append.
    pub fn upsert(&mut self, which: Collection, entry: IndexEntry) {
        let list = self.collection_mut(which);
        match list.iter_mut().find(|e| e.gist_url == entry.gist_url) {
            Some(existing) => *existing = entry,
            None => list.push(entry),
        }
    }

    /// Remove and return every entry matching `keyword` (see [`IndexEntry::matches_locator`]).
    pub fn remove_matching(&mut self, which: Collection, keyword: &str) -> Vec<IndexEntry> {
        let list = self.collection_mut(which);
        let (removed, kept): (Vec<_>, Vec<_>) =
            list.drain(..).partition(|e| e.matches_locator(keyword));
        *list = kept;
        removed
    }

    pub fn locators(&self, which: Collection) -> BTreeSet<&str> {
        self.collection(which)
            .iter()
            .map(|e| e.gist_url.as_str())
            .collect()
    }
}

/// Derived view over the local cache. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct CacheInfo {
    pub total_prompts: usize,
    pub cache_size: u64,
    pub last_updated: Option<DateTime<Utc>>,
}

pub fn id_from_locator(gist_url: &str) -> &str {
    gist_url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(gist_url)
}

/// Lowercase, dash-separated file stem for a prompt name.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.trim().chars() {
        if c.is_alphanumeric() || c == '_' || c == '.' {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        slug.push_str("prompt");
    }
    slug
}

pub fn content_file_name(name: &str) -> String {
    format!("{}{}", slugify(name), CONTENT_EXT)
}
