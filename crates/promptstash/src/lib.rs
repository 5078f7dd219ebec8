//! # promptstash Architecture
//!
//! promptstash stores prompts (name, author, description, tags and a free-form
//! body) in a hosted per-user document service and mirrors them to a local
//! disk cache so they stay readable offline.
//!
//! This crate is the **storage engine** only. Argument parsing, terminal UI,
//! YAML authoring and the login flow live elsewhere and talk to the engine
//! through [`store::PromptStore`].
//!
//! ## Layers
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  TieredStore (store/tiered.rs)                              │
//! │  - Remote first, cache fallback for reads                   │
//! │  - Mirrors every successful remote op into the cache        │
//! └─────────────────────────────────────────────────────────────┘
//!                │                                │
//!                ▼                                ▼
//! ┌───────────────────────────────┐  ┌──────────────────────────┐
//! │  RemoteStore (store/remote.rs)│  │  CacheStore              │
//! │  - Index document + one       │  │  (store/cache.rs)        │
//! │    content document per prompt│  │  - index.json +          │
//! │  - Conditional index writes   │  │    prompts/{id}.yaml     │
//! └───────────────────────────────┘  │  - Atomic writes         │
//!                │                   └──────────────────────────┘
//!                ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  DocumentService (store/documents.rs)                       │
//! │  - HttpDocumentService (production), MemDocumentService     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency
//!
//! One logical operation per invocation, plain blocking calls. Every outbound
//! request has a fixed timeout ([`config::REQUEST_TIMEOUT`]). The cache assumes
//! a single writer; atomic renames keep it point-in-time consistent.
//!
//! ## Module Overview
//!
//! - [`store`]: the `PromptStore` contract and its three implementations
//! - [`model`]: `Prompt`, `IndexEntry`, `Index`, `CacheInfo`
//! - [`config`]: layered configuration and cache-root resolution
//! - [`error`]: error taxonomy

pub mod config;
pub mod error;
pub mod model;
pub mod store;

use config::StashConfig;
use error::Result;
use secrecy::SecretString;
use store::cache::CacheStore;
use store::http_backend::HttpDocumentService;
use store::remote::RemoteStore;
use store::tiered::TieredStore;

pub type DefaultStore = TieredStore<RemoteStore<HttpDocumentService>, CacheStore>;

/// Assemble the production engine from configuration and an already-acquired
/// bearer token.
pub fn connect(config: &StashConfig, token: SecretString) -> Result<DefaultStore> {
    let service = HttpDocumentService::new(&config.api_url, token)?;
    let remote = RemoteStore::new(service).with_max_attempts(config.conflict_retries);
    let cache = CacheStore::new(config.cache_root()?);
    Ok(TieredStore::new(remote, cache).with_force_remote(config.force_remote))
}
