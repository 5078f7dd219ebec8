use chrono::{TimeZone, Utc};
use promptstash::error::{ErrorKind, StashError};
use promptstash::model::{Collection, Prompt};
use promptstash::store::cache::CacheStore;
use promptstash::store::mem_backend::MemDocumentService;
use promptstash::store::remote::RemoteStore;
use promptstash::store::tiered::{MirrorObserver, MirrorOp, TieredStore};
use promptstash::store::{MirrorStore, PromptStore};
use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tempfile::TempDir;

type Store = TieredStore<RemoteStore<MemDocumentService>, CacheStore>;

struct TestEnv {
    _temp_dir: TempDir,
    cache_root: PathBuf,
    svc: MemDocumentService,
    store: Store,
}

impl TestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let cache_root = temp_dir.path().join("cache");
        Self::with_cache_root(temp_dir, cache_root)
    }

    fn with_cache_root(temp_dir: TempDir, cache_root: PathBuf) -> Self {
        let svc = MemDocumentService::new();
        let store = TieredStore::new(RemoteStore::new(svc.clone()), CacheStore::new(&cache_root));
        Self {
            _temp_dir: temp_dir,
            cache_root,
            svc,
            store,
        }
    }

    /// A second handle on the same cache directory for inspection.
    fn cache(&self) -> CacheStore {
        CacheStore::new(&self.cache_root)
    }
}

fn recording_observer() -> (Rc<RefCell<Vec<MirrorOp>>>, Box<dyn MirrorObserver>) {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    let observer = move |op: MirrorOp, _err: &StashError| sink.borrow_mut().push(op);
    (seen, Box::new(observer))
}

fn identities(prompts: &[Prompt]) -> Vec<(String, String, String)> {
    let mut ids: Vec<_> = prompts
        .iter()
        .map(|p| (p.name.clone(), p.author.clone(), p.gist_url.clone()))
        .collect();
    ids.sort();
    ids
}

#[test]
fn test_fallback_list_matches_last_remote_list() {
    let mut env = TestEnv::new();
    env.store.add(&Prompt::new("Review", "ada", "r")).unwrap();
    env.store.add(&Prompt::new("Summarize", "grace", "s")).unwrap();

    let online = env.store.list().unwrap();
    env.svc.set_offline(true);
    let offline = env.store.list().unwrap();

    assert_eq!(identities(&online), identities(&offline));
    assert!(offline.iter().all(|p| p.content.is_empty()));
}

#[test]
fn test_fallback_get_content_uses_mirrored_content() {
    let mut env = TestEnv::new();
    let added = env.store.add(&Prompt::new("Review", "ada", "body: 1\n")).unwrap();
    env.svc.set_offline(true);
    assert_eq!(env.store.get_content(&added.id).unwrap(), "body: 1\n");
}

#[test]
fn test_fallback_get_filters_cached_entries() {
    let mut env = TestEnv::new();
    env.store.add(&Prompt::new("Review", "ada", "r")).unwrap();
    env.store.add(&Prompt::new("Summarize", "grace", "s")).unwrap();
    env.store.list().unwrap();

    env.svc.set_auth_expired(true);
    let found = env.store.get("GRACE").unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name, "Summarize");
}

#[test]
fn test_refresh_keeps_cached_entry_timestamp() {
    let mut env = TestEnv::new();
    let added = env.store.add(&Prompt::new("X", "ada", "x")).unwrap();
    env.store.list().unwrap();

    // Pin a known timestamp in the cache.
    let t0 = Utc.with_ymd_and_hms(2023, 6, 1, 8, 30, 0).unwrap();
    let cache = env.cache();
    let mut index = cache.load_index().unwrap();
    index.entries[0].last_updated = t0;
    index.last_updated = t0;
    cache.save_index(&index).unwrap();

    env.store.list().unwrap();

    let refreshed = cache.load_index().unwrap();
    let entry = refreshed
        .find_by_locator(Collection::Entries, &added.gist_url)
        .unwrap();
    assert_eq!(entry.last_updated, t0);
    assert_eq!(refreshed.last_updated, t0);
}

#[test]
fn test_refresh_advances_timestamp_when_set_changes() {
    let mut env = TestEnv::new();
    env.store.add(&Prompt::new("X", "ada", "x")).unwrap();
    env.store.list().unwrap();

    let t0 = Utc.with_ymd_and_hms(2023, 6, 1, 8, 30, 0).unwrap();
    let cache = env.cache();
    let mut index = cache.load_index().unwrap();
    index.last_updated = t0;
    cache.save_index(&index).unwrap();

    // Added behind the decorator's back, so only the refresh sees it.
    let mut direct = RemoteStore::new(env.svc.clone());
    direct.add(&Prompt::new("Y", "ada", "y")).unwrap();
    env.store.list().unwrap();

    let refreshed = cache.load_index().unwrap();
    assert_eq!(refreshed.entries.len(), 2);
    assert!(refreshed.last_updated > t0);
}

#[test]
fn test_force_remote_never_returns_cached_data() {
    let mut env = TestEnv::new();
    let added = env.store.add(&Prompt::new("X", "ada", "x")).unwrap();
    env.store.list().unwrap();
    assert_eq!(env.cache().list().unwrap().len(), 1);

    let store = env.store.with_force_remote(true);
    env.svc.set_offline(true);

    let err = store.list().unwrap_err();
    assert!(matches!(err, StashError::RemoteOnly { .. }));
    assert_eq!(err.kind(), ErrorKind::Network);
    assert!(store.get("X").is_err());
    assert!(store.get_content(&added.id).is_err());
}

#[test]
fn test_both_tiers_failing_reports_both_causes() {
    let env = TestEnv::new();
    env.svc.set_offline(true);

    let err = env.store.list().unwrap_err();
    match err {
        StashError::Fallback { remote, cache } => {
            assert_eq!(remote.kind(), ErrorKind::Network);
            assert_eq!(cache.kind(), ErrorKind::Storage);
        }
        other => panic!("expected Fallback, got {other:?}"),
    }
}

#[test]
fn test_remote_nothing_to_show_is_not_masked_by_cache() {
    let env = TestEnv::new();
    let err = env.store.list().unwrap_err();
    assert!(err.is_nothing_to_show());
}

#[test]
fn test_remote_empty_collection_clears_cached_entries() {
    let mut env = TestEnv::new();
    let added = env.store.add(&Prompt::new("X", "ada", "x")).unwrap();

    // Removed by another client; the cache still lists it.
    let mut direct = RemoteStore::new(env.svc.clone());
    direct.delete(&added.id).unwrap();
    assert_eq!(env.cache().list().unwrap().len(), 1);

    assert_eq!(env.store.list().unwrap_err().kind(), ErrorKind::EmptyCollection);
    assert_eq!(env.cache().load_index().unwrap().entries.len(), 0);
}

#[test]
fn test_content_outage_during_list_keeps_offline_mirror() {
    let mut env = TestEnv::new();
    let a = env.store.add(&Prompt::new("Review", "ada", "r")).unwrap();
    let b = env.store.add(&Prompt::new("Summarize", "grace", "s")).unwrap();
    let online = env.store.list().unwrap();

    // Index readable, every content document failing.
    env.svc.set_unreachable(&a.id, true);
    env.svc.set_unreachable(&b.id, true);
    let during = env.store.list().unwrap();
    assert_eq!(identities(&during), identities(&online));
    assert_eq!(env.cache().load_index().unwrap().entries.len(), 2);

    env.svc.set_offline(true);
    let offline = env.store.list().unwrap();
    assert_eq!(identities(&offline), identities(&online));
}

#[test]
fn test_emptied_body_is_mirrored() {
    let mut env = TestEnv::new();
    let added = env.store.add(&Prompt::new("A", "ada", "old body")).unwrap();

    let mut emptied = added.clone();
    emptied.content = String::new();
    env.store.update(&emptied).unwrap();
    assert_eq!(env.cache().load_content(&added.id).unwrap(), "");

    env.svc.set_offline(true);
    assert_eq!(env.store.get_content(&added.id).unwrap(), "");
}

#[test]
fn test_write_failure_aborts_without_touching_cache() {
    let mut env = TestEnv::new();
    env.store.add(&Prompt::new("X", "ada", "x")).unwrap();
    let before = env.cache().load_index().unwrap();

    env.svc.set_offline(true);
    assert!(env.store.add(&Prompt::new("Y", "ada", "y")).is_err());
    assert!(env.store.delete("X").is_err());

    assert_eq!(env.cache().load_index().unwrap(), before);
}

#[test]
fn test_writes_are_mirrored() {
    let mut env = TestEnv::new();
    let added = env.store.add(&Prompt::new("X", "ada", "x1")).unwrap();
    let cache = env.cache();
    assert_eq!(cache.load_content(&added.id).unwrap(), "x1");

    let mut changed = added.clone();
    changed.content = "x2".to_string();
    changed.description = "second draft".to_string();
    env.store.update(&changed).unwrap();
    assert_eq!(cache.load_content(&added.id).unwrap(), "x2");
    assert_eq!(cache.load_index().unwrap().entries[0].description, "second draft");

    let exported = env.store.add_export(&Prompt::new("Pub", "ada", "p")).unwrap();
    assert_eq!(cache.get_exports().unwrap()[0].gist_url, exported.gist_url);

    env.store.delete(&added.id).unwrap();
    assert!(cache.load_index().unwrap().entries.is_empty());
    assert!(!cache.content_path(&added.id).exists());
}

#[test]
fn test_upsert_through_decorator_keeps_single_entry() {
    let mut env = TestEnv::new();
    env.store.add(&Prompt::new("A", "B", "x")).unwrap();
    env.store.add(&Prompt::new("A", "B", "y")).unwrap();

    let listed = env.store.list().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].content, "y");
    assert_eq!(env.cache().load_index().unwrap().entries.len(), 1);
}

#[test]
fn test_mirror_failures_are_observed_not_returned() {
    let temp_dir = TempDir::new().unwrap();
    // A regular file where the cache directory should be: every cache write fails.
    let blocker = temp_dir.path().join("not-a-dir");
    fs::write(&blocker, "x").unwrap();
    let cache_root = blocker.join("cache");

    let env = TestEnv::with_cache_root(temp_dir, cache_root);
    let (seen, observer) = recording_observer();
    let mut store = env.store.with_observer(observer);

    let added = store.add(&Prompt::new("X", "ada", "x")).unwrap();
    assert_eq!(store.list().unwrap().len(), 1);
    assert_eq!(store.get_content(&added.id).unwrap(), "x");

    assert_eq!(
        *seen.borrow(),
        vec![MirrorOp::Add, MirrorOp::List, MirrorOp::GetContent]
    );
}

#[test]
fn test_exports_fall_back_to_cache() {
    let mut env = TestEnv::new();
    env.store.add_export(&Prompt::new("Pub", "ada", "p")).unwrap();
    assert_eq!(env.store.get_exports().unwrap().len(), 1);

    env.svc.set_offline(true);
    assert_eq!(env.store.get_exports().unwrap().len(), 1);
}

#[test]
fn test_cache_info_through_decorator() {
    let mut env = TestEnv::new();
    env.store.add(&Prompt::new("X", "ada", "xyz")).unwrap();
    let info = env.store.cache_info();
    assert_eq!(info.total_prompts, 1);
    assert!(info.cache_size > 0);
    assert!(Path::new(&env.cache_root).join("index.json").exists());
}
