//! Feed cache: which index items are on disk, which are being fetched, and the
//! single background worker that fetches the rest.
//!
//! The entry table is written by reconciliation and by the worker and read by
//! anything that polls it (the UI, the monitor). All access goes through a
//! mutex that is never held across an await point; readers get owned copies.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::download::{DownloadRunner, Worker, WorkerHandles, YtDlpRunner};
use crate::index::ContentIndex;
use crate::locator::{locate, DownloadState, Located};
use crate::profile::{Executable, Profile, DOWNLOADER_EXE};

/// What the cache needs from the profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub cache_dir: PathBuf,
    pub downloader: Executable,
}

impl CacheConfig {
    pub fn from_profile(profile: &Profile) -> Self {
        Self {
            cache_dir: profile.cache_dir(),
            downloader: profile.executable(DOWNLOADER_EXE),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub id: String,
    pub state: DownloadState,
    /// Playable file; present only when `state` is `Downloaded`
    pub path: Option<PathBuf>,
}

/// Consistent copy of the whole table, in index order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSnapshot {
    pub base_dir_exists: bool,
    pub entries: Vec<CacheEntry>,
}

impl CacheSnapshot {
    pub fn get(&self, id: &str) -> Option<&CacheEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn count(&self, state: DownloadState) -> usize {
        self.entries.iter().filter(|e| e.state == state).count()
    }
}

pub(crate) struct EntryTable {
    pub base_dir_exists: bool,
    pub entries: Vec<CacheEntry>,
}

impl EntryTable {
    pub fn state_at(&self, position: usize) -> Option<DownloadState> {
        self.entries.get(position).map(|e| e.state)
    }

    pub fn set_state(&mut self, position: usize, state: DownloadState) {
        if let Some(entry) = self.entries.get_mut(position) {
            entry.state = state;
            if state != DownloadState::Downloaded {
                entry.path = None;
            }
        }
    }

    pub fn apply(&mut self, position: usize, located: Located) {
        if let Some(entry) = self.entries.get_mut(position) {
            entry.state = located.state;
            entry.path = match located.state {
                DownloadState::Downloaded => located.path,
                _ => None,
            };
        }
    }
}

pub(crate) type SharedEntries = Arc<Mutex<EntryTable>>;

pub(crate) fn lock_entries(entries: &Mutex<EntryTable>) -> MutexGuard<'_, EntryTable> {
    // A panic elsewhere never leaves the table half-written, so keep serving it
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct FeedCache {
    index: Arc<ContentIndex>,
    config: CacheConfig,
    runner: Arc<dyn DownloadRunner>,
    entries: SharedEntries,
    cancel_tx: watch::Sender<bool>,
    runtime: Option<Handle>,
    workers: Mutex<Option<WorkerHandles>>,
}

impl FeedCache {
    /// Reconcile every index item against the cache directory, then start
    /// downloading whatever is missing if the directory exists.
    ///
    /// Workers run on the tokio runtime current at construction time.
    pub fn new(index: Arc<ContentIndex>, config: CacheConfig, runner: Arc<dyn DownloadRunner>) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        let entries = Arc::new(Mutex::new(EntryTable {
            base_dir_exists: false,
            entries: Vec::with_capacity(index.len()),
        }));
        let cache = Self {
            index,
            config,
            runner,
            entries,
            cancel_tx,
            runtime: Handle::try_current().ok(),
            workers: Mutex::new(None),
        };
        cache.refresh();
        if !cache.base_dir_exists() {
            log::warn!(
                "Video cache directory {} does not exist; downloads blocked",
                cache.config.cache_dir.display()
            );
        }
        cache
    }

    /// Cache driven by the profile's directory and the real downloader
    pub fn from_profile(index: Arc<ContentIndex>, profile: &Profile) -> Self {
        Self::new(index, CacheConfig::from_profile(profile), Arc::new(YtDlpRunner))
    }

    /// Re-check the directory and every item; start a worker if the directory
    /// exists and none is running.
    ///
    /// Safe to call from several threads at once: the worker slot stays locked
    /// from the liveness check until a new worker is stored.
    pub fn refresh(&self) {
        let mut workers = self.lock_workers();
        let base_dir_exists = self.config.cache_dir.is_dir();
        let worker_alive = workers.as_ref().map(|h| !h.is_finished()).unwrap_or(false);

        {
            // Locate under the lock; the worker may be finishing an item
            let mut table = lock_entries(&self.entries);
            let previous = std::mem::take(&mut table.entries);
            table.base_dir_exists = base_dir_exists;
            table.entries = self
                .index
                .items()
                .iter()
                .enumerate()
                .map(|(position, item)| {
                    let in_flight = worker_alive
                        && previous.get(position).map(|e| e.state) == Some(DownloadState::Downloading);
                    if in_flight {
                        return CacheEntry {
                            id: item.id.clone(),
                            state: DownloadState::Downloading,
                            path: None,
                        };
                    }
                    let found = locate(&self.config.cache_dir, &item.id);
                    let path = match found.state {
                        DownloadState::Downloaded => found.path,
                        _ => None,
                    };
                    CacheEntry {
                        id: item.id.clone(),
                        state: found.state,
                        path,
                    }
                })
                .collect();
        }

        if !base_dir_exists {
            log::debug!("Video cache directory {} still missing", self.config.cache_dir.display());
            return;
        }
        if !worker_alive && !self.is_stopped() {
            if let Some(handles) = self.spawn_worker() {
                *workers = Some(handles);
            }
        }
    }

    fn spawn_worker(&self) -> Option<WorkerHandles> {
        let Some(runtime) = &self.runtime else {
            log::error!("No async runtime available; background downloads disabled");
            return None;
        };
        let worker = Worker {
            index: self.index.clone(),
            cache_dir: self.config.cache_dir.clone(),
            downloader: self.config.downloader.clone(),
            runner: self.runner.clone(),
            entries: self.entries.clone(),
            cancel: self.cancel_tx.subscribe(),
        };
        Some(worker.spawn(runtime))
    }

    fn lock_workers(&self) -> MutexGuard<'_, Option<WorkerHandles>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cancel the worker, kill any running download and wait for both to finish.
    ///
    /// Safe to call more than once. No entry changes after this returns.
    pub async fn stop_updating(&self) {
        self.cancel_tx.send_replace(true);
        let handles = self.lock_workers().take();
        if let Some(handles) = handles {
            handles.join().await;
            log::info!("Background downloads stopped");
        }
    }

    fn is_stopped(&self) -> bool {
        *self.cancel_tx.borrow()
    }

    /// True while a background worker is alive
    pub fn is_updating(&self) -> bool {
        self.lock_workers()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    pub fn base_dir_exists(&self) -> bool {
        lock_entries(&self.entries).base_dir_exists
    }

    pub fn state(&self, id: &str) -> Option<DownloadState> {
        let position = self.index.position(id)?;
        lock_entries(&self.entries).state_at(position)
    }

    pub fn path(&self, id: &str) -> Option<PathBuf> {
        let position = self.index.position(id)?;
        lock_entries(&self.entries)
            .entries
            .get(position)
            .and_then(|e| e.path.clone())
    }

    /// Playable means fully downloaded; anything else must not be handed to a player
    pub fn is_playable(&self, id: &str) -> bool {
        self.state(id) == Some(DownloadState::Downloaded)
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        let table = lock_entries(&self.entries);
        CacheSnapshot {
            base_dir_exists: table.base_dir_exists,
            entries: table.entries.clone(),
        }
    }

    pub fn index(&self) -> &Arc<ContentIndex> {
        &self.index
    }

    pub fn cache_dir(&self) -> &Path {
        &self.config.cache_dir
    }
}

impl Drop for FeedCache {
    fn drop(&mut self) {
        // Tasks see the signal and wind down on their own
        self.cancel_tx.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::{DownloadInvocation, RunFuture};
    use crate::index::VideoFeedItem;

    struct NeverRunner;

    impl DownloadRunner for NeverRunner {
        fn run(&self, _invocation: DownloadInvocation, _cancel: watch::Receiver<bool>) -> RunFuture {
            panic!("no download expected");
        }
    }

    fn index(ids: &[&str]) -> Arc<ContentIndex> {
        let items = ids
            .iter()
            .map(|id| VideoFeedItem::new(*id, format!("https://example.com/{}", id)))
            .collect();
        Arc::new(ContentIndex::new(items, vec![]).unwrap())
    }

    fn config(dir: &Path) -> CacheConfig {
        CacheConfig {
            cache_dir: dir.to_path_buf(),
            downloader: Executable::new(DOWNLOADER_EXE, None),
        }
    }

    #[test]
    fn entry_table_only_keeps_path_when_downloaded() {
        let mut table = EntryTable {
            base_dir_exists: true,
            entries: vec![CacheEntry {
                id: "a".to_string(),
                state: DownloadState::NotDownloaded,
                path: None,
            }],
        };
        table.apply(
            0,
            Located {
                path: Some(PathBuf::from("/c/a.mp4")),
                state: DownloadState::DownloadBlocked,
            },
        );
        assert_eq!(table.entries[0].path, None);
        assert_eq!(table.state_at(0), Some(DownloadState::DownloadBlocked));

        table.apply(
            0,
            Located {
                path: Some(PathBuf::from("/c/a.mp4")),
                state: DownloadState::Downloaded,
            },
        );
        assert_eq!(table.entries[0].path, Some(PathBuf::from("/c/a.mp4")));

        table.set_state(0, DownloadState::NotDownloaded);
        assert_eq!(table.entries[0].path, None);
        assert_eq!(table.state_at(5), None);
    }

    #[test]
    fn construction_without_runtime_reconciles_but_never_downloads() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.mp4"), vec![0u8; 4096]).unwrap();

        let cache = FeedCache::new(index(&["a", "b"]), config(dir.path()), Arc::new(NeverRunner));
        assert!(cache.base_dir_exists());
        assert!(!cache.is_updating());
        assert_eq!(cache.state("a"), Some(DownloadState::Downloaded));
        assert_eq!(cache.path("a"), Some(dir.path().join("a.mp4")));
        assert!(cache.is_playable("a"));
        assert_eq!(cache.state("b"), Some(DownloadState::NotDownloaded));
        assert!(!cache.is_playable("b"));
        assert_eq!(cache.state("unknown"), None);
    }

    #[test]
    fn snapshot_lists_every_item_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FeedCache::new(
            index(&["z", "y", "x"]),
            config(&dir.path().join("missing")),
            Arc::new(NeverRunner),
        );
        let snapshot = cache.snapshot();
        let ids: Vec<&str> = snapshot.entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["z", "y", "x"]);
        assert!(!snapshot.base_dir_exists);
        assert_eq!(snapshot.count(DownloadState::DownloadBlocked), 3);
        assert_eq!(snapshot.get("y").unwrap().path, None);
    }
}
