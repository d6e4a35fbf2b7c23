use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::cache::{CacheSnapshot, FeedCache};
use crate::locator::DownloadState;

pub const DEFAULT_POLL_PERIOD: Duration = Duration::from_secs(1);

/// Background poller that keeps an eye on a feed cache.
///
/// Retries reconciliation while the cache directory is missing (e.g. a USB
/// stick not yet mounted) and logs every state change it sees.
pub struct CacheMonitor {
    is_running: Arc<Mutex<bool>>,
    period: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CacheMonitor {
    pub fn new(period: Duration) -> Self {
        Self {
            is_running: Arc::new(Mutex::new(false)),
            period: period.max(Duration::from_millis(10)),
            task: Mutex::new(None),
        }
    }

    /// Start polling `cache`; no-op if already running
    pub async fn start(&self, cache: Arc<FeedCache>) {
        let mut is_running = self.is_running.lock().await;
        if *is_running {
            return;
        }
        *is_running = true;
        drop(is_running);

        let is_running_clone = self.is_running.clone();
        let period = self.period;

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last = cache.snapshot();
            ticker.tick().await; // First tick is immediate, skip it

            loop {
                ticker.tick().await;

                if !*is_running_clone.lock().await {
                    break;
                }

                if !cache.base_dir_exists() {
                    cache.refresh();
                }

                let current = cache.snapshot();
                log_changes(&last, &current);
                last = current;
            }
        });
        *self.task.lock().await = Some(handle);
    }

    /// Stop polling and wait for the poll task to end
    pub async fn stop(&self) {
        {
            let mut is_running = self.is_running.lock().await;
            *is_running = false;
        }
        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
            let _ = handle.await;
        }
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.lock().await
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

impl Default for CacheMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_PERIOD)
    }
}

/// Per-item state transitions between two snapshots, in index order
pub fn state_changes(
    before: &CacheSnapshot,
    after: &CacheSnapshot,
) -> Vec<(String, Option<DownloadState>, DownloadState)> {
    let previous: HashMap<&str, DownloadState> = before
        .entries
        .iter()
        .map(|e| (e.id.as_str(), e.state))
        .collect();
    after
        .entries
        .iter()
        .filter_map(|e| {
            let old = previous.get(e.id.as_str()).copied();
            (old != Some(e.state)).then(|| (e.id.clone(), old, e.state))
        })
        .collect()
}

fn log_changes(before: &CacheSnapshot, after: &CacheSnapshot) {
    if before.base_dir_exists != after.base_dir_exists {
        if after.base_dir_exists {
            log::info!("Video cache directory is now available");
        } else {
            log::warn!("Video cache directory has gone away");
        }
    }
    for (id, old, new) in state_changes(before, after) {
        match old {
            Some(old) => log::info!("{}: {} -> {}", id, old, new),
            None => log::info!("{}: {}", id, new),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheEntry;

    fn snapshot(states: &[(&str, DownloadState)]) -> CacheSnapshot {
        CacheSnapshot {
            base_dir_exists: true,
            entries: states
                .iter()
                .map(|(id, state)| CacheEntry {
                    id: id.to_string(),
                    state: *state,
                    path: None,
                })
                .collect(),
        }
    }

    #[test]
    fn reports_only_changed_entries() {
        let before = snapshot(&[
            ("a", DownloadState::NotDownloaded),
            ("b", DownloadState::Downloaded),
        ]);
        let after = snapshot(&[
            ("a", DownloadState::Downloading),
            ("b", DownloadState::Downloaded),
            ("c", DownloadState::NotDownloaded),
        ]);
        let changes = state_changes(&before, &after);
        assert_eq!(
            changes,
            vec![
                (
                    "a".to_string(),
                    Some(DownloadState::NotDownloaded),
                    DownloadState::Downloading
                ),
                ("c".to_string(), None, DownloadState::NotDownloaded),
            ]
        );
        assert!(state_changes(&after, &after).is_empty());
    }

    #[test]
    fn period_has_a_floor() {
        assert_eq!(CacheMonitor::new(Duration::ZERO).period(), Duration::from_millis(10));
        assert_eq!(CacheMonitor::default().period(), DEFAULT_POLL_PERIOD);
    }
}
