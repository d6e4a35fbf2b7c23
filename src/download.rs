use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::{ChildStderr, Command};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::cache::{lock_entries, SharedEntries};
use crate::error::{AppError, AppResult};
use crate::index::{ContentIndex, VideoFeedItem};
use crate::locator::{locate, DownloadState};
use crate::profile::Executable;

/// Create a Command that hides the console window on Windows
#[cfg(windows)]
pub fn create_hidden_command(program: &Path) -> Command {
    #[allow(unused_imports)]
    use std::os::windows::process::CommandExt;
    const CREATE_NO_WINDOW: u32 = 0x08000000;

    let mut cmd = Command::new(program);
    cmd.creation_flags(CREATE_NO_WINDOW);
    cmd
}

#[cfg(not(windows))]
pub fn create_hidden_command(program: &Path) -> Command {
    Command::new(program)
}

const NULL_DEVICE: &str = if cfg!(windows) { "NUL" } else { "/dev/null" };

/// One downloader run: program, full argument list, and where the file should land
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadInvocation {
    pub item_id: String,
    pub output_dir: PathBuf,
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl DownloadInvocation {
    pub fn new(program: PathBuf, cache_dir: &Path, item: &VideoFeedItem) -> Self {
        let output_template = format!(
            "{}/{}.%(ext)s",
            cache_dir.to_string_lossy().trim_end_matches('/'),
            item.id
        );
        let args = vec![
            "--quiet".to_string(),
            "--output".to_string(),
            output_template,
            "--download-archive".to_string(),
            NULL_DEVICE.to_string(),
            item.url.clone(),
        ];
        Self {
            item_id: item.id.clone(),
            output_dir: cache_dir.to_path_buf(),
            program,
            args,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded,
    /// Non-zero exit; `None` when the process was killed by a signal
    Failed(Option<i32>),
    Cancelled,
}

pub type RunFuture = Pin<Box<dyn Future<Output = AppResult<RunOutcome>> + Send + 'static>>;

/// Runs one download to completion.
///
/// Implementations must stop the download and resolve to `RunOutcome::Cancelled`
/// once `cancel` flips to `true`.
pub trait DownloadRunner: Send + Sync {
    fn run(&self, invocation: DownloadInvocation, cancel: watch::Receiver<bool>) -> RunFuture;
}

/// Runs the real youtube-dl / yt-dlp executable
#[derive(Debug, Default, Clone, Copy)]
pub struct YtDlpRunner;

impl DownloadRunner for YtDlpRunner {
    fn run(&self, invocation: DownloadInvocation, cancel: watch::Receiver<bool>) -> RunFuture {
        Box::pin(run_downloader(invocation, cancel))
    }
}

async fn run_downloader(
    invocation: DownloadInvocation,
    cancel_rx: watch::Receiver<bool>,
) -> AppResult<RunOutcome> {
    let mut child = create_hidden_command(&invocation.program)
        .args(&invocation.args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            AppError::YtDlp(format!(
                "Failed to spawn {}: {}",
                invocation.program.display(),
                e
            ))
        })?;

    let stderr_handle = drain_stderr(child.stderr.take(), invocation.item_id.clone());

    tokio::select! {
        result = child.wait() => {
            // The pipe closes once the process has exited, so this ends
            let last_line = stderr_handle.await.ok().flatten();
            match result {
                Ok(status) if status.success() => Ok(RunOutcome::Succeeded),
                Ok(status) => {
                    if let Some(line) = last_line {
                        log::warn!("[{}] {}", invocation.item_id, line);
                    }
                    Ok(RunOutcome::Failed(status.code()))
                }
                Err(e) => Err(AppError::Download(format!("downloader process error: {}", e))),
            }
        }
        _ = wait_for_cancel(cancel_rx) => {
            stderr_handle.abort();
            let _ = child.kill().await;
            Ok(RunOutcome::Cancelled)
        }
    }
}

/// Log every stderr line at debug level; resolves to the last non-empty line
fn drain_stderr(stderr: Option<ChildStderr>, id: String) -> JoinHandle<Option<String>> {
    tokio::spawn(async move {
        use tokio::io::{AsyncBufReadExt, BufReader};
        let stderr = stderr?;
        let mut last_line = None;
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim_end();
            log::debug!("[{}] {}", id, line);
            if !line.is_empty() {
                last_line = Some(line.to_string());
            }
        }
        last_line
    })
}

pub(crate) async fn wait_for_cancel(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            // Channel closed, just wait forever
            std::future::pending::<()>().await;
        }
    }
}

// ────────────────────────────────────────────────── Worker ──────────────────────────────────────────────────

pub(crate) struct WorkerHandles {
    pub feeder: JoinHandle<()>,
    pub worker: JoinHandle<()>,
}

impl WorkerHandles {
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    pub async fn join(self) {
        if let Err(e) = self.feeder.await {
            log::warn!("Download feeder ended abnormally: {}", e);
        }
        if let Err(e) = self.worker.await {
            log::warn!("Download worker ended abnormally: {}", e);
        }
    }
}

/// Single background downloader draining the queue one item at a time
pub(crate) struct Worker {
    pub index: Arc<ContentIndex>,
    pub cache_dir: PathBuf,
    pub downloader: Executable,
    pub runner: Arc<dyn DownloadRunner>,
    pub entries: SharedEntries,
    pub cancel: watch::Receiver<bool>,
}

impl Worker {
    /// Queue every item that is not downloaded right now, then start draining
    pub fn spawn(self, handle: &Handle) -> WorkerHandles {
        let pending: Vec<usize> = {
            let table = lock_entries(&self.entries);
            table
                .entries
                .iter()
                .enumerate()
                .filter(|(_, e)| e.state == DownloadState::NotDownloaded)
                .map(|(position, _)| position)
                .collect()
        };
        log::info!(
            "Starting downloads into {}: {} item(s) queued",
            self.cache_dir.display(),
            pending.len()
        );

        let (queue_tx, queue_rx) = mpsc::channel::<usize>(1);
        let feeder = handle.spawn(feed_queue(pending, queue_tx, self.cancel.clone()));
        let worker = handle.spawn(self.run(queue_rx));
        WorkerHandles { feeder, worker }
    }

    /// Move `position` from `NotDownloaded` to `Downloading` in one critical section
    fn claim(&self, position: usize) -> bool {
        let mut table = lock_entries(&self.entries);
        if *self.cancel.borrow() || table.state_at(position) != Some(DownloadState::NotDownloaded) {
            return false;
        }
        table.set_state(position, DownloadState::Downloading);
        true
    }

    async fn run(self, mut queue: mpsc::Receiver<usize>) {
        loop {
            let position = tokio::select! {
                biased;
                _ = wait_for_cancel(self.cancel.clone()) => {
                    log::debug!("Download worker cancelled");
                    return;
                }
                next = queue.recv() => match next {
                    Some(position) => position,
                    None => {
                        log::info!("Download queue drained");
                        return;
                    }
                },
            };

            let Some(item) = self.index.items().get(position) else {
                continue;
            };
            if lock_entries(&self.entries).state_at(position) != Some(DownloadState::NotDownloaded) {
                log::debug!("Skipping {}: no longer waiting for download", item.id);
                continue;
            }

            let Some(program) = self.downloader.resolve() else {
                log::error!(
                    "No path configured for {}, and unable to find it on the PATH. Download not possible.",
                    self.downloader.name
                );
                return;
            };

            if !self.claim(position) {
                if *self.cancel.borrow() {
                    return;
                }
                log::debug!("Skipping {}: claimed or found elsewhere", item.id);
                continue;
            }
            log::info!("Downloading {} from {}", item.id, item.url);

            let invocation = DownloadInvocation::new(program, &self.cache_dir, item);
            match self.runner.run(invocation, self.cancel.clone()).await {
                Ok(RunOutcome::Succeeded) => {
                    let located = locate(&self.cache_dir, &item.id);
                    log::info!("Download of {} finished: {}", item.id, located.state);
                    lock_entries(&self.entries).apply(position, located);
                }
                Ok(RunOutcome::Failed(code)) => {
                    log::warn!("Download of {} failed (exit code {:?})", item.id, code);
                    lock_entries(&self.entries).set_state(position, DownloadState::NotDownloaded);
                }
                Ok(RunOutcome::Cancelled) => {
                    log::info!("Download of {} cancelled", item.id);
                    lock_entries(&self.entries).set_state(position, DownloadState::NotDownloaded);
                    return;
                }
                Err(e) => {
                    log::warn!("Download of {} failed: {}", item.id, e);
                    lock_entries(&self.entries).set_state(position, DownloadState::NotDownloaded);
                }
            }
        }
    }
}

async fn feed_queue(pending: Vec<usize>, queue: mpsc::Sender<usize>, cancel: watch::Receiver<bool>) {
    for position in pending {
        tokio::select! {
            biased;
            _ = wait_for_cancel(cancel.clone()) => return,
            sent = queue.send(position) => {
                if sent.is_err() {
                    // Worker has gone away
                    return;
                }
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn item(id: &str) -> VideoFeedItem {
        VideoFeedItem::new(id, format!("https://example.com/watch?v={}", id))
    }

    /// Run `script` through sh with the downloader arguments as $1..$6
    fn shell_invocation(dir: &Path, script: &str) -> DownloadInvocation {
        let mut invocation = DownloadInvocation::new(PathBuf::from("/bin/sh"), dir, &item("vid"));
        let mut args = vec!["-c".to_string(), script.to_string(), "sh".to_string()];
        args.append(&mut invocation.args);
        invocation.args = args;
        invocation
    }

    #[test]
    fn invocation_arguments() {
        let invocation = DownloadInvocation::new(
            PathBuf::from("/usr/bin/yt-dlp"),
            Path::new("/srv/cache/"),
            &item("abc"),
        );
        assert_eq!(
            invocation.args,
            vec![
                "--quiet",
                "--output",
                "/srv/cache/abc.%(ext)s",
                "--download-archive",
                "/dev/null",
                "https://example.com/watch?v=abc",
            ]
        );
        assert_eq!(invocation.item_id, "abc");
        assert_eq!(invocation.output_dir, PathBuf::from("/srv/cache/"));
    }

    #[tokio::test]
    async fn successful_run_writes_output() {
        let dir = tempfile::tempdir().unwrap();
        let script = r#"out=$(printf '%s' "$3" | sed 's/%(ext)s/mp4/'); head -c 2048 /dev/zero > "$out""#;
        let (_tx, rx) = watch::channel(false);
        let outcome = YtDlpRunner.run(shell_invocation(dir.path(), script), rx).await.unwrap();
        assert_eq!(outcome, RunOutcome::Succeeded);
        assert_eq!(locate(dir.path(), "vid").state, DownloadState::Downloaded);
    }

    #[tokio::test]
    async fn non_zero_exit_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (_tx, rx) = watch::channel(false);
        let outcome = YtDlpRunner.run(shell_invocation(dir.path(), "exit 3"), rx).await.unwrap();
        assert_eq!(outcome, RunOutcome::Failed(Some(3)));
    }

    #[tokio::test]
    async fn stderr_is_read_to_the_end_after_exit() {
        let mut child = Command::new("/bin/sh")
            .args(["-c", "i=0; while [ $i -lt 200 ]; do echo \"line $i\" >&2; i=$((i+1)); done; echo 'ERROR: final words' >&2; exit 1"])
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        let handle = drain_stderr(child.stderr.take(), "vid".to_string());
        let status = child.wait().await.unwrap();
        assert!(!status.success());
        assert_eq!(handle.await.unwrap().as_deref(), Some("ERROR: final words"));
    }

    #[tokio::test]
    async fn missing_program_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let invocation = DownloadInvocation::new(dir.path().join("no-such-tool"), dir.path(), &item("vid"));
        let (_tx, rx) = watch::channel(false);
        let err = YtDlpRunner.run(invocation, rx).await.unwrap_err();
        assert!(matches!(err, AppError::YtDlp(_)));
    }

    #[tokio::test]
    async fn cancel_kills_running_process() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = watch::channel(false);
        let run = YtDlpRunner.run(shell_invocation(dir.path(), "sleep 30"), rx);
        let task = tokio::spawn(run);
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send_replace(true);
        let outcome = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("cancelled run should finish promptly")
            .unwrap()
            .unwrap();
        assert_eq!(outcome, RunOutcome::Cancelled);
    }
}
