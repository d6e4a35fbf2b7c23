use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Files smaller than this are treated as truncated or placeholder downloads
pub const MIN_VIDEO_BYTES: u64 = 1024;

/// Extensions the players can handle; anything else yt-dlp leaves behind is ignored
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DownloadState {
    NotDownloaded,
    DownloadBlocked,
    Downloading,
    Downloaded,
}

impl DownloadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadState::NotDownloaded => "not downloaded",
            DownloadState::DownloadBlocked => "blocked",
            DownloadState::Downloading => "downloading",
            DownloadState::Downloaded => "downloaded",
        }
    }
}

impl std::fmt::Display for DownloadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    pub path: Option<PathBuf>,
    pub state: DownloadState,
}

impl Located {
    fn blocked() -> Self {
        Self {
            path: None,
            state: DownloadState::DownloadBlocked,
        }
    }

    fn missing() -> Self {
        Self {
            path: None,
            state: DownloadState::NotDownloaded,
        }
    }
}

/// Find the cached video for `item_id` under `base_dir`.
///
/// Never fails: an unusable base directory means blocked, anything that goes
/// wrong while searching means not downloaded.
pub fn locate(base_dir: &Path, item_id: &str) -> Located {
    match std::fs::metadata(base_dir) {
        Ok(meta) if meta.is_dir() => {}
        _ => return Located::blocked(),
    }

    let pattern = format!(
        "{}/{}.*",
        glob::Pattern::escape(&base_dir.to_string_lossy()),
        glob::Pattern::escape(item_id)
    );
    let matches = match glob::glob(&pattern) {
        Ok(paths) => paths,
        Err(e) => {
            log::debug!("Bad cache glob pattern {}: {}", pattern, e);
            return Located::missing();
        }
    };

    for entry in matches.flatten() {
        if !has_video_extension(&entry) {
            continue;
        }
        return match std::fs::metadata(&entry) {
            Ok(meta) if meta.len() < MIN_VIDEO_BYTES => Located {
                path: Some(entry),
                state: DownloadState::DownloadBlocked,
            },
            Ok(_) => Located {
                path: Some(entry),
                state: DownloadState::Downloaded,
            },
            Err(e) => {
                log::debug!("Unable to stat {}: {}", entry.display(), e);
                Located::missing()
            }
        };
    }

    Located::missing()
}

fn has_video_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| VIDEO_EXTENSIONS.contains(&e))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_file(dir: &Path, name: &str, size: usize) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, vec![0u8; size]).unwrap();
        path
    }

    #[test]
    fn missing_base_dir_is_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let located = locate(&dir.path().join("nope"), "abc");
        assert_eq!(located, Located::blocked());
        assert_eq!(locate(Path::new(""), "abc"), Located::blocked());
    }

    #[test]
    fn base_dir_that_is_a_file_is_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(dir.path(), "cache", 10);
        assert_eq!(locate(&file, "abc").state, DownloadState::DownloadBlocked);
    }

    #[test]
    fn no_match_is_not_downloaded() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "other.mp4", 5000);
        assert_eq!(locate(dir.path(), "abc"), Located::missing());
    }

    #[test]
    fn small_file_is_blocked_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "abc.mp4", (MIN_VIDEO_BYTES - 1) as usize);
        let located = locate(dir.path(), "abc");
        assert_eq!(located.state, DownloadState::DownloadBlocked);
        assert_eq!(located.path, Some(path));
    }

    #[test]
    fn file_at_threshold_is_downloaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "abc.mkv", MIN_VIDEO_BYTES as usize);
        let located = locate(dir.path(), "abc");
        assert_eq!(located.state, DownloadState::Downloaded);
        assert_eq!(located.path, Some(path));
    }

    #[test]
    fn unrecognised_extensions_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "abc.part", 5000);
        write_file(dir.path(), "abc.webm", 5000);
        write_file(dir.path(), "abc.mp4.ytdl", 5000);
        assert_eq!(locate(dir.path(), "abc"), Located::missing());

        let path = write_file(dir.path(), "abc.mp4", 5000);
        assert_eq!(locate(dir.path(), "abc").path, Some(path));
    }

    #[test]
    fn glob_characters_in_id_are_literal() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "a1.mp4", 5000);
        assert_eq!(locate(dir.path(), "a[1]").state, DownloadState::NotDownloaded);

        let path = write_file(dir.path(), "a[1].mp4", 5000);
        assert_eq!(locate(dir.path(), "a[1]").path, Some(path));
    }

    #[test]
    fn prefix_ids_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "abcd.mp4", 5000);
        assert_eq!(locate(dir.path(), "abc").state, DownloadState::NotDownloaded);
    }
}
