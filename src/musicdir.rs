use rand::seq::SliceRandom;
use rand::Rng;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Files the warm-up player accepts
pub const MUSIC_EXTENSIONS: &[&str] = &["mp3", "mp4", "m4a"];

/// Every music file found under a directory, stored relative to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MusicDirectory {
    base_path: PathBuf,
    files: Vec<PathBuf>,
}

impl MusicDirectory {
    /// Walk `base_path` recursively. Unreadable entries are logged and skipped;
    /// a missing directory yields an empty collection.
    pub fn scan(base_path: impl Into<PathBuf>) -> Self {
        let base_path = base_path.into();
        let mut files = Vec::new();

        if base_path.is_dir() {
            let walker = WalkDir::new(&base_path)
                .follow_links(true)
                .sort_by_file_name()
                .into_iter();
            for entry in walker {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        log::warn!("Failed traversing {}: {}", base_path.display(), e);
                        continue;
                    }
                };
                if !entry.file_type().is_file() || !is_music_file(entry.path()) {
                    continue;
                }
                if let Ok(relative) = entry.path().strip_prefix(&base_path) {
                    files.push(relative.to_path_buf());
                }
            }
        } else {
            log::debug!("Music directory {} does not exist", base_path.display());
        }

        log::info!("Found {} warm-up track(s) in {}", files.len(), base_path.display());
        Self { base_path, files }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// True if the directory is present on disk right now
    pub fn exists(&self) -> bool {
        self.base_path.is_dir()
    }

    /// Relative paths, sorted by walk order
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Rescan in place, e.g. once removable media has been mounted
    pub fn refresh(&mut self) {
        *self = Self::scan(std::mem::take(&mut self.base_path));
    }

    /// Absolute path of a random track, or `None` when nothing was found
    pub fn pick_random(&self) -> Option<PathBuf> {
        self.pick_with(&mut rand::thread_rng())
    }

    pub fn pick_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<PathBuf> {
        self.files.choose(rng).map(|f| self.base_path.join(f))
    }
}

fn is_music_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| MUSIC_EXTENSIONS.contains(&e))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, b"x").unwrap();
    }

    #[test]
    fn empty_directory_has_no_tracks() {
        let dir = tempfile::tempdir().unwrap();
        let music = MusicDirectory::scan(dir.path());
        assert!(music.exists());
        assert!(music.is_empty());
        assert_eq!(music.pick_random(), None);
    }

    #[test]
    fn missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let music = MusicDirectory::scan(dir.path().join("usb"));
        assert!(!music.exists());
        assert!(music.is_empty());
    }

    #[test]
    fn finds_nested_files_relative_to_base() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.mp3"));
        touch(&dir.path().join("album").join("b.m4a"));
        touch(&dir.path().join("album").join("deeper").join("c.mp4"));

        let music = MusicDirectory::scan(dir.path());
        assert_eq!(
            music.files(),
            &[
                PathBuf::from("a.mp3"),
                Path::new("album").join("b.m4a"),
                Path::new("album").join("deeper").join("c.mp4"),
            ]
        );
    }

    #[test]
    fn filters_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("cover.jpg"));
        touch(&dir.path().join("notes.txt"));
        touch(&dir.path().join("track.MP3"));
        touch(&dir.path().join("track.flac"));
        touch(&dir.path().join("keep.mp3"));
        std::fs::create_dir_all(dir.path().join("folder.mp3")).unwrap();

        let music = MusicDirectory::scan(dir.path());
        assert_eq!(music.files(), &[PathBuf::from("keep.mp3")]);
    }

    #[test]
    fn pick_returns_absolute_path_of_a_track() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("one.mp3"));
        touch(&dir.path().join("two.mp3"));

        let music = MusicDirectory::scan(dir.path());
        let mut rng = StepRng::new(0, 0);
        assert_eq!(music.pick_with(&mut rng), Some(dir.path().join("one.mp3")));

        let picked = music.pick_random().unwrap();
        assert!(picked.starts_with(dir.path()));
        assert!(picked.is_file());
    }

    #[test]
    fn refresh_sees_new_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut music = MusicDirectory::scan(dir.path());
        assert!(music.is_empty());

        touch(&dir.path().join("late.m4a"));
        music.refresh();
        assert_eq!(music.len(), 1);
        assert_eq!(music.base_path(), dir.path());
    }
}
