use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};
use crate::musicdir::MusicDirectory;

pub const EXE_YOUTUBE_DL: &str = "youtube-dl";
pub const EXE_YT_DLP: &str = "yt-dlp";

/// Logical name the downloader is configured under
pub const DOWNLOADER_EXE: &str = EXE_YOUTUBE_DL;

/// Power levels keyed under this id apply to every video without its own entry
pub const DEFAULT_VIDEO_ID: &str = "default";

const DEFAULT_FTP: u32 = 200;

/// Where the profile lives when none is given on the command line
pub fn default_profile_path() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".picaverc"))
        .unwrap_or_else(|| PathBuf::from(".picaverc"))
}

/// An external tool, optionally pinned to a configured path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Executable {
    pub name: String,
    pub configured_path: Option<PathBuf>,
}

impl Executable {
    pub fn new(name: impl Into<String>, configured_path: Option<PathBuf>) -> Self {
        Self {
            name: name.into(),
            configured_path: configured_path.filter(|p| !p.as_os_str().is_empty()),
        }
    }

    /// Configured path if it exists, otherwise a PATH lookup of the name and its alternatives
    pub fn resolve(&self) -> Option<PathBuf> {
        if let Some(path) = &self.configured_path {
            return if path.exists() { Some(path.clone()) } else { None };
        }
        std::iter::once(self.name.as_str())
            .chain(alternatives_for(&self.name).iter().copied())
            .find_map(find_on_path)
    }
}

fn alternatives_for(name: &str) -> &'static [&'static str] {
    match name {
        EXE_YOUTUBE_DL => &[EXE_YT_DLP],
        _ => &[],
    }
}

fn find_on_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    find_in_dirs(name, std::env::split_paths(&path_var))
}

fn find_in_dirs(name: &str, dirs: impl IntoIterator<Item = PathBuf>) -> Option<PathBuf> {
    let bin_name = if cfg!(windows) {
        format!("{}.exe", name)
    } else {
        name.to_string()
    };
    dirs.into_iter()
        .map(|dir| dir.join(&bin_name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutableConfig {
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MaxPowerLevel {
    #[default]
    NoValue,
    Absolute(u32),
    PercentFtp(u32),
}

impl MaxPowerLevel {
    fn parse(text: &str) -> Self {
        let text = text.trim();
        if let Some(pct) = text.strip_suffix('%') {
            return pct
                .trim()
                .parse::<u32>()
                .map(MaxPowerLevel::PercentFtp)
                .unwrap_or(MaxPowerLevel::NoValue);
        }
        text.parse::<f64>()
            .map(|watts| MaxPowerLevel::Absolute(watts.max(0.0) as u32))
            .unwrap_or(MaxPowerLevel::NoValue)
    }

    fn is_none(&self) -> bool {
        *self == MaxPowerLevel::NoValue
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawMax {
    Number(f64),
    Text(String),
}

impl<'de> Deserialize<'de> for MaxPowerLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Option::<RawMax>::deserialize(deserializer)? {
            None => MaxPowerLevel::NoValue,
            Some(RawMax::Number(n)) => MaxPowerLevel::Absolute(n.max(0.0) as u32),
            Some(RawMax::Text(t)) => MaxPowerLevel::parse(&t),
        })
    }
}

impl Serialize for MaxPowerLevel {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            MaxPowerLevel::NoValue => serializer.serialize_none(),
            MaxPowerLevel::Absolute(w) => serializer.serialize_u32(*w),
            MaxPowerLevel::PercentFtp(p) => serializer.serialize_str(&format!("{}%", p)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerLevels {
    #[serde(rename = "FTP", default, skip_serializing_if = "is_zero")]
    pub ftp: u32,
    #[serde(rename = "MAX", default, skip_serializing_if = "MaxPowerLevel::is_none")]
    pub max: MaxPowerLevel,
}

fn is_zero(v: &u32) -> bool {
    *v == 0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(skip)]
    pub file_path: PathBuf,
    #[serde(default)]
    pub video_cache_directory: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warm_up_music_directory: Option<String>,
    #[serde(default)]
    pub executables: BTreeMap<String, ExecutableConfig>,
    #[serde(default)]
    pub favourites: Vec<String>,
    #[serde(default)]
    pub show_favourites_only: bool,
    #[serde(default)]
    pub power_levels: BTreeMap<String, PowerLevels>,
}

impl Profile {
    /// Fresh profile that will be saved to `file_path`
    pub fn default_for(file_path: impl Into<PathBuf>) -> Self {
        let mut profile = Self {
            file_path: file_path.into(),
            video_cache_directory: String::new(),
            warm_up_music_directory: None,
            executables: BTreeMap::new(),
            favourites: Vec::new(),
            show_favourites_only: false,
            power_levels: BTreeMap::new(),
        };
        profile.set_default_ftp(DEFAULT_FTP);
        profile
    }

    pub fn load(path: &Path) -> AppResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut profile: Profile = serde_json::from_str(&text).map_err(|e| {
            AppError::Profile(format!("failed to parse profile at {}: {}", path.display(), e))
        })?;
        profile.file_path = path.to_path_buf();
        Ok(profile)
    }

    pub fn save(&self) -> AppResult<()> {
        if let Some(parent) = self.file_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&self.file_path, format!("{}\n", json))?;
        Ok(())
    }

    pub fn cache_dir(&self) -> PathBuf {
        PathBuf::from(&self.video_cache_directory)
    }

    /// Scan the configured warm-up music directory; `None` when none is configured
    pub fn warm_up_music(&self) -> Option<MusicDirectory> {
        self.warm_up_music_directory
            .as_deref()
            .filter(|dir| !dir.trim().is_empty())
            .map(MusicDirectory::scan)
    }

    pub fn executable(&self, name: &str) -> Executable {
        let configured = self
            .executables
            .get(name)
            .map(|cfg| PathBuf::from(&cfg.path));
        Executable::new(name, configured)
    }

    pub fn set_executable_path(&mut self, name: &str, path: &str) {
        self.executables.insert(
            name.to_string(),
            ExecutableConfig {
                path: path.to_string(),
            },
        );
    }

    pub fn is_favourite(&self, video_id: &str) -> bool {
        self.favourites.iter().any(|f| f == video_id)
    }

    pub fn toggle_favourite(&mut self, video_id: &str) {
        if let Some(pos) = self.favourites.iter().position(|f| f == video_id) {
            self.favourites.remove(pos);
        } else {
            self.favourites.push(video_id.to_string());
        }
    }

    pub fn default_ftp(&self) -> Option<u32> {
        self.video_ftp(DEFAULT_VIDEO_ID, false)
    }

    pub fn set_default_ftp(&mut self, ftp: u32) {
        self.power_levels
            .entry(DEFAULT_VIDEO_ID.to_string())
            .or_default()
            .ftp = ftp;
    }

    /// FTP for a video; with `expand_default` falls back to the default entry
    pub fn video_ftp(&self, video_id: &str, expand_default: bool) -> Option<u32> {
        match self.power_levels.get(video_id) {
            Some(levels) if levels.ftp != 0 => Some(levels.ftp),
            _ if expand_default && video_id != DEFAULT_VIDEO_ID => self.default_ftp(),
            _ => None,
        }
    }

    /// Maximum power in watts for a video, resolving percentages against its FTP
    pub fn video_max_watts(&self, video_id: &str, expand_default: bool) -> Option<u32> {
        let max = self
            .power_levels
            .get(video_id)
            .map(|l| l.max)
            .unwrap_or_default();
        match max {
            MaxPowerLevel::Absolute(w) => Some(w),
            MaxPowerLevel::PercentFtp(pct) => self
                .video_ftp(video_id, expand_default)
                .map(|ftp| ftp * pct / 100),
            MaxPowerLevel::NoValue if expand_default && video_id != DEFAULT_VIDEO_ID => {
                self.video_max_watts(DEFAULT_VIDEO_ID, false)
            }
            MaxPowerLevel::NoValue => None,
        }
    }
}
