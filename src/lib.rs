pub mod cache;
pub mod colours;
pub mod download;
pub mod error;
pub mod index;
pub mod locator;
pub mod logger;
pub mod monitor;
pub mod musicdir;
pub mod profile;

pub use cache::{CacheConfig, CacheEntry, CacheSnapshot, FeedCache};
pub use download::{DownloadInvocation, DownloadRunner, RunFuture, RunOutcome, YtDlpRunner};
pub use error::{AppError, AppResult};
pub use index::{ContentIndex, SessionDefinition, VideoFeedItem};
pub use locator::{locate, DownloadState, Located};
pub use monitor::CacheMonitor;
pub use musicdir::MusicDirectory;
pub use profile::{Executable, Profile};
