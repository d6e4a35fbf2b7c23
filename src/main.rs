use clap::Parser;
use log::LevelFilter;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use picave_lib::error::{AppError, AppResult};
use picave_lib::index::{ContentIndex, VideoFeedItem};
use picave_lib::locator::{locate, DownloadState, Located};
use picave_lib::logger;
use picave_lib::monitor::CacheMonitor;
use picave_lib::profile::{self, Profile};
use picave_lib::FeedCache;

/// Keeps the training-video cache topped up in the background
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Profile file (default: ~/.picaverc)
    #[arg(short = 'p', long = "profile", value_name = "FILE")]
    profile: Option<PathBuf>,

    /// Print what is in the cache and exit without downloading
    #[arg(short = 's', long = "status")]
    status: bool,

    /// With --status, print JSON instead of a table
    #[arg(long = "json")]
    json: bool,

    /// Check that a video can be played and print its file
    #[arg(long = "play", value_name = "VIDEO_ID")]
    play: Option<String>,

    /// Print a random warm-up track from the profile's music directory
    #[arg(long = "warm-up")]
    warm_up: bool,

    /// Also write logs into this directory
    #[arg(short = 'l', long = "log-dir", value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// How often the cache is polled, in milliseconds
    #[arg(long = "poll-ms", value_name = "N", default_value_t = 1000)]
    poll_ms: u64,

    /// Increase logging verbosity (default: info, -v: debug, -vv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbosity: u8,
}

fn load_profile(path: Option<PathBuf>) -> AppResult<Profile> {
    let path = path.unwrap_or_else(profile::default_profile_path);
    match Profile::load(&path) {
        Ok(profile) => Ok(profile),
        Err(e) if e.is_not_found() => {
            log::info!("No profile at {}, using defaults", path.display());
            Ok(Profile::default_for(path))
        }
        Err(e) => Err(e),
    }
}

fn print_status(index: &ContentIndex, profile: &Profile, json: bool) -> AppResult<()> {
    let cache_dir = profile.cache_dir();
    let located: Vec<_> = index
        .items()
        .iter()
        .map(|item| (item, locate(&cache_dir, &item.id)))
        .collect();

    if json {
        let rows: Vec<serde_json::Value> = located
            .iter()
            .map(|(item, found)| status_row(item, found, profile.is_favourite(&item.id)))
            .collect();
        let music = profile.warm_up_music();
        let report = serde_json::json!({
            "cacheDirectory": cache_dir,
            "videos": rows,
            "warmUpTracks": music.as_ref().map(|m| m.len()),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Cache directory: {}", cache_dir.display());
    for (item, found) in &located {
        let star = if profile.is_favourite(&item.id) { "*" } else { " " };
        println!("{} {:<24} {:<16} {}", star, item.id, found.state.as_str(), item.name);
    }
    match profile.warm_up_music() {
        Some(music) => println!(
            "Warm-up music: {} track(s) in {}",
            music.len(),
            music.base_path().display()
        ),
        None => println!("Warm-up music: not configured"),
    }
    Ok(())
}

/// One video in the JSON status report; a path is only reported for playable files
fn status_row(item: &VideoFeedItem, found: &Located, favourite: bool) -> serde_json::Value {
    let path = match found.state {
        DownloadState::Downloaded => found.path.as_ref(),
        _ => None,
    };
    serde_json::json!({
        "id": item.id,
        "name": item.name,
        "state": found.state,
        "path": path,
        "favourite": favourite,
    })
}

fn pick_warm_up_track(profile: &Profile) -> AppResult<PathBuf> {
    let music = profile
        .warm_up_music()
        .ok_or_else(|| AppError::NotFound("no warm-up music directory configured".to_string()))?;
    music.pick_random().ok_or_else(|| {
        AppError::NotFound(format!(
            "no music files found in {}",
            music.base_path().display()
        ))
    })
}

fn check_playable(index: &ContentIndex, profile: &Profile, video_id: &str) -> AppResult<PathBuf> {
    let item = index
        .get(video_id)
        .ok_or_else(|| AppError::NotFound(format!("unknown video {}", video_id)))?;
    let located = locate(&profile.cache_dir(), &item.id);
    match located.path {
        Some(path) if located.state == DownloadState::Downloaded => Ok(path),
        _ => {
            log::warn!("Refusing to play {}: {}", item.id, located.state);
            Err(AppError::InvalidArgument(format!(
                "{} is not playable ({})",
                item.id, located.state
            )))
        }
    }
}

async fn run(args: Args) -> AppResult<()> {
    let profile = load_profile(args.profile)?;
    let index = Arc::new(ContentIndex::embedded()?);
    log::info!(
        "picave v{} started: {} video(s) in index",
        env!("CARGO_PKG_VERSION"),
        index.len()
    );

    if let Some(video_id) = args.play.as_deref() {
        let path = check_playable(&index, &profile, video_id)?;
        println!("{}", path.display());
        return Ok(());
    }

    if args.warm_up {
        let track = pick_warm_up_track(&profile)?;
        println!("{}", track.display());
        return Ok(());
    }

    if args.status {
        return print_status(&index, &profile, args.json);
    }

    let cache = Arc::new(FeedCache::from_profile(index, &profile));
    let monitor = CacheMonitor::new(Duration::from_millis(args.poll_ms));
    monitor.start(cache.clone()).await;

    tokio::signal::ctrl_c().await?;
    log::info!("Shutting down");

    monitor.stop().await;
    cache.stop_updating().await;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let level = match args.verbosity {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    if let Err(e) = logger::init_logging(args.log_dir.as_deref(), level) {
        eprintln!("Failed to initialise logging: {}", e);
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
