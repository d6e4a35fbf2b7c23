//! Embedded content index: the catalog of training videos and the interval
//! plan that goes with each one.
//!
//! The index is loaded once and handed around as an `Arc<ContentIndex>`;
//! nothing here is global.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use crate::colours::Colour;
use crate::error::{AppError, AppResult};

const EMBEDDED_INDEX: &str = include_str!("data/index.json");
const EMBEDDED_SESSIONS: &str = include_str!("data/sessions.json");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VideoFeedItem {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub duration: String,
    #[serde(rename = "Type", default)]
    pub item_type: String,
}

impl VideoFeedItem {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            name: String::new(),
            date: String::new(),
            duration: String::new(),
            item_type: String::new(),
        }
    }
}

/// Target effort for one interval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalEffort {
    PercentFtp(u32),
    Max,
}

impl IntervalEffort {
    pub fn parse(text: &str) -> AppResult<Self> {
        let text = text.trim();
        if text == "MAX" {
            return Ok(IntervalEffort::Max);
        }
        let Some(number) = text.strip_suffix('%') else {
            return Err(AppError::Index(format!("unrecognised effort string: {}", text)));
        };
        number
            .trim_start()
            .parse::<u32>()
            .map(IntervalEffort::PercentFtp)
            .map_err(|e| AppError::Index(format!("invalid effort percentage '{}': {}", text, e)))
    }

    /// Target power in watts, given the rider's FTP and maximum power
    pub fn target_watts(&self, ftp: u32, max: u32) -> u32 {
        match self {
            IntervalEffort::PercentFtp(pct) => ftp * pct / 100,
            IntervalEffort::Max => max,
        }
    }
}

impl<'de> Deserialize<'de> for IntervalEffort {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        IntervalEffort::parse(&text).map_err(serde::de::Error::custom)
    }
}

/// Parse duration text such as "5m", "1m 30s", "1h5m" or "2.5m". Spaces are ignored.
pub fn parse_duration(text: &str) -> AppResult<Duration> {
    static RE_COMPONENT: OnceLock<regex::Regex> = OnceLock::new();
    let re = RE_COMPONENT
        .get_or_init(|| regex::Regex::new(r"(\d+(?:\.\d*)?|\.\d+)(ms|h|m|s)").expect("valid regex"));

    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Err(AppError::Index("empty duration".to_string()));
    }

    let mut total_secs = 0.0_f64;
    let mut consumed = 0;
    for cap in re.captures_iter(&compact) {
        let whole = cap.get(0).expect("group 0 always present");
        if whole.start() != consumed {
            break;
        }
        consumed = whole.end();
        let value: f64 = cap[1]
            .parse()
            .map_err(|_| AppError::Index(format!("invalid duration: {}", text)))?;
        total_secs += match &cap[2] {
            "h" => value * 3600.0,
            "m" => value * 60.0,
            "s" => value,
            _ => value / 1000.0,
        };
    }

    if consumed != compact.len() {
        return Err(AppError::Index(format!("invalid duration: {}", text)));
    }
    Ok(Duration::from_secs_f64(total_secs))
}

fn de_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    parse_duration(&text).map_err(serde::de::Error::custom)
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IntervalDefinition {
    pub name: String,
    #[serde(rename = "Type", default)]
    pub interval_type: String,
    #[serde(default)]
    pub cadence: u32,
    pub effort: IntervalEffort,
    #[serde(deserialize_with = "de_duration")]
    pub duration: Duration,
    pub color: Colour,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SessionDefinition {
    pub video_id: String,
    pub intervals: Vec<IntervalDefinition>,
}

impl SessionDefinition {
    pub fn total_duration(&self) -> Duration {
        self.intervals.iter().map(|i| i.duration).sum()
    }

    /// Interval active at `elapsed` into the session, with its start offset
    pub fn interval_at(&self, elapsed: Duration) -> Option<(Duration, &IntervalDefinition)> {
        let mut start = Duration::ZERO;
        for interval in &self.intervals {
            if elapsed < start + interval.duration {
                return Some((start, interval));
            }
            start += interval.duration;
        }
        None
    }
}

/// Read-only catalog of video items, in display/download order
#[derive(Debug, Clone)]
pub struct ContentIndex {
    items: Vec<VideoFeedItem>,
    positions: HashMap<String, usize>,
    sessions: HashMap<String, SessionDefinition>,
}

impl ContentIndex {
    /// Build an index, validating ids and source urls
    pub fn new(items: Vec<VideoFeedItem>, sessions: Vec<SessionDefinition>) -> AppResult<Self> {
        let mut positions = HashMap::with_capacity(items.len());
        for (position, item) in items.iter().enumerate() {
            validate_item(item)?;
            if positions.insert(item.id.clone(), position).is_some() {
                return Err(AppError::Index(format!("duplicate video id: {}", item.id)));
            }
        }

        let mut by_id = HashMap::with_capacity(sessions.len());
        for session in sessions {
            if !positions.contains_key(&session.video_id) {
                return Err(AppError::Index(format!(
                    "session defined for unknown video id: {}",
                    session.video_id
                )));
            }
            by_id.insert(session.video_id.clone(), session);
        }

        Ok(Self {
            items,
            positions,
            sessions: by_id,
        })
    }

    /// Parse an index and its sessions; every item must have a session
    pub fn from_json(index_json: &str, sessions_json: &str) -> AppResult<Self> {
        let items: Vec<VideoFeedItem> = serde_json::from_str(index_json)
            .map_err(|e| AppError::Index(format!("unable to parse index: {}", e)))?;
        let sessions: Vec<SessionDefinition> = serde_json::from_str(sessions_json)
            .map_err(|e| AppError::Index(format!("unable to parse sessions: {}", e)))?;
        let index = Self::new(items, sessions)?;
        if let Some(missing) = index.items.iter().find(|i| !index.sessions.contains_key(&i.id)) {
            return Err(AppError::Index(format!("no session defined for video {}", missing.id)));
        }
        Ok(index)
    }

    /// The catalog compiled into the binary
    pub fn embedded() -> AppResult<Self> {
        Self::from_json(EMBEDDED_INDEX, EMBEDDED_SESSIONS)
    }

    pub fn items(&self) -> &[VideoFeedItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.positions.get(id).copied()
    }

    pub fn get(&self, id: &str) -> Option<&VideoFeedItem> {
        self.position(id).map(|p| &self.items[p])
    }

    pub fn session(&self, id: &str) -> Option<&SessionDefinition> {
        self.sessions.get(id)
    }
}

fn validate_item(item: &VideoFeedItem) -> AppResult<()> {
    if item.id.trim().is_empty() {
        return Err(AppError::Index("video id cannot be empty".to_string()));
    }
    // ids become file names in the cache directory
    if item.id.contains(['/', '\\']) || item.id == "." || item.id == ".." {
        return Err(AppError::Index(format!("video id is not a valid file name: {}", item.id)));
    }
    let parsed = url::Url::parse(&item.url)
        .map_err(|e| AppError::Index(format!("invalid url for {}: {}", item.id, e)))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(AppError::Index(format!(
            "url for {} must be http or https: {}",
            item.id, item.url
        )));
    }
    Ok(())
}
