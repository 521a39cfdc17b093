//! Feed manager configuration.
//!
//! Settings live in the `[feed]` section of an INI file. Every key is
//! optional; missing keys keep their defaults. Durations are stored as
//! millisecond integers and exposed as [`Duration`]s.
//!
//! ```ini
//! [feed]
//! max_videos = 100
//! preload_ahead = 3
//! preload_behind = 1
//! max_retries = 3
//! hydration_timeout_ms = 10000
//! max_controllers = 8
//! memory_per_resource_bytes = 31457280
//! enable_memory_management = true
//! ```

use std::path::Path;
use std::time::Duration;

use ini::Ini;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{FeedError, FeedResult};
use crate::events::DEFAULT_EVENT_CHANNEL_CAPACITY;
use crate::retry::{
    RetryPolicy, DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_MAX_MS, DEFAULT_MAX_RETRIES,
};

/// INI section holding feed settings.
pub const FEED_SECTION: &str = "feed";

// =============================================================================
// Defaults
// =============================================================================

/// Default number of identities retained in the catalog.
pub const DEFAULT_MAX_VIDEOS: usize = 100;

/// Default number of videos preloaded ahead of the viewport.
pub const DEFAULT_PRELOAD_AHEAD: usize = 3;

/// Default number of videos preloaded behind the viewport.
pub const DEFAULT_PRELOAD_BEHIND: usize = 1;

/// Default upper bound on one resource open (10 seconds).
pub const DEFAULT_HYDRATION_TIMEOUT_MS: u64 = 10_000;

/// Default ceiling on concurrently open playback resources.
pub const DEFAULT_MAX_CONTROLLERS: usize = 8;

/// Default advisory memory cost of one open resource (30 MiB).
pub const DEFAULT_MEMORY_PER_RESOURCE_BYTES: u64 = 30 * 1024 * 1024;

/// Default share of `max_videos` kept around the viewport on memory pressure.
pub const DEFAULT_MEMORY_PRESSURE_KEEP_FRACTION: f64 = 0.7;

/// Preload window around the viewport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreloadRange {
    pub ahead: usize,
    pub behind: usize,
}

impl PreloadRange {
    pub fn new(ahead: usize, behind: usize) -> Self {
        Self { ahead, behind }
    }
}

impl Default for PreloadRange {
    fn default() -> Self {
        Self::new(DEFAULT_PRELOAD_AHEAD, DEFAULT_PRELOAD_BEHIND)
    }
}

/// Configuration for [`VideoFeedManager`](crate::manager::VideoFeedManager).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Maximum identities retained in the catalog.
    pub max_videos: usize,
    /// Videos preloaded ahead of the viewport by default.
    pub preload_ahead: usize,
    /// Videos preloaded behind the viewport by default.
    pub preload_behind: usize,
    /// Retries after the initial attempt before a video is permanently failed.
    pub max_retries: u32,
    /// Upper bound on one resource open.
    pub hydration_timeout_ms: u64,
    /// Hard ceiling on open plus opening playback resources.
    pub max_controllers: usize,
    /// Advisory memory cost of one open resource.
    pub memory_per_resource_bytes: u64,
    /// Release resources on memory pressure. When off, pressure is only counted.
    pub enable_memory_management: bool,
    /// Delay before the first retry.
    pub retry_backoff_base_ms: u64,
    /// Cap on the retry delay.
    pub retry_backoff_max_ms: u64,
    /// Share of `max_videos` kept around the viewport on memory pressure, in `(0, 1]`.
    pub memory_pressure_keep_fraction: f64,
    /// Capacity of the notification channel.
    pub event_channel_capacity: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            max_videos: DEFAULT_MAX_VIDEOS,
            preload_ahead: DEFAULT_PRELOAD_AHEAD,
            preload_behind: DEFAULT_PRELOAD_BEHIND,
            max_retries: DEFAULT_MAX_RETRIES,
            hydration_timeout_ms: DEFAULT_HYDRATION_TIMEOUT_MS,
            max_controllers: DEFAULT_MAX_CONTROLLERS,
            memory_per_resource_bytes: DEFAULT_MEMORY_PER_RESOURCE_BYTES,
            enable_memory_management: true,
            retry_backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            retry_backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            memory_pressure_keep_fraction: DEFAULT_MEMORY_PRESSURE_KEEP_FRACTION,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl FeedConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_videos(mut self, max_videos: usize) -> Self {
        self.max_videos = max_videos;
        self
    }

    pub fn with_preload_range(mut self, range: PreloadRange) -> Self {
        self.preload_ahead = range.ahead;
        self.preload_behind = range.behind;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_hydration_timeout(mut self, timeout: Duration) -> Self {
        self.hydration_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_max_controllers(mut self, max_controllers: usize) -> Self {
        self.max_controllers = max_controllers;
        self
    }

    pub fn with_memory_per_resource(mut self, bytes: u64) -> Self {
        self.memory_per_resource_bytes = bytes;
        self
    }

    pub fn with_memory_management(mut self, enabled: bool) -> Self {
        self.enable_memory_management = enabled;
        self
    }

    pub fn with_retry_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.retry_backoff_base_ms = base.as_millis() as u64;
        self.retry_backoff_max_ms = max.as_millis() as u64;
        self
    }

    pub fn with_memory_pressure_keep_fraction(mut self, fraction: f64) -> Self {
        self.memory_pressure_keep_fraction = fraction;
        self
    }

    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    pub fn hydration_timeout(&self) -> Duration {
        Duration::from_millis(self.hydration_timeout_ms)
    }

    pub fn preload_range(&self) -> PreloadRange {
        PreloadRange::new(self.preload_ahead, self.preload_behind)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.retry_backoff_base_ms),
            Duration::from_millis(self.retry_backoff_max_ms),
        )
    }

    /// Number of catalog entries kept around the viewport on memory pressure.
    pub fn memory_pressure_keep_count(&self) -> usize {
        (self.max_videos as f64 * self.memory_pressure_keep_fraction).floor() as usize
    }

    /// Check that the configuration is usable.
    pub fn validate(&self) -> FeedResult<()> {
        if self.max_videos == 0 {
            return Err(FeedError::Config("max_videos must be at least 1".into()));
        }
        if self.max_controllers == 0 {
            return Err(FeedError::Config("max_controllers must be at least 1".into()));
        }
        if self.hydration_timeout_ms == 0 {
            return Err(FeedError::Config(
                "hydration_timeout_ms must be greater than 0".into(),
            ));
        }
        if self.event_channel_capacity == 0 {
            return Err(FeedError::Config(
                "event_channel_capacity must be at least 1".into(),
            ));
        }
        if self.retry_backoff_base_ms > self.retry_backoff_max_ms {
            return Err(FeedError::Config(format!(
                "retry_backoff_base_ms ({}) exceeds retry_backoff_max_ms ({})",
                self.retry_backoff_base_ms, self.retry_backoff_max_ms
            )));
        }
        let fraction = self.memory_pressure_keep_fraction;
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(FeedError::Config(format!(
                "memory_pressure_keep_fraction must be in (0, 1], got {fraction}"
            )));
        }
        Ok(())
    }

    /// Load and validate settings from an INI file.
    pub fn load(path: &Path) -> FeedResult<Self> {
        let ini = Ini::load_from_file(path)
            .map_err(|e| FeedError::Config(format!("{}: {e}", path.display())))?;
        Self::from_ini(&ini)
    }

    /// Parse and validate settings from INI text.
    pub fn from_ini_str(text: &str) -> FeedResult<Self> {
        let ini = Ini::load_from_str(text).map_err(|e| FeedError::Config(e.to_string()))?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> FeedResult<Self> {
        let mut config = Self::default();
        let Some(section) = ini.section(Some(FEED_SECTION)) else {
            config.validate()?;
            return Ok(config);
        };

        for (key, value) in section.iter() {
            let value = value.trim();
            match key {
                "max_videos" => config.max_videos = parse(key, value)?,
                "preload_ahead" => config.preload_ahead = parse(key, value)?,
                "preload_behind" => config.preload_behind = parse(key, value)?,
                "max_retries" => config.max_retries = parse(key, value)?,
                "hydration_timeout_ms" => config.hydration_timeout_ms = parse(key, value)?,
                "max_controllers" => config.max_controllers = parse(key, value)?,
                "memory_per_resource_bytes" => {
                    config.memory_per_resource_bytes = parse(key, value)?
                }
                "enable_memory_management" => {
                    config.enable_memory_management = parse_bool(key, value)?
                }
                "retry_backoff_base_ms" => config.retry_backoff_base_ms = parse(key, value)?,
                "retry_backoff_max_ms" => config.retry_backoff_max_ms = parse(key, value)?,
                "memory_pressure_keep_fraction" => {
                    config.memory_pressure_keep_fraction = parse(key, value)?
                }
                "event_channel_capacity" => config.event_channel_capacity = parse(key, value)?,
                other => warn!(key = other, "Ignoring unknown [feed] setting"),
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as an INI document.
    pub fn to_ini_string(&self) -> String {
        let mut ini = Ini::new();
        ini.with_section(Some(FEED_SECTION))
            .set("max_videos", self.max_videos.to_string())
            .set("preload_ahead", self.preload_ahead.to_string())
            .set("preload_behind", self.preload_behind.to_string())
            .set("max_retries", self.max_retries.to_string())
            .set("hydration_timeout_ms", self.hydration_timeout_ms.to_string())
            .set("max_controllers", self.max_controllers.to_string())
            .set(
                "memory_per_resource_bytes",
                self.memory_per_resource_bytes.to_string(),
            )
            .set(
                "enable_memory_management",
                self.enable_memory_management.to_string(),
            )
            .set("retry_backoff_base_ms", self.retry_backoff_base_ms.to_string())
            .set("retry_backoff_max_ms", self.retry_backoff_max_ms.to_string())
            .set(
                "memory_pressure_keep_fraction",
                self.memory_pressure_keep_fraction.to_string(),
            )
            .set(
                "event_channel_capacity",
                self.event_channel_capacity.to_string(),
            );

        let mut out = Vec::new();
        // Writing into a Vec cannot fail.
        let _ = ini.write_to(&mut out);
        String::from_utf8_lossy(&out).into_owned()
    }
}

fn parse<T>(key: &str, value: &str) -> FeedResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| FeedError::Config(format!("invalid value for {key} ({value:?}): {e}")))
}

fn parse_bool(key: &str, value: &str) -> FeedResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(FeedError::Config(format!(
            "invalid value for {key} ({value:?}): expected true or false"
        ))),
    }
}
