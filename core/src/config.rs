/// Configuration management
use crate::error::{Result, SyncError};
use crate::scroll::DEFAULT_NEAR_BOTTOM_THRESHOLD;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const DEFAULT_TYPING_TTL: Duration = Duration::from_secs(5);
/// Longest accepted typing TTL
pub const MAX_TYPING_TTL: Duration = Duration::from_secs(600);
/// Longest accepted prune interval
pub const MAX_TYPING_TICK: Duration = Duration::from_secs(60);

/// Sync core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// How long a typing signal stays active without a refresh
    pub typing_ttl: Duration,

    /// How often expired typing signals are pruned
    pub typing_tick: Duration,

    /// Content units from the bottom that still count as "at the bottom"
    pub scroll_threshold: f64,

    /// Most recent outbound typing events kept while disconnected
    pub typing_buffer_capacity: usize,

    /// Capacity of the single-consumer event queue
    pub event_queue_capacity: usize,

    /// Re-fetch the open conversation's history after a reconnect
    pub refetch_on_reconnect: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            typing_ttl: DEFAULT_TYPING_TTL,
            typing_tick: Duration::from_millis(500),
            scroll_threshold: DEFAULT_NEAR_BOTTOM_THRESHOLD,
            typing_buffer_capacity: 8,
            event_queue_capacity: 256,
            refetch_on_reconnect: true,
        }
    }
}

impl SyncConfig {
    /// Create config from command line flags (program name first)
    pub fn from_args(args: &[String]) -> Result<Self> {
        // A config file is the base; flags and env override it
        let mut config = match args.iter().position(|a| a == "--config") {
            Some(i) => {
                let path = parse_flag::<String>(args, i, "--config")?;
                Self::from_json_file(Path::new(&path))?
            }
            None => Self::default(),
        };

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--typing-ttl-ms" => {
                    let ms = parse_flag::<u64>(args, i, "--typing-ttl-ms")?;
                    config.typing_ttl = Duration::from_millis(ms);
                    i += 2;
                }
                "--typing-tick-ms" => {
                    let ms = parse_flag::<u64>(args, i, "--typing-tick-ms")?;
                    config.typing_tick = Duration::from_millis(ms);
                    i += 2;
                }
                "--scroll-threshold" => {
                    config.scroll_threshold = parse_flag::<f64>(args, i, "--scroll-threshold")?;
                    i += 2;
                }
                "--typing-buffer" => {
                    config.typing_buffer_capacity = parse_flag::<usize>(args, i, "--typing-buffer")?;
                    i += 2;
                }
                "--config" => {
                    i += 2;
                }
                "--no-refetch" => {
                    config.refetch_on_reconnect = false;
                    i += 1;
                }
                _ => {
                    // Positional arguments belong to the caller
                    i += 1;
                }
            }
        }

        // Env overrides (nice for scripts)
        if let Some(ms) = std::env::var("CHATSYNC_TYPING_TTL_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            config.typing_ttl = Duration::from_millis(ms);
        }
        if let Some(t) = std::env::var("CHATSYNC_SCROLL_THRESHOLD")
            .ok()
            .and_then(|s| s.parse::<f64>().ok())
        {
            config.scroll_threshold = t;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.typing_ttl.is_zero() || self.typing_ttl > MAX_TYPING_TTL {
            return Err(SyncError::Config(format!(
                "typing TTL must be between 1ms and {}s",
                MAX_TYPING_TTL.as_secs()
            )));
        }
        if self.typing_tick.is_zero() || self.typing_tick > MAX_TYPING_TICK {
            return Err(SyncError::Config(format!(
                "typing tick must be between 1ms and {}s",
                MAX_TYPING_TICK.as_secs()
            )));
        }
        if !self.scroll_threshold.is_finite() || self.scroll_threshold < 0.0 {
            return Err(SyncError::Config(
                "scroll threshold must be a non-negative number".to_string(),
            ));
        }
        if self.event_queue_capacity == 0 {
            return Err(SyncError::Config("event queue capacity must be positive".to_string()));
        }
        Ok(())
    }

    /// Typing TTL as a chrono duration for timestamp arithmetic
    pub fn typing_ttl_chrono(&self) -> chrono::Duration {
        let ttl = self.typing_ttl.min(MAX_TYPING_TTL);
        chrono::Duration::milliseconds(ttl.as_millis() as i64)
    }
}

fn parse_flag<T: std::str::FromStr>(args: &[String], i: usize, flag: &str) -> Result<T> {
    let raw = args
        .get(i + 1)
        .ok_or_else(|| SyncError::Config(format!("{} requires a value", flag)))?;
    raw.parse::<T>()
        .map_err(|_| SyncError::Config(format!("{} got an invalid value: {}", flag, raw)))
}
