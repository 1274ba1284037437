use std::time::Duration;

pub const DEFAULT_BATCH_DELAY_MS: u64 = 1000;
pub const DEFAULT_LEGEND_AUTO_SELECT_DELAY_MS: u64 = 2000;
pub const DEFAULT_EVENT_BUFFER: usize = 64;

pub const BATCH_DELAY_ENV: &str = "MAPSYNC_BATCH_DELAY_MS";
pub const LEGEND_AUTO_SELECT_ENV: &str = "MAPSYNC_LEGEND_AUTO_SELECT_MS";
pub const EVENT_BUFFER_ENV: &str = "MAPSYNC_EVENT_BUFFER";

/// Tunables shared by every layer set of one map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerSetConfig {
    /// How long the batch propagator waits before flushing the latest snapshot.
    pub batch_delay: Duration,
    /// Grace period before the legend set picks an initial layer.
    pub legend_auto_select_delay: Duration,
    /// Capacity of each layer set's event broadcast channel.
    pub event_buffer: usize,
}

impl Default for LayerSetConfig {
    fn default() -> Self {
        Self {
            batch_delay: Duration::from_millis(DEFAULT_BATCH_DELAY_MS),
            legend_auto_select_delay: Duration::from_millis(DEFAULT_LEGEND_AUTO_SELECT_DELAY_MS),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl LayerSetConfig {
    pub fn from_env() -> Self {
        Self {
            batch_delay: batch_delay(),
            legend_auto_select_delay: legend_auto_select_delay(),
            event_buffer: event_buffer(),
        }
    }
}

pub fn batch_delay() -> Duration {
    std::env::var(BATCH_DELAY_ENV)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .map(Duration::from_millis)
        .unwrap_or_else(|| Duration::from_millis(DEFAULT_BATCH_DELAY_MS))
}

pub fn legend_auto_select_delay() -> Duration {
    std::env::var(LEGEND_AUTO_SELECT_ENV)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .map(Duration::from_millis)
        .unwrap_or_else(|| Duration::from_millis(DEFAULT_LEGEND_AUTO_SELECT_DELAY_MS))
}

pub fn event_buffer() -> usize {
    std::env::var(EVENT_BUFFER_ENV)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_EVENT_BUFFER)
}
