//! Multiplexer configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for a [`Multiplexer`](crate::mux::Multiplexer).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MuxConfig {
    /// Maximum number of concurrently open data channels. Opening another
    /// channel blocks until a slot frees up.
    #[serde(default = "default_max_data_channels")]
    pub max_data_channels: usize,

    /// How long a bounded channel waits for its response before giving up,
    /// in milliseconds.
    #[serde(default = "default_channel_timeout_ms")]
    pub channel_timeout_ms: u64,
}

fn default_max_data_channels() -> usize {
    50
}

fn default_channel_timeout_ms() -> u64 {
    30_000
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            max_data_channels: default_max_data_channels(),
            channel_timeout_ms: default_channel_timeout_ms(),
        }
    }
}

impl MuxConfig {
    /// Bounded channel timeout as a [`Duration`].
    pub fn channel_timeout(&self) -> Duration {
        Duration::from_millis(self.channel_timeout_ms)
    }
}
