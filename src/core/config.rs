use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::core::error::{PlayerError, Result};

/// Pipeline tuning knobs
///
/// Every field has a default, so a config file only needs the values it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Video packet queue capacity; a full queue blocks the demuxer (backpressure)
    pub video_packet_queue: usize,
    /// Audio packet queue capacity
    pub audio_packet_queue: usize,
    /// Decoded pictures waiting for the scheduler; 0 means rendezvous hand-off
    pub picture_queue: usize,
    /// Decoded audio samples waiting for the output pump
    pub audio_sample_queue: usize,
    /// Seed for the last accepted inter-frame delay
    pub initial_frame_delay_ms: u64,
    /// Lower bound of the pacing timer
    pub min_frame_delay_ms: u64,
    /// Retry timer when no picture is ready
    pub retry_poll_ms: u64,
    /// Delay before the first pacing tick
    pub first_refresh_ms: u64,
    /// Inter-frame deltas at or above this are treated as discontinuities
    pub max_frame_delay_secs: f64,
    /// Channel count requested from the audio sink
    pub output_channels: u16,
    /// Start in Playing rather than Paused
    pub autoplay: bool,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            video_packet_queue: 200,
            audio_packet_queue: 150,
            picture_queue: 4,
            audio_sample_queue: 1000,
            initial_frame_delay_ms: 40,
            min_frame_delay_ms: 10,
            retry_poll_ms: 1,
            first_refresh_ms: 20,
            max_frame_delay_secs: 1.0,
            output_channels: 2,
            autoplay: true,
        }
    }
}

impl PlayerConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| PlayerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| PlayerError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.video_packet_queue == 0 || self.audio_packet_queue == 0 {
            return Err(PlayerError::Config("packet queues need a non-zero capacity".to_string()));
        }
        if self.audio_sample_queue == 0 {
            return Err(PlayerError::Config("audio_sample_queue must be non-zero".to_string()));
        }
        if !(self.max_frame_delay_secs > 0.0) {
            return Err(PlayerError::Config("max_frame_delay_secs must be positive".to_string()));
        }
        if self.output_channels == 0 {
            return Err(PlayerError::Config("output_channels must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn initial_frame_delay(&self) -> Duration {
        Duration::from_millis(self.initial_frame_delay_ms)
    }

    pub fn min_frame_delay(&self) -> Duration {
        Duration::from_millis(self.min_frame_delay_ms)
    }

    pub fn retry_poll(&self) -> Duration {
        Duration::from_millis(self.retry_poll_ms)
    }

    pub fn first_refresh(&self) -> Duration {
        Duration::from_millis(self.first_refresh_ms)
    }
}
