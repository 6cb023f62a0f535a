use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::core::image::Image;

/// Rational number as used by container time bases and frame rates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// 0.0 for a degenerate (zero / zero-denominator) value
    pub fn as_f64(&self) -> f64 {
        if self.num == 0 || self.den == 0 {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }

    pub fn is_valid(&self) -> bool {
        self.num > 0 && self.den > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Video,
    Audio,
    Other,
}

/// Description of one elementary stream inside the opened input
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub index: usize,
    pub kind: StreamKind,
    pub codec: String,
    pub time_base: Rational,
    /// Average frame rate; video only, when the container knows it
    pub avg_frame_rate: Option<Rational>,
    /// Duration in `time_base` units
    pub duration: Option<i64>,
    pub width: u32,
    pub height: u32,
    pub sample_rate: u32,
    pub channels: u16,
}

impl StreamInfo {
    /// Convert a timestamp in stream units to seconds
    pub fn ts_to_secs(&self, ts: i64) -> f64 {
        ts as f64 * self.time_base.as_f64()
    }

    /// Nominal spacing between two frames of this stream, in seconds
    pub fn frame_interval(&self) -> f64 {
        match self.avg_frame_rate {
            Some(rate) if rate.is_valid() => rate.den as f64 / rate.num as f64,
            _ => self.time_base.as_f64(),
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        let secs = self.ts_to_secs(self.duration?);
        (secs.is_finite() && secs > 0.0).then(|| Duration::from_secs_f64(secs))
    }
}

/// Compressed packet read from the input
///
/// Not `Clone`: the payload is released exactly once, when the packet is dropped.
#[derive(Debug)]
pub struct Packet {
    pub stream_index: usize,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub duration: i64,
    pub is_key: bool,
    pub data: Bytes,
}

impl Packet {
    pub fn new(stream_index: usize, pts: Option<i64>, data: Bytes) -> Self {
        Self {
            stream_index,
            pts,
            dts: pts,
            duration: 0,
            is_key: false,
            data,
        }
    }
}

/// Pixel layout of a decoded video frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PixelFormat {
    Yuv420p,
    Yuv422p,
    Yuv444p,
    Yuv440p,
    Yuv411p,
    Yuv410p,
    Rgba,
    /// Anything else, by backend name (e.g. "nv12", "yuv420p10le")
    Other(String),
}

#[derive(Debug, Clone)]
pub struct Plane {
    pub data: Bytes,
    pub stride: usize,
}

/// Raw decoded picture
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub planes: Vec<Plane>,
    /// Best-effort timestamp in stream units
    pub best_effort_timestamp: Option<i64>,
    /// Number of extra fields to repeat (interlaced / telecined content)
    pub repeat_pict: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    U8,
    I16,
    I32,
    F32,
    F64,
    U8Planar,
    I16Planar,
    I32Planar,
    F32Planar,
    F64Planar,
}

impl SampleFormat {
    pub fn is_planar(&self) -> bool {
        matches!(
            self,
            SampleFormat::U8Planar
                | SampleFormat::I16Planar
                | SampleFormat::I32Planar
                | SampleFormat::F32Planar
                | SampleFormat::F64Planar
        )
    }
}

/// Raw decoded audio
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub sample_rate: u32,
    pub channels: u16,
    /// Channel layout bit mask, 0 when the decoder did not report one
    pub channel_layout: u64,
    pub format: SampleFormat,
    /// Samples per channel
    pub samples: usize,
    pub planes: Vec<Bytes>,
    pub timestamp: Option<i64>,
}

/// Format the audio sink plays: packed signed 16-bit, interleaved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl SinkFormat {
    pub const BYTES_PER_SAMPLE: usize = 2;

    pub fn bytes_per_second(&self) -> f64 {
        self.sample_rate as f64 * self.channels as f64 * Self::BYTES_PER_SAMPLE as f64
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * Self::BYTES_PER_SAMPLE
    }
}

/// Decoded picture ready for presentation
#[derive(Debug, Clone)]
pub struct Picture {
    pub image: Arc<Image>,
    /// Presentation time, seconds on the stream clock
    pub pts: f64,
}

/// PCM chunk ready for the audio sink
#[derive(Debug, Clone)]
pub struct AudioSample {
    pub data: Bytes,
    pub pts: f64,
    pub num_samples: usize,
}

/// UI → pipeline commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Play,
    Pause,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
}
