// Playback pipeline

pub mod task;
pub mod demuxer_source; // media library traits
#[cfg(feature = "ffmpeg")]
pub mod demuxer; // FFmpeg input
#[cfg(feature = "ffmpeg")]
pub mod decoder; // FFmpeg codecs + sws/swr
pub mod demuxer_thread;
pub mod decode_thread;
pub mod audio_output;
pub mod scheduler;
pub mod events;
pub mod manager;

#[cfg(test)]
pub(crate) mod testing;

use std::process;
use std::thread;

pub use audio_output::{AudioBackend, AudioDevice, AudioPlayer};
#[cfg(feature = "cpal-sink")]
pub use audio_output::CpalAudio;
#[cfg(feature = "ffmpeg")]
pub use demuxer::FfmpegBackend;
pub use demuxer_source::{InputFormat, MediaBackend};
pub use events::{ChannelObserver, PlayerEvent, PlayerObserver};
pub use manager::Player;

pub(crate) fn log_ctx() -> String {
    let current = thread::current();
    format!(
        "[pid:{} tid:{:?} {}]",
        process::id(),
        current.id(),
        current.name().unwrap_or("-")
    )
}
