use crate::core::{
    AudioFrame, Image, Packet, PlayerError, Result, SinkFormat, StreamInfo, StreamKind, VideoFrame,
};
use bytes::Bytes;
use std::path::Path;
use std::time::Duration;

/// Entry point into a demuxing/decoding library
///
/// The pipeline only ever talks to media through these traits; the FFmpeg adapter lives
/// in `demuxer` / `decoder`, tests plug in scripted fakes.
pub trait MediaBackend: Send + Sync {
    /// Open a local media file
    fn open_input(&self, path: &Path) -> Result<Box<dyn InputFormat>>;

    /// Conversion context for pictures the presenter cannot take natively
    fn picture_converter(&self, stream: &StreamInfo) -> Result<Box<dyn PictureConverter>>;

    /// Conversion context from the decoder's sample layout to the sink format
    fn sample_converter(
        &self,
        stream: &StreamInfo,
        target: SinkFormat,
    ) -> Result<Box<dyn SampleConverter>>;
}

/// Opened input (container) handle
pub trait InputFormat: Send {
    fn streams(&self) -> Vec<StreamInfo>;

    /// Container-level duration, when known
    fn duration(&self) -> Option<Duration>;

    /// Read the next packet
    ///
    /// - Ok(Some(packet)): one packet
    /// - Ok(None): end of stream
    /// - Err(e): read error
    fn read_packet(&mut self) -> Result<Option<Packet>>;

    fn open_video_decoder(&self, stream: &StreamInfo) -> Result<Box<dyn VideoDecoder>>;

    fn open_audio_decoder(&self, stream: &StreamInfo) -> Result<Box<dyn AudioDecoder>>;

    /// For logs
    fn description(&self) -> String;
}

/// Send/receive codec protocol. `receive_frame` returns `Ok(None)` once the decoder
/// needs more input.
pub trait VideoDecoder: Send {
    fn send_packet(&mut self, packet: &Packet) -> Result<()>;
    fn receive_frame(&mut self) -> Result<Option<VideoFrame>>;
}

pub trait AudioDecoder: Send {
    fn send_packet(&mut self, packet: &Packet) -> Result<()>;
    fn receive_frame(&mut self) -> Result<Option<AudioFrame>>;
}

pub trait PictureConverter: Send {
    fn to_rgba(&mut self, frame: &VideoFrame) -> Result<Image>;
}

pub trait SampleConverter: Send {
    /// Packed signed 16-bit interleaved PCM in the target sink format
    fn to_pcm(&mut self, frame: &AudioFrame) -> Result<Bytes>;
}

/// Pick the first video and the first audio stream, in container order
pub fn resolve_streams(streams: &[StreamInfo]) -> Result<(StreamInfo, StreamInfo)> {
    let video = streams.iter().find(|s| s.kind == StreamKind::Video);
    let audio = streams.iter().find(|s| s.kind == StreamKind::Audio);
    match (video, audio) {
        (Some(video), Some(audio)) => Ok((video.clone(), audio.clone())),
        _ => Err(PlayerError::NoSuitableStreams),
    }
}
