use crate::core::{
    Packet, PlayerError, Rational, Result, SinkFormat, StreamInfo, StreamKind,
};
use crate::player::decoder::{
    FfmpegAudioDecoder, FfmpegPictureConverter, FfmpegSampleConverter, FfmpegVideoDecoder,
};
use crate::player::demuxer_source::{
    AudioDecoder, InputFormat, MediaBackend, PictureConverter, SampleConverter, VideoDecoder,
};
use bytes::Bytes;
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, format, media};
use log::{debug, info};
use std::ops::RangeInclusive;
use std::path::Path;
use std::time::Duration;

/// libavcodec / libavformat major versions this adapter is built against (FFmpeg 4.x - 6.x)
const SUPPORTED_MAJORS: RangeInclusive<u32> = 58..=60;

/// FFmpeg-backed media library
pub struct FfmpegBackend;

impl FfmpegBackend {
    /// Initialize FFmpeg and check the linked library versions
    pub fn new() -> Result<Self> {
        ffmpeg::init().map_err(|e| PlayerError::OpenFailed(format!("FFmpeg init failed: {}", e)))?;

        let codec_major = codec::version() >> 16;
        let format_major = format::version() >> 16;
        info!(
            "FFmpeg libavcodec {}, libavformat {}",
            codec_major, format_major
        );
        if !SUPPORTED_MAJORS.contains(&codec_major) || !SUPPORTED_MAJORS.contains(&format_major) {
            return Err(PlayerError::OpenFailed(format!(
                "unsupported FFmpeg libraries: libavcodec {} / libavformat {} (need major {:?})",
                codec_major, format_major, SUPPORTED_MAJORS
            )));
        }

        Ok(Self)
    }
}

impl MediaBackend for FfmpegBackend {
    fn open_input(&self, path: &Path) -> Result<Box<dyn InputFormat>> {
        Ok(Box::new(FfmpegInput::open(path)?))
    }

    fn picture_converter(&self, stream: &StreamInfo) -> Result<Box<dyn PictureConverter>> {
        Ok(Box::new(FfmpegPictureConverter::new(stream)))
    }

    fn sample_converter(
        &self,
        stream: &StreamInfo,
        target: SinkFormat,
    ) -> Result<Box<dyn SampleConverter>> {
        Ok(Box::new(FfmpegSampleConverter::new(stream, target)))
    }
}

/// Opened container
pub struct FfmpegInput {
    input_ctx: format::context::Input,
    streams: Vec<StreamInfo>,
    source_path: String,
}

impl FfmpegInput {
    pub fn open(path: &Path) -> Result<Self> {
        info!("Opening file: {}", path.display());

        let input_ctx = format::input(path)
            .map_err(|e| PlayerError::OpenFailed(format!("{}: {}", path.display(), e)))?;

        let streams = input_ctx
            .streams()
            .map(|stream| stream_info(&stream))
            .collect::<Result<Vec<_>>>()?;

        for s in &streams {
            debug!(
                "stream #{} {:?} codec={} tb={}/{}",
                s.index, s.kind, s.codec, s.time_base.num, s.time_base.den
            );
        }

        Ok(Self {
            input_ctx,
            streams,
            source_path: path.display().to_string(),
        })
    }

    fn stream(&self, info: &StreamInfo) -> Result<format::stream::Stream<'_>> {
        self.input_ctx
            .stream(info.index)
            .ok_or_else(|| PlayerError::OpenFailed(format!("stream #{} vanished", info.index)))
    }
}

fn rational(r: ffmpeg::Rational) -> Rational {
    Rational::new(r.numerator(), r.denominator())
}

pub(crate) fn open_failed(info: &StreamInfo, e: ffmpeg::Error) -> PlayerError {
    PlayerError::OpenFailed(format!("stream #{} ({}): {}", info.index, info.codec, e))
}

fn stream_info(stream: &format::stream::Stream) -> Result<StreamInfo> {
    let params = stream.parameters();
    let kind = match params.medium() {
        media::Type::Video => StreamKind::Video,
        media::Type::Audio => StreamKind::Audio,
        _ => StreamKind::Other,
    };
    let codec_name = params.id().name().to_string();

    let mut info = StreamInfo {
        index: stream.index(),
        kind,
        codec: codec_name,
        time_base: rational(stream.time_base()),
        avg_frame_rate: None,
        duration: Some(stream.duration()).filter(|d| *d > 0),
        width: 0,
        height: 0,
        sample_rate: 0,
        channels: 0,
    };

    match kind {
        StreamKind::Video => {
            let decoder = codec::context::Context::from_parameters(params)
                .and_then(|ctx| ctx.decoder().video())
                .map_err(|e| open_failed(&info, e))?;
            info.width = decoder.width();
            info.height = decoder.height();
            info.avg_frame_rate = Some(rational(stream.avg_frame_rate()));
        }
        StreamKind::Audio => {
            let decoder = codec::context::Context::from_parameters(params)
                .and_then(|ctx| ctx.decoder().audio())
                .map_err(|e| open_failed(&info, e))?;
            info.sample_rate = decoder.rate();
            info.channels = decoder.channels();
        }
        StreamKind::Other => {}
    }

    Ok(info)
}

/// Owns the demuxed `AVPacket`; the payload is handed out without copying and freed
/// when the last `Bytes` view goes away.
struct AvPacketOwner(ffmpeg::Packet);

// the packet buffer is refcounted by FFmpeg and never touched through another handle
unsafe impl Send for AvPacketOwner {}

impl AsRef<[u8]> for AvPacketOwner {
    fn as_ref(&self) -> &[u8] {
        self.0.data().unwrap_or(&[])
    }
}

fn into_packet(packet: ffmpeg::Packet) -> Packet {
    let stream_index = packet.stream();
    let pts = packet.pts();
    let dts = packet.dts();
    let duration = packet.duration();
    let is_key = packet.is_key();
    Packet {
        stream_index,
        pts,
        dts,
        duration,
        is_key,
        data: Bytes::from_owner(AvPacketOwner(packet)),
    }
}

impl InputFormat for FfmpegInput {
    fn streams(&self) -> Vec<StreamInfo> {
        self.streams.clone()
    }

    fn duration(&self) -> Option<Duration> {
        // AV_TIME_BASE units (microseconds)
        let us = self.input_ctx.duration();
        (us > 0).then(|| Duration::from_micros(us as u64))
    }

    fn read_packet(&mut self) -> Result<Option<Packet>> {
        let mut packet = ffmpeg::Packet::empty();
        match packet.read(&mut self.input_ctx) {
            Ok(()) => Ok(Some(into_packet(packet))),
            Err(ffmpeg::Error::Eof) => Ok(None),
            Err(e) => Err(PlayerError::DecodeFailed(format!("read packet: {}", e))),
        }
    }

    fn open_video_decoder(&self, info: &StreamInfo) -> Result<Box<dyn VideoDecoder>> {
        let stream = self.stream(info)?;
        Ok(Box::new(FfmpegVideoDecoder::from_stream(stream)?))
    }

    fn open_audio_decoder(&self, info: &StreamInfo) -> Result<Box<dyn AudioDecoder>> {
        let stream = self.stream(info)?;
        Ok(Box::new(FfmpegAudioDecoder::from_stream(stream)?))
    }

    fn description(&self) -> String {
        format!("FFmpeg input: {}", self.source_path)
    }
}
