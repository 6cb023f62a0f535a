use crate::core::{
    AudioFrame, Image, Packet, PixelFormat, Plane, PlayerError, Result, SampleFormat, SinkFormat,
    StreamInfo, VideoFrame,
};
use crate::player::demuxer_source::{
    AudioDecoder, PictureConverter, SampleConverter, VideoDecoder,
};
use bytes::Bytes;
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, format, software, util};
use log::{debug, warn};
use util::channel_layout::ChannelLayout;
use util::format::sample::Type as SampleType;
use util::format::{Pixel, Sample};

fn is_eagain(e: &ffmpeg::Error) -> bool {
    matches!(e, ffmpeg::Error::Other { errno } if *errno == util::error::EAGAIN)
}

/// Copy our packet back into an `AVPacket` for the codec
fn av_packet(packet: &Packet) -> ffmpeg::Packet {
    let mut av = ffmpeg::Packet::copy(&packet.data);
    av.set_pts(packet.pts);
    av.set_dts(packet.dts);
    av.set_duration(packet.duration);
    if packet.is_key {
        av.set_flags(ffmpeg::packet::Flags::KEY);
    }
    av
}

fn send(decoder: &mut codec::decoder::Opened, packet: &Packet) -> Result<()> {
    match decoder.send_packet(&av_packet(packet)) {
        Ok(()) => Ok(()),
        Err(ffmpeg::Error::Eof) => {
            debug!("decoder already drained, packet ignored");
            Ok(())
        }
        Err(e) => Err(PlayerError::DecodeFailed(format!("send_packet: {}", e))),
    }
}

/// FFmpeg video decoder
pub struct FfmpegVideoDecoder {
    decoder: codec::decoder::Video,
}

impl FfmpegVideoDecoder {
    pub fn from_stream(stream: format::stream::Stream) -> Result<Self> {
        let context = codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| PlayerError::OpenFailed(format!("video codec: {}", e)))?;
        let decoder = context
            .decoder()
            .video()
            .map_err(|e| PlayerError::OpenFailed(format!("video codec: {}", e)))?;

        debug!(
            "video decoder: {}x{}, format {:?}",
            decoder.width(),
            decoder.height(),
            decoder.format()
        );

        Ok(Self { decoder })
    }
}

impl VideoDecoder for FfmpegVideoDecoder {
    fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        send(&mut self.decoder, packet)
    }

    fn receive_frame(&mut self) -> Result<Option<VideoFrame>> {
        let mut frame = util::frame::Video::empty();
        match self.decoder.receive_frame(&mut frame) {
            Ok(()) => Ok(Some(video_frame(&frame))),
            Err(ffmpeg::Error::Eof) => Ok(None),
            Err(e) if is_eagain(&e) => Ok(None),
            Err(e) => Err(PlayerError::DecodeFailed(format!("receive_frame: {}", e))),
        }
    }
}

fn pixel_format(pixel: Pixel) -> PixelFormat {
    match pixel {
        Pixel::YUV420P | Pixel::YUVJ420P => PixelFormat::Yuv420p,
        Pixel::YUV422P | Pixel::YUVJ422P => PixelFormat::Yuv422p,
        Pixel::YUV444P | Pixel::YUVJ444P => PixelFormat::Yuv444p,
        Pixel::YUV440P | Pixel::YUVJ440P => PixelFormat::Yuv440p,
        Pixel::YUV411P | Pixel::YUVJ411P => PixelFormat::Yuv411p,
        Pixel::YUV410P => PixelFormat::Yuv410p,
        Pixel::RGBA => PixelFormat::Rgba,
        other => PixelFormat::Other(
            other
                .descriptor()
                .map(|d| d.name().to_string())
                .unwrap_or_else(|| format!("{:?}", other).to_lowercase()),
        ),
    }
}

fn av_pixel(format: &PixelFormat) -> Option<Pixel> {
    match format {
        PixelFormat::Yuv420p => Some(Pixel::YUV420P),
        PixelFormat::Yuv422p => Some(Pixel::YUV422P),
        PixelFormat::Yuv444p => Some(Pixel::YUV444P),
        PixelFormat::Yuv440p => Some(Pixel::YUV440P),
        PixelFormat::Yuv411p => Some(Pixel::YUV411P),
        PixelFormat::Yuv410p => Some(Pixel::YUV410P),
        PixelFormat::Rgba => Some(Pixel::RGBA),
        PixelFormat::Other(name) => name.parse::<Pixel>().ok(),
    }
}

fn video_frame(frame: &util::frame::Video) -> VideoFrame {
    let planes = (0..frame.planes())
        .map(|i| Plane {
            data: Bytes::copy_from_slice(frame.data(i)),
            stride: frame.stride(i),
        })
        .collect();
    // not exposed by the safe wrapper
    let repeat_pict = unsafe { (*frame.as_ptr()).repeat_pict };

    VideoFrame {
        width: frame.width(),
        height: frame.height(),
        format: pixel_format(frame.format()),
        planes,
        best_effort_timestamp: frame.timestamp(),
        repeat_pict,
    }
}

/// FFmpeg audio decoder
pub struct FfmpegAudioDecoder {
    decoder: codec::decoder::Audio,
}

impl FfmpegAudioDecoder {
    pub fn from_stream(stream: format::stream::Stream) -> Result<Self> {
        let context = codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| PlayerError::OpenFailed(format!("audio codec: {}", e)))?;
        let decoder = context
            .decoder()
            .audio()
            .map_err(|e| PlayerError::OpenFailed(format!("audio codec: {}", e)))?;

        debug!(
            "audio decoder: {} Hz, {} channels, format {:?}",
            decoder.rate(),
            decoder.channels(),
            decoder.format()
        );

        Ok(Self { decoder })
    }
}

impl AudioDecoder for FfmpegAudioDecoder {
    fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        send(&mut self.decoder, packet)
    }

    fn receive_frame(&mut self) -> Result<Option<AudioFrame>> {
        let mut frame = util::frame::Audio::empty();
        match self.decoder.receive_frame(&mut frame) {
            Ok(()) => audio_frame(&frame).map(Some),
            Err(ffmpeg::Error::Eof) => Ok(None),
            Err(e) if is_eagain(&e) => Ok(None),
            Err(e) => Err(PlayerError::DecodeFailed(format!("receive_frame: {}", e))),
        }
    }
}

fn sample_format(sample: Sample) -> Option<SampleFormat> {
    Some(match sample {
        Sample::U8(SampleType::Packed) => SampleFormat::U8,
        Sample::I16(SampleType::Packed) => SampleFormat::I16,
        Sample::I32(SampleType::Packed) => SampleFormat::I32,
        Sample::F32(SampleType::Packed) => SampleFormat::F32,
        Sample::F64(SampleType::Packed) => SampleFormat::F64,
        Sample::U8(SampleType::Planar) => SampleFormat::U8Planar,
        Sample::I16(SampleType::Planar) => SampleFormat::I16Planar,
        Sample::I32(SampleType::Planar) => SampleFormat::I32Planar,
        Sample::F32(SampleType::Planar) => SampleFormat::F32Planar,
        Sample::F64(SampleType::Planar) => SampleFormat::F64Planar,
        _ => return None,
    })
}

fn av_sample(format: SampleFormat) -> Sample {
    match format {
        SampleFormat::U8 => Sample::U8(SampleType::Packed),
        SampleFormat::I16 => Sample::I16(SampleType::Packed),
        SampleFormat::I32 => Sample::I32(SampleType::Packed),
        SampleFormat::F32 => Sample::F32(SampleType::Packed),
        SampleFormat::F64 => Sample::F64(SampleType::Packed),
        SampleFormat::U8Planar => Sample::U8(SampleType::Planar),
        SampleFormat::I16Planar => Sample::I16(SampleType::Planar),
        SampleFormat::I32Planar => Sample::I32(SampleType::Planar),
        SampleFormat::F32Planar => Sample::F32(SampleType::Planar),
        SampleFormat::F64Planar => Sample::F64(SampleType::Planar),
    }
}

fn audio_frame(frame: &util::frame::Audio) -> Result<AudioFrame> {
    let format = sample_format(frame.format()).ok_or_else(|| {
        PlayerError::DecodeFailed(format!("unsupported sample format {:?}", frame.format()))
    })?;
    let planes = (0..frame.planes())
        .map(|i| Bytes::copy_from_slice(frame.data(i)))
        .collect();

    Ok(AudioFrame {
        sample_rate: frame.rate(),
        channels: frame.channels(),
        channel_layout: frame.channel_layout().bits(),
        format,
        samples: frame.samples(),
        planes,
        timestamp: frame.timestamp(),
    })
}

fn layout_for(channels: u16) -> ChannelLayout {
    match channels {
        1 => ChannelLayout::MONO,
        2 => ChannelLayout::STEREO,
        6 => ChannelLayout::_5POINT1,
        n => ChannelLayout::default(n as i32),
    }
}

/// sws context: any decoded layout -> tightly packed RGBA
pub struct FfmpegPictureConverter {
    scaler: Option<(software::scaling::Context, (Pixel, u32, u32))>,
}

// the scaler is only used from the video decode thread that owns the converter
unsafe impl Send for FfmpegPictureConverter {}

impl FfmpegPictureConverter {
    pub fn new(stream: &StreamInfo) -> Self {
        debug!(
            "picture converter for stream #{} ({}x{})",
            stream.index, stream.width, stream.height
        );
        Self { scaler: None }
    }

    fn scaler(&mut self, key: (Pixel, u32, u32)) -> Result<&mut software::scaling::Context> {
        let stale = !matches!(&self.scaler, Some((_, k)) if *k == key);
        if stale {
            let (pixel, width, height) = key;
            debug!("sws: {:?} {}x{} -> RGBA", pixel, width, height);
            let ctx = software::scaling::Context::get(
                pixel,
                width,
                height,
                Pixel::RGBA,
                width,
                height,
                software::scaling::Flags::BILINEAR,
            )?;
            self.scaler = Some((ctx, key));
        }
        match self.scaler.as_mut() {
            Some((ctx, _)) => Ok(ctx),
            None => Err(PlayerError::DecodeFailed("scaler unavailable".to_string())),
        }
    }
}

impl PictureConverter for FfmpegPictureConverter {
    fn to_rgba(&mut self, frame: &VideoFrame) -> Result<Image> {
        let pixel = av_pixel(&frame.format).ok_or_else(|| {
            PlayerError::DecodeFailed(format!("unknown pixel format {:?}", frame.format))
        })?;

        let mut src = util::frame::Video::new(pixel, frame.width, frame.height);
        for (i, plane) in frame.planes.iter().enumerate().take(src.planes()) {
            if plane.stride == 0 {
                return Err(PlayerError::DecodeFailed(format!("plane {} has zero stride", i)));
            }
            let dst_stride = src.stride(i);
            let row = plane.stride.min(dst_stride);
            for (src_row, dst_row) in plane.data.chunks(plane.stride).zip(src.data_mut(i).chunks_mut(dst_stride)) {
                let n = row.min(src_row.len()).min(dst_row.len());
                dst_row[..n].copy_from_slice(&src_row[..n]);
            }
        }

        let scaler = self.scaler((pixel, frame.width, frame.height))?;
        let mut rgba = util::frame::Video::empty();
        scaler.run(&src, &mut rgba)?;

        let width = frame.width as usize;
        let height = frame.height as usize;
        let row_size = width * 4;
        let stride = rgba.stride(0);
        let frame_data = rgba.data(0);
        let mut data = vec![0u8; row_size * height];
        for y in 0..height {
            let src_offset = y * stride;
            data[y * row_size..(y + 1) * row_size]
                .copy_from_slice(&frame_data[src_offset..src_offset + row_size]);
        }

        Image::from_rgba(frame.width, frame.height, data)
    }
}

/// swr context: decoded layout -> packed s16 interleaved at the sink format
pub struct FfmpegSampleConverter {
    target: SinkFormat,
    resampler: Option<(software::resampling::Context, (Sample, u64, u32))>,
}

// used only from the audio decode thread that owns it
unsafe impl Send for FfmpegSampleConverter {}

impl FfmpegSampleConverter {
    pub fn new(stream: &StreamInfo, target: SinkFormat) -> Self {
        debug!(
            "sample converter: {} Hz/{}ch -> {} Hz/{}ch s16",
            stream.sample_rate, stream.channels, target.sample_rate, target.channels
        );
        Self {
            target,
            resampler: None,
        }
    }
}

impl SampleConverter for FfmpegSampleConverter {
    fn to_pcm(&mut self, frame: &AudioFrame) -> Result<Bytes> {
        let sample = av_sample(frame.format);
        let layout = if frame.channel_layout != 0 {
            ChannelLayout::from_bits_truncate(frame.channel_layout)
        } else {
            ChannelLayout::default(frame.channels as i32)
        };

        let mut src = util::frame::Audio::new(sample, frame.samples, layout);
        src.set_rate(frame.sample_rate);
        for (i, plane) in frame.planes.iter().enumerate().take(src.planes()) {
            let dst = src.data_mut(i);
            let n = dst.len().min(plane.len());
            dst[..n].copy_from_slice(&plane[..n]);
        }

        let key = (sample, layout.bits(), frame.sample_rate);
        let stale = !matches!(&self.resampler, Some((_, k)) if *k == key);
        if stale {
            if self.resampler.is_some() {
                warn!("audio layout changed mid-stream, rebuilding resampler");
            }
            let ctx = software::resampling::Context::get(
                sample,
                layout,
                frame.sample_rate,
                Sample::I16(SampleType::Packed),
                layout_for(self.target.channels),
                self.target.sample_rate,
            )?;
            self.resampler = Some((ctx, key));
        }

        let mut out = util::frame::Audio::empty();
        if let Some((resampler, _)) = self.resampler.as_mut() {
            resampler.run(&src, &mut out)?;
        }

        let len = out.samples() * self.target.bytes_per_frame();
        let data = out.data(0);
        Ok(Bytes::copy_from_slice(&data[..len.min(data.len())]))
    }
}
