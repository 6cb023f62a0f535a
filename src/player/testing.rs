//! Scripted media and audio fakes shared by the pipeline tests

use crate::core::{
    AudioFrame, Image, Packet, PixelFormat, Plane, PlayerError, Rational, Result, SampleFormat,
    SinkFormat, StreamInfo, StreamKind, VideoFrame,
};
use crate::player::audio_output::{AudioBackend, AudioDevice, AudioPlayer};
use crate::player::task::CancelToken;
use crossbeam_channel::{bounded, select, Receiver, Sender};
use crate::player::demuxer_source::{
    AudioDecoder, InputFormat, MediaBackend, PictureConverter, SampleConverter, VideoDecoder,
};
use bytes::Bytes;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Samples per channel in every fake audio frame
pub const FAKE_AUDIO_SAMPLES: usize = 1024;

#[derive(Default)]
pub struct TestCounters {
    pub packets_created: AtomicUsize,
    pub packets_released: AtomicUsize,
    pub inputs_open: AtomicUsize,
    pub decoders_open: AtomicUsize,
    pub converters_open: AtomicUsize,
    pub conversions: AtomicUsize,
    pub devices_opened: AtomicUsize,
    pub players_open: AtomicUsize,
    pub players_closed: AtomicUsize,
    pub bytes_written: AtomicUsize,
}

impl TestCounters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    /// Every packet ever read has been released
    pub fn packets_balanced(&self) -> bool {
        Self::get(&self.packets_created) == Self::get(&self.packets_released)
    }

    /// Nothing of a session is left open
    pub fn all_released(&self) -> bool {
        self.packets_balanced()
            && Self::get(&self.inputs_open) == 0
            && Self::get(&self.decoders_open) == 0
            && Self::get(&self.converters_open) == 0
            && Self::get(&self.players_open) == 0
    }
}

fn dec(counter: &AtomicUsize) {
    counter.fetch_sub(1, Ordering::SeqCst);
}

fn inc(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::SeqCst);
}

/// tb 1/25, 25 fps, 10 s
pub fn video_stream(index: usize) -> StreamInfo {
    StreamInfo {
        index,
        kind: StreamKind::Video,
        codec: "fakevideo".to_string(),
        time_base: Rational::new(1, 25),
        avg_frame_rate: Some(Rational::new(25, 1)),
        duration: Some(250),
        width: 2,
        height: 2,
        sample_rate: 0,
        channels: 0,
    }
}

/// tb 1/48000, 48 kHz stereo
pub fn audio_stream(index: usize) -> StreamInfo {
    StreamInfo {
        index,
        kind: StreamKind::Audio,
        codec: "fakeaudio".to_string(),
        time_base: Rational::new(1, 48_000),
        avg_frame_rate: None,
        duration: Some(48_000 * 10),
        width: 0,
        height: 0,
        sample_rate: 48_000,
        channels: 2,
    }
}

fn other_stream(index: usize) -> StreamInfo {
    StreamInfo {
        index,
        kind: StreamKind::Other,
        codec: "subrip".to_string(),
        time_base: Rational::new(1, 1000),
        avg_frame_rate: None,
        duration: None,
        width: 0,
        height: 0,
        sample_rate: 0,
        channels: 0,
    }
}

/// What a `FakeInput` reads
#[derive(Clone)]
pub struct PacketScript {
    pub streams: Vec<StreamInfo>,
    entries: Vec<(usize, Option<i64>, &'static [u8])>,
    endless: bool,
    fail_at: Option<usize>,
}

impl PacketScript {
    /// `n` video packets (stream 0) interleaved with `n` audio packets (stream 1)
    pub fn interleaved(n: usize) -> Self {
        let mut entries = Vec::with_capacity(n * 2);
        for i in 0..n as i64 {
            entries.push((0, Some(i), &b"v"[..]));
            entries.push((1, Some(i * FAKE_AUDIO_SAMPLES as i64), &b"a"[..]));
        }
        Self {
            streams: vec![video_stream(0), audio_stream(1)],
            entries,
            endless: false,
            fail_at: None,
        }
    }

    /// Never reaches end of stream
    pub fn endless() -> Self {
        Self {
            endless: true,
            ..Self::interleaved(0)
        }
    }

    /// Prepend `count` packets of an extra, unselected stream
    pub fn with_stray_stream(mut self, index: usize, count: usize) -> Self {
        self.streams.push(other_stream(index));
        let stray = (0..count).map(|_| (index, None, &b"x"[..]));
        self.entries.splice(0..0, stray);
        self
    }

    /// The `read`-th read (0-based) fails
    pub fn fail_read_at(mut self, read: usize) -> Self {
        self.fail_at = Some(read);
        self
    }

    /// Replace the payload of one entry ("corrupt" fails decoding, "nv12" needs conversion)
    pub fn with_payload(mut self, entry: usize, payload: &'static [u8]) -> Self {
        if let Some(e) = self.entries.get_mut(entry) {
            e.2 = payload;
        }
        self
    }

    pub fn without_audio(mut self) -> Self {
        self.streams.retain(|s| s.kind != StreamKind::Audio);
        self
    }

    fn entry(&self, n: usize) -> Option<(usize, Option<i64>, &'static [u8])> {
        if self.endless {
            let i = (n / 2) as i64;
            return Some(if n % 2 == 0 {
                (0, Some(i), &b"v"[..])
            } else {
                (1, Some(i * FAKE_AUDIO_SAMPLES as i64), &b"a"[..])
            });
        }
        self.entries.get(n).copied()
    }
}

/// Payload owner that counts its release
struct Tracked {
    counters: Arc<TestCounters>,
    data: &'static [u8],
}

impl AsRef<[u8]> for Tracked {
    fn as_ref(&self) -> &[u8] {
        self.data
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        inc(&self.counters.packets_released);
    }
}

pub struct FakeInput {
    counters: Arc<TestCounters>,
    script: PacketScript,
    reads: usize,
}

impl FakeInput {
    pub fn new(counters: Arc<TestCounters>, script: PacketScript) -> Self {
        inc(&counters.inputs_open);
        Self {
            counters,
            script,
            reads: 0,
        }
    }
}

impl Drop for FakeInput {
    fn drop(&mut self) {
        dec(&self.counters.inputs_open);
    }
}

impl InputFormat for FakeInput {
    fn streams(&self) -> Vec<StreamInfo> {
        self.script.streams.clone()
    }

    fn duration(&self) -> Option<Duration> {
        Some(Duration::from_secs(10))
    }

    fn read_packet(&mut self) -> Result<Option<Packet>> {
        let n = self.reads;
        self.reads += 1;
        if self.script.fail_at == Some(n) {
            return Err(PlayerError::DecodeFailed("scripted read failure".to_string()));
        }
        let Some((stream, pts, payload)) = self.script.entry(n) else {
            return Ok(None);
        };
        inc(&self.counters.packets_created);
        let data = Bytes::from_owner(Tracked {
            counters: self.counters.clone(),
            data: payload,
        });
        Ok(Some(Packet::new(stream, pts, data)))
    }

    fn open_video_decoder(&self, _stream: &StreamInfo) -> Result<Box<dyn VideoDecoder>> {
        Ok(Box::new(FakeVideoDecoder::new(self.counters.clone())))
    }

    fn open_audio_decoder(&self, _stream: &StreamInfo) -> Result<Box<dyn AudioDecoder>> {
        Ok(Box::new(FakeAudioDecoder::new(self.counters.clone())))
    }

    fn description(&self) -> String {
        "fake input".to_string()
    }
}

pub struct FakeBackend {
    counters: Arc<TestCounters>,
    script: PacketScript,
    fail_open: bool,
}

impl FakeBackend {
    pub fn new(counters: Arc<TestCounters>, script: PacketScript) -> Self {
        Self {
            counters,
            script,
            fail_open: false,
        }
    }

    pub fn failing(counters: Arc<TestCounters>) -> Self {
        Self {
            fail_open: true,
            ..Self::new(counters, PacketScript::interleaved(0))
        }
    }
}

impl MediaBackend for FakeBackend {
    fn open_input(&self, path: &Path) -> Result<Box<dyn InputFormat>> {
        if self.fail_open {
            return Err(PlayerError::OpenFailed(format!("{}: no such file", path.display())));
        }
        Ok(Box::new(FakeInput::new(self.counters.clone(), self.script.clone())))
    }

    fn picture_converter(&self, _stream: &StreamInfo) -> Result<Box<dyn PictureConverter>> {
        Ok(Box::new(FakePictureConverter::new(self.counters.clone())))
    }

    fn sample_converter(
        &self,
        _stream: &StreamInfo,
        _target: SinkFormat,
    ) -> Result<Box<dyn SampleConverter>> {
        Ok(Box::new(FakeSampleConverter::new(self.counters.clone())))
    }
}

/// One 2x2 frame per packet, pts copied from the packet
pub struct FakeVideoDecoder {
    counters: Arc<TestCounters>,
    pending: VecDeque<VideoFrame>,
}

impl FakeVideoDecoder {
    pub fn new(counters: Arc<TestCounters>) -> Self {
        inc(&counters.decoders_open);
        Self {
            counters,
            pending: VecDeque::new(),
        }
    }
}

impl Drop for FakeVideoDecoder {
    fn drop(&mut self) {
        dec(&self.counters.decoders_open);
    }
}

impl VideoDecoder for FakeVideoDecoder {
    fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        let (format, planes) = match &packet.data[..] {
            b"corrupt" => return Err(PlayerError::DecodeFailed("corrupt packet".to_string())),
            b"nv12" => (
                PixelFormat::Other("nv12".to_string()),
                vec![
                    Plane { data: Bytes::from(vec![16u8; 4]), stride: 2 },
                    Plane { data: Bytes::from(vec![128u8; 2]), stride: 2 },
                ],
            ),
            _ => (
                PixelFormat::Yuv420p,
                vec![
                    Plane { data: Bytes::from(vec![16u8; 4]), stride: 2 },
                    Plane { data: Bytes::from(vec![128u8; 1]), stride: 1 },
                    Plane { data: Bytes::from(vec![128u8; 1]), stride: 1 },
                ],
            ),
        };
        self.pending.push_back(VideoFrame {
            width: 2,
            height: 2,
            format,
            planes,
            best_effort_timestamp: packet.pts,
            repeat_pict: 0,
        });
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<Option<VideoFrame>> {
        Ok(self.pending.pop_front())
    }
}

/// One s16 stereo frame of `FAKE_AUDIO_SAMPLES` per packet
pub struct FakeAudioDecoder {
    counters: Arc<TestCounters>,
    pending: VecDeque<AudioFrame>,
}

impl FakeAudioDecoder {
    pub fn new(counters: Arc<TestCounters>) -> Self {
        inc(&counters.decoders_open);
        Self {
            counters,
            pending: VecDeque::new(),
        }
    }
}

impl Drop for FakeAudioDecoder {
    fn drop(&mut self) {
        dec(&self.counters.decoders_open);
    }
}

impl AudioDecoder for FakeAudioDecoder {
    fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        if &packet.data[..] == b"corrupt" {
            return Err(PlayerError::DecodeFailed("corrupt packet".to_string()));
        }
        self.pending.push_back(AudioFrame {
            sample_rate: 48_000,
            channels: 2,
            channel_layout: 0b11,
            format: SampleFormat::I16,
            samples: FAKE_AUDIO_SAMPLES,
            planes: vec![Bytes::from(vec![0u8; FAKE_AUDIO_SAMPLES * 4])],
            timestamp: packet.pts,
        });
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<Option<AudioFrame>> {
        Ok(self.pending.pop_front())
    }
}

pub struct FakePictureConverter {
    counters: Arc<TestCounters>,
}

impl FakePictureConverter {
    pub fn new(counters: Arc<TestCounters>) -> Self {
        inc(&counters.converters_open);
        Self { counters }
    }
}

impl Drop for FakePictureConverter {
    fn drop(&mut self) {
        dec(&self.counters.converters_open);
    }
}

impl PictureConverter for FakePictureConverter {
    fn to_rgba(&mut self, frame: &VideoFrame) -> Result<Image> {
        inc(&self.counters.conversions);
        let len = frame.width as usize * frame.height as usize * 4;
        Image::from_rgba(frame.width, frame.height, vec![255; len])
    }
}

/// Decoded frames are already s16 interleaved; passes the first plane through
pub struct FakeSampleConverter {
    counters: Arc<TestCounters>,
}

impl FakeSampleConverter {
    pub fn new(counters: Arc<TestCounters>) -> Self {
        inc(&counters.converters_open);
        Self { counters }
    }
}

impl Drop for FakeSampleConverter {
    fn drop(&mut self) {
        dec(&self.counters.converters_open);
    }
}

impl SampleConverter for FakeSampleConverter {
    fn to_pcm(&mut self, frame: &AudioFrame) -> Result<Bytes> {
        frame
            .planes
            .first()
            .cloned()
            .ok_or_else(|| PlayerError::DecodeFailed("no planes".to_string()))
    }
}

pub struct FakeAudio {
    counters: Arc<TestCounters>,
    fail: bool,
    stall: bool,
    write_delay: Duration,
}

impl FakeAudio {
    pub fn new(counters: Arc<TestCounters>) -> Self {
        Self {
            counters,
            fail: false,
            stall: false,
            write_delay: Duration::ZERO,
        }
    }

    /// Device whose stream never pulls data: every write blocks until cancelled
    pub fn stalled(counters: Arc<TestCounters>) -> Self {
        Self {
            stall: true,
            ..Self::new(counters)
        }
    }

    pub fn failing(counters: Arc<TestCounters>) -> Self {
        Self {
            fail: true,
            ..Self::new(counters)
        }
    }

    /// Make every write block like a device draining in real time
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }
}

impl AudioBackend for FakeAudio {
    fn open_device(&self, requested: SinkFormat) -> Result<Arc<dyn AudioDevice>> {
        if self.fail {
            return Err(PlayerError::SinkUnavailable("no output device".to_string()));
        }
        inc(&self.counters.devices_opened);
        Ok(Arc::new(FakeDevice {
            counters: self.counters.clone(),
            format: requested,
            stall: self.stall,
            write_delay: self.write_delay,
        }))
    }
}

struct FakeDevice {
    counters: Arc<TestCounters>,
    format: SinkFormat,
    stall: bool,
    write_delay: Duration,
}

impl AudioDevice for FakeDevice {
    fn format(&self) -> SinkFormat {
        self.format
    }

    fn new_player(&self) -> Result<Box<dyn AudioPlayer>> {
        inc(&self.counters.players_open);
        // rendezvous channel nobody reads, like a stream whose callback stopped running
        let stalled = self.stall.then(|| bounded::<()>(0));
        Ok(Box::new(FakePlayer {
            counters: self.counters.clone(),
            write_delay: self.write_delay,
            stalled,
            closed: false,
        }))
    }
}

struct FakePlayer {
    counters: Arc<TestCounters>,
    write_delay: Duration,
    stalled: Option<(Sender<()>, Receiver<()>)>,
    closed: bool,
}

impl AudioPlayer for FakePlayer {
    fn write(&mut self, pcm: &[u8], cancel: &CancelToken) -> Result<()> {
        if self.closed {
            return Err(PlayerError::SinkUnavailable("player closed".to_string()));
        }
        if let Some((tx, _rx)) = &self.stalled {
            select! {
                send(tx, ()) -> _ => {}
                recv(cancel.signal()) -> _ => return Ok(()),
            }
        }
        if !self.write_delay.is_zero() {
            thread::sleep(self.write_delay);
        }
        self.counters.bytes_written.fetch_add(pcm.len(), Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            dec(&self.counters.players_open);
            inc(&self.counters.players_closed);
        }
    }
}

impl Drop for FakePlayer {
    fn drop(&mut self) {
        self.close();
    }
}
