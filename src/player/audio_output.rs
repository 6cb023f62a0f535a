use crate::core::{AudioSample, PlayerError, Result, SinkFormat};
use crate::player::log_ctx;
use crate::player::task::{CancelToken, TaskGroup};
use crossbeam_channel::{bounded, select, Receiver, Sender, TryRecvError};
use log::{error, info};
use parking_lot::Mutex;
use std::sync::Arc;

/// Audio output library: hands out devices for a requested PCM format
pub trait AudioBackend: Send + Sync {
    fn open_device(&self, requested: SinkFormat) -> Result<Arc<dyn AudioDevice>>;
}

/// Opened output device (the sink context), shared across sessions
pub trait AudioDevice: Send + Sync {
    /// Format actually negotiated with the hardware
    fn format(&self) -> SinkFormat;

    fn new_player(&self) -> Result<Box<dyn AudioPlayer>>;
}

/// One playback stream on a device
pub trait AudioPlayer: Send {
    /// Blocking write of packed s16 interleaved PCM; returns once the device accepted the
    /// data or `cancel` fired, whichever comes first
    fn write(&mut self, pcm: &[u8], cancel: &CancelToken) -> Result<()>;

    fn close(&mut self);
}

/// Player shared between the session controller (close) and the output pump (write)
pub type SharedAudioPlayer = Arc<Mutex<Box<dyn AudioPlayer>>>;

/// Why an output pump exited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpExit {
    /// The sample queue closed and every sample was written
    Drained,
    /// Signalled or cancelled
    Stopped,
    /// The sink rejected a write
    Failed,
}

/// Handle on a running output pump
pub struct OutputPumpHandle {
    stop: Option<Sender<()>>,
    done: Receiver<PumpExit>,
}

impl OutputPumpHandle {
    /// Ask the pump to exit after its current write
    pub fn signal(&mut self) {
        self.stop.take();
    }

    /// Signal and wait until the pump has exited
    pub fn retire(mut self) {
        self.signal();
        let _ = self.done.recv();
    }

    /// Yields the exit reason once, then disconnects
    pub fn exited(&self) -> Receiver<PumpExit> {
        self.done.clone()
    }
}

/// Start the output pump: moves samples from the audio queue to the sink player until
/// told to stop, the session is cancelled or the queue closes.
pub fn spawn_output_pump(
    group: &TaskGroup,
    samples: Receiver<AudioSample>,
    player: SharedAudioPlayer,
) -> Result<OutputPumpHandle> {
    let (stop_tx, stop_rx) = bounded::<()>(0);
    let (done_tx, done_rx) = bounded::<PumpExit>(1);

    group.spawn("audio-out", move |cancel| {
        let exit = run_output_pump(samples, player, stop_rx, cancel);
        let _ = done_tx.send(exit);
    })?;

    Ok(OutputPumpHandle {
        stop: Some(stop_tx),
        done: done_rx,
    })
}

fn stopped(stop: &Receiver<()>, cancel: &CancelToken) -> bool {
    cancel.is_cancelled() || matches!(stop.try_recv(), Err(TryRecvError::Disconnected))
}

fn run_output_pump(
    samples: Receiver<AudioSample>,
    player: SharedAudioPlayer,
    stop: Receiver<()>,
    cancel: CancelToken,
) -> PumpExit {
    info!("{} 🔈 audio output pump started", log_ctx());
    let mut written: usize = 0;

    let exit = loop {
        if stopped(&stop, &cancel) {
            break PumpExit::Stopped;
        }
        select! {
            recv(samples) -> msg => match msg {
                Ok(sample) => {
                    if let Err(e) = player.lock().write(&sample.data, &cancel) {
                        error!("{} ❌ audio write failed: {}", log_ctx(), e);
                        break PumpExit::Failed;
                    }
                    written += 1;
                }
                Err(_) => {
                    info!("{} 📄 audio sample queue closed", log_ctx());
                    break PumpExit::Drained;
                }
            },
            recv(stop) -> _ => break PumpExit::Stopped,
            recv(cancel.signal()) -> _ => break PumpExit::Stopped,
        }
    };

    info!("{} 🛑 audio output pump exit ({:?}, {} chunks written)", log_ctx(), exit, written);
    exit
}

#[cfg(feature = "cpal-sink")]
pub use self::cpal_sink::CpalAudio;

#[cfg(feature = "cpal-sink")]
mod cpal_sink {
    use super::*;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{Device, Stream, StreamConfig, SupportedStreamConfigRange};
    use log::{debug, warn};

    /// Chunks buffered between `write` and the device callback
    const CHUNK_BACKLOG: usize = 4;

    /// Default cpal host
    pub struct CpalAudio;

    impl CpalAudio {
        pub fn new() -> Self {
            Self
        }
    }

    impl Default for CpalAudio {
        fn default() -> Self {
            Self::new()
        }
    }

    impl AudioBackend for CpalAudio {
        fn open_device(&self, requested: SinkFormat) -> Result<Arc<dyn AudioDevice>> {
            Ok(Arc::new(CpalDevice::open(requested)?))
        }
    }

    fn unavailable(what: &str, e: impl std::fmt::Display) -> PlayerError {
        PlayerError::SinkUnavailable(format!("{}: {}", what, e))
    }

    struct CpalDevice {
        device: Device,
        config: StreamConfig,
    }

    // cpal::Device wraps a host handle that is safe to use from any thread on the
    // supported backends; streams built from it stay with their player.
    unsafe impl Send for CpalDevice {}
    unsafe impl Sync for CpalDevice {}

    impl CpalDevice {
        /// Open the default output device, falling back to a standard configuration when
        /// the requested one is not supported
        fn open(requested: SinkFormat) -> Result<Self> {
            info!(
                "initializing audio output: {} Hz, {} channels",
                requested.sample_rate, requested.channels
            );

            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| PlayerError::SinkUnavailable("no output device".to_string()))?;
            debug!("audio device: {}", device.name().unwrap_or_default());

            let wanted = StreamConfig {
                channels: requested.channels,
                sample_rate: cpal::SampleRate(requested.sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };
            if Self::supports(&device, &wanted)? {
                return Ok(Self { device, config: wanted });
            }

            warn!(
                "⚠️  device does not support {} Hz / {} channels, trying standard configs",
                requested.sample_rate, requested.channels
            );
            const FALLBACKS: [(u32, u16); 4] = [(48000, 2), (44100, 2), (48000, 1), (44100, 1)];
            for (rate, channels) in FALLBACKS {
                let config = StreamConfig {
                    channels,
                    sample_rate: cpal::SampleRate(rate),
                    buffer_size: cpal::BufferSize::Default,
                };
                if Self::supports(&device, &config)? {
                    info!("✅ using fallback config: {} Hz, {} channels", rate, channels);
                    return Ok(Self { device, config });
                }
            }

            Err(PlayerError::SinkUnavailable(format!(
                "no supported config (requested {} Hz, {} channels)",
                requested.sample_rate, requested.channels
            )))
        }

        fn supports(device: &Device, config: &StreamConfig) -> Result<bool> {
            let supported = device
                .supported_output_configs()
                .map_err(|e| unavailable("query output configs", e))?;
            Ok(supported.into_iter().any(|range| Self::is_config_compatible(config, &range)))
        }

        fn is_config_compatible(config: &StreamConfig, supported: &SupportedStreamConfigRange) -> bool {
            let rate_in_range = config.sample_rate.0 >= supported.min_sample_rate().0
                && config.sample_rate.0 <= supported.max_sample_rate().0;
            rate_in_range && config.channels == supported.channels()
        }
    }

    impl AudioDevice for CpalDevice {
        fn format(&self) -> SinkFormat {
            SinkFormat {
                sample_rate: self.config.sample_rate.0,
                channels: self.config.channels,
            }
        }

        fn new_player(&self) -> Result<Box<dyn AudioPlayer>> {
            let (tx, rx) = bounded::<Vec<f32>>(CHUNK_BACKLOG);
            let mut pending: Vec<f32> = Vec::new();
            let mut pos = 0;

            let stream = self
                .device
                .build_output_stream(
                    &self.config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        for sample in data.iter_mut() {
                            if pos >= pending.len() {
                                match rx.try_recv() {
                                    Ok(chunk) => {
                                        pending = chunk;
                                        pos = 0;
                                    }
                                    Err(_) => {
                                        *sample = 0.0;
                                        continue;
                                    }
                                }
                            }
                            *sample = pending.get(pos).copied().unwrap_or(0.0);
                            pos += 1;
                        }
                    },
                    move |err| {
                        error!("audio stream error: {}", err);
                    },
                    None,
                )
                .map_err(|e| unavailable("build output stream", e))?;

            stream.play().map_err(|e| unavailable("start output stream", e))?;
            info!("audio player started");

            Ok(Box::new(CpalPlayer {
                stream: Some(stream),
                chunks: Some(tx),
            }))
        }
    }

    struct CpalPlayer {
        stream: Option<Stream>,
        chunks: Option<Sender<Vec<f32>>>,
    }

    // cpal::Stream is not Send; it is only touched (dropped) under the shared player mutex
    unsafe impl Send for CpalPlayer {}

    impl AudioPlayer for CpalPlayer {
        fn write(&mut self, pcm: &[u8], cancel: &CancelToken) -> Result<()> {
            let chunks = self
                .chunks
                .as_ref()
                .ok_or_else(|| PlayerError::SinkUnavailable("player closed".to_string()))?;
            let chunk = pcm
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
                .collect::<Vec<f32>>();
            // blocks while the device is CHUNK_BACKLOG chunks behind; a stalled stream
            // must not keep the session from stopping
            select! {
                send(chunks, chunk) -> res => res
                    .map_err(|_| PlayerError::SinkUnavailable("output stream gone".to_string())),
                recv(cancel.signal()) -> _ => {
                    debug!("audio write abandoned: session cancelled");
                    Ok(())
                }
            }
        }

        fn close(&mut self) {
            self.chunks.take();
            if let Some(stream) = self.stream.take() {
                drop(stream);
                info!("audio player closed");
            }
        }
    }

    impl Drop for CpalPlayer {
        fn drop(&mut self) {
            self.close();
        }
    }
}
