use crate::core::{
    Command, Packet, PlaybackState, PlayerConfig, PlayerError, Result, SinkFormat,
};
use crate::player::audio_output::{AudioBackend, AudioDevice, SharedAudioPlayer};
use crate::player::decode_thread::{run_audio_stage, run_video_stage, AudioStage, VideoStage};
use crate::player::demuxer_source::{resolve_streams, InputFormat, MediaBackend};
use crate::player::demuxer_thread::{run_demux_pump, DemuxRoutes};
use crate::player::events::PlayerObserver;
use crate::player::log_ctx;
use crate::player::scheduler::{run_scheduler, SchedulerContext};
use crate::player::task::{CancelToken, StopTrigger, TaskGroup};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Playback session controller
///
/// Owns the session lifecycle for one media file: `start` opens the input and spins up
/// the pipeline, `stop` cancels it, waits for every task and releases all resources.
/// Both are safe to call from any thread; the pipeline itself may also request a stop
/// (end of stream, decode failure).
pub struct Player {
    inner: Arc<PlayerInner>,
}

struct PlayerInner {
    me: Weak<PlayerInner>,
    source: PathBuf,
    config: PlayerConfig,
    media: Arc<dyn MediaBackend>,
    audio: Arc<dyn AudioBackend>,
    observer: Arc<dyn PlayerObserver>,
    /// Held for the whole of start / stop
    session: Mutex<Option<Session>>,
    /// Sink context, opened on first start and reused while the format matches
    device: Mutex<Option<(SinkFormat, Arc<dyn AudioDevice>)>>,
    state: Arc<RwLock<PlaybackState>>,
    generation: AtomicU64,
    /// Start/stop notifications, queued under the session lock and delivered after it
    pending: Mutex<VecDeque<(bool, Duration)>>,
    /// Held by whichever thread is delivering `pending`
    notifying: Mutex<()>,
}

/// Everything one running session holds
struct Session {
    generation: u64,
    duration: Duration,
    cancel: CancelToken,
    group: TaskGroup,
    commands: Sender<Command>,
    video_packets: Receiver<Packet>,
    audio_packets: Receiver<Packet>,
    demux: JoinHandle<Box<dyn InputFormat>>,
    video: JoinHandle<VideoStage>,
    audio: JoinHandle<AudioStage>,
    scheduler: JoinHandle<()>,
    audio_player: SharedAudioPlayer,
}

impl Player {
    pub fn new(
        source: impl AsRef<Path>,
        config: PlayerConfig,
        media: Arc<dyn MediaBackend>,
        audio: Arc<dyn AudioBackend>,
        observer: Arc<dyn PlayerObserver>,
    ) -> Self {
        info!("{} 🎮 creating player for {}", log_ctx(), source.as_ref().display());
        let inner = Arc::new_cyclic(|me| PlayerInner {
            me: me.clone(),
            source: source.as_ref().to_path_buf(),
            config,
            media,
            audio,
            observer,
            session: Mutex::new(None),
            device: Mutex::new(None),
            state: Arc::new(RwLock::new(PlaybackState::Idle)),
            generation: AtomicU64::new(0),
            pending: Mutex::new(VecDeque::new()),
            notifying: Mutex::new(()),
        });
        Self { inner }
    }

    /// Start a session; fails with `AlreadyStarted` if one is running
    pub fn start(&self) -> Result<()> {
        self.inner.start()
    }

    /// Stop the running session and release everything it holds; no-op when idle
    pub fn stop(&self) {
        self.inner.stop_session(None);
    }

    pub fn play(&self) {
        self.inner.send_command(Command::Play);
    }

    pub fn pause(&self) {
        self.inner.send_command(Command::Pause);
    }

    pub fn send_command(&self, command: Command) {
        self.inner.send_command(command);
    }

    pub fn is_started(&self) -> bool {
        self.inner.session.lock().is_some()
    }

    pub fn state(&self) -> PlaybackState {
        *self.inner.state.read()
    }

    /// Duration of the running session's media, zero when idle or unknown
    pub fn duration(&self) -> Duration {
        self.inner
            .session
            .lock()
            .as_ref()
            .map(|s| s.duration)
            .unwrap_or_default()
    }

    pub fn source(&self) -> &Path {
        &self.inner.source
    }
}

impl PlayerInner {
    fn start(&self) -> Result<()> {
        let mut session = self.session.lock();
        if session.is_some() {
            warn!("{} ⚠ start() while a session is running", log_ctx());
            return Err(PlayerError::AlreadyStarted);
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let running = self.open_session(generation).map_err(|e| {
            error!("{} ❌ start failed: {}", log_ctx(), e);
            e
        })?;
        let duration = running.duration;
        *session = Some(running);

        info!("{} ✅ session #{} started ({:?})", log_ctx(), generation, duration);
        self.pending.lock().push_back((true, duration));
        drop(session);
        self.deliver_notifications();
        Ok(())
    }

    /// Hand queued start/stop notifications to the observer, in order and outside the
    /// session lock so the observer may query the player.
    fn deliver_notifications(&self) {
        loop {
            let Some(delivering) = self.notifying.try_lock() else {
                // the thread holding it delivers ours too
                return;
            };
            loop {
                let next = self.pending.lock().pop_front();
                let Some((started, duration)) = next else {
                    break;
                };
                self.observer.on_state_changed(started, duration);
            }
            drop(delivering);
            // something queued between the last pop and the unlock
            if self.pending.lock().is_empty() {
                return;
            }
        }
    }

    /// Sink context for `requested`, reusing the open one when the format matches
    fn audio_device(&self, requested: SinkFormat) -> Result<Arc<dyn AudioDevice>> {
        let mut slot = self.device.lock();
        if let Some((format, device)) = slot.as_ref() {
            if *format == requested {
                return Ok(device.clone());
            }
            info!(
                "{} 🔁 audio format changed ({} Hz/{}ch), reopening device",
                log_ctx(),
                requested.sample_rate,
                requested.channels
            );
        }
        let device = self.audio.open_device(requested)?;
        *slot = Some((requested, device.clone()));
        Ok(device)
    }

    /// Stop request from inside the pipeline: runs on a detached thread so the calling
    /// task can exit, and only acts if its session is still the current one.
    fn stop_trigger(&self, generation: u64) -> StopTrigger {
        let me = self.me.clone();
        StopTrigger::new(move |reason| {
            let me = me.clone();
            let reason = reason.to_string();
            let spawned = thread::Builder::new()
                .name("session-stop".to_string())
                .spawn(move || {
                    if let Some(player) = me.upgrade() {
                        info!("{} ⏹ stop requested: {}", log_ctx(), reason);
                        player.stop_session(Some(generation));
                    }
                });
            if let Err(e) = spawned {
                error!("{} ❌ failed to spawn stop thread: {}", log_ctx(), e);
            }
        })
    }

    fn open_session(&self, generation: u64) -> Result<Session> {
        let config = &self.config;

        let input = self.media.open_input(&self.source)?;
        info!("{} 📂 opened {}", log_ctx(), input.description());

        let (video_info, audio_info) = resolve_streams(&input.streams())?;
        debug!(
            "{} selected video #{} ({}), audio #{} ({})",
            log_ctx(),
            video_info.index,
            video_info.codec,
            audio_info.index,
            audio_info.codec
        );

        let video_decoder = input.open_video_decoder(&video_info)?;
        let audio_decoder = input.open_audio_decoder(&audio_info)?;

        let device = self.audio_device(SinkFormat {
            sample_rate: audio_info.sample_rate,
            channels: config.output_channels,
        })?;
        let sink_format = device.format();
        let audio_player: SharedAudioPlayer = Arc::new(Mutex::new(device.new_player()?));

        let video_stage = VideoStage {
            converter: self.media.picture_converter(&video_info)?,
            decoder: video_decoder,
            stream: video_info.clone(),
        };
        let audio_stage = AudioStage {
            converter: self.media.sample_converter(&audio_info, sink_format)?,
            decoder: audio_decoder,
            stream: audio_info.clone(),
            format: sink_format,
        };

        let duration = video_info
            .duration()
            .or_else(|| input.duration())
            .unwrap_or_default();

        let (video_packet_tx, video_packets) = bounded(config.video_packet_queue);
        let (audio_packet_tx, audio_packets) = bounded(config.audio_packet_queue);
        let (picture_tx, picture_rx) = bounded(config.picture_queue);
        let (sample_tx, sample_rx) = bounded(config.audio_sample_queue);
        let (command_tx, command_rx) = unbounded();

        let cancel = CancelToken::new();
        let group = TaskGroup::new(cancel.clone());
        let trigger = self.stop_trigger(generation);

        let spawned = (|| -> Result<_> {
            let scheduler_ctx = SchedulerContext {
                pictures: picture_rx,
                samples: sample_rx,
                commands: command_rx,
                audio_player: audio_player.clone(),
                observer: self.observer.clone(),
                group: group.clone(),
                config: config.clone(),
                state: self.state.clone(),
                stop: trigger.clone(),
            };
            let scheduler =
                group.spawn("scheduler", move |cancel| run_scheduler(scheduler_ctx, cancel))?;

            let stop = trigger.clone();
            let video_rx = video_packets.clone();
            let video = group.spawn("video-decode", move |cancel| {
                run_video_stage(video_stage, video_rx, picture_tx, cancel, stop)
            })?;

            let stop = trigger.clone();
            let audio_rx = audio_packets.clone();
            let audio = group.spawn("audio-decode", move |cancel| {
                run_audio_stage(audio_stage, audio_rx, sample_tx, cancel, stop)
            })?;

            let routes = DemuxRoutes {
                video_index: video_info.index,
                audio_index: audio_info.index,
                video_tx: video_packet_tx,
                audio_tx: audio_packet_tx,
            };
            let demux = group.spawn("demux", move |cancel| run_demux_pump(input, routes, cancel))?;

            Ok((demux, video, audio, scheduler))
        })();

        let (demux, video, audio, scheduler) = match spawned {
            Ok(handles) => handles,
            Err(e) => {
                // tasks already running own their resources and release them on exit
                cancel.cancel();
                group.wait();
                audio_player.lock().close();
                *self.state.write() = PlaybackState::Idle;
                return Err(e);
            }
        };

        Ok(Session {
            generation,
            duration,
            cancel,
            group,
            commands: command_tx,
            video_packets,
            audio_packets,
            demux,
            video,
            audio,
            scheduler,
            audio_player,
        })
    }

    /// Stop the session. With `Some(generation)` only that session is stopped, so a
    /// late request from a finished session cannot stop its successor.
    fn stop_session(&self, generation: Option<u64>) {
        let mut slot = self.session.lock();
        let current = match slot.as_ref() {
            None => {
                debug!("{} stop: no session running", log_ctx());
                return;
            }
            Some(s) => s.generation,
        };
        if let Some(requested) = generation {
            if requested != current {
                debug!(
                    "{} stop for stale session #{} ignored (current #{})",
                    log_ctx(),
                    requested,
                    current
                );
                return;
            }
        }
        let Some(session) = slot.take() else {
            return;
        };

        info!("{} 🛑 stopping session #{}", log_ctx(), current);
        let Session {
            cancel,
            group,
            commands,
            video_packets,
            audio_packets,
            demux,
            video,
            audio,
            scheduler,
            audio_player,
            ..
        } = session;

        cancel.cancel();

        // the demux pump closes both queues on exit; release whatever is still queued
        let drained = video_packets.iter().count() + audio_packets.iter().count();
        debug!("{} 🧹 {} queued packets released", log_ctx(), drained);
        drop(video_packets);
        drop(audio_packets);

        group.wait();
        drop(commands);

        let input = join("demux", demux);
        let video = join("video-decode", video);
        let audio = join("audio-decode", audio);
        join("scheduler", scheduler);

        // conversion contexts, then codecs, then the input
        let video_decoder = video.map(|stage| {
            drop(stage.converter);
            stage.decoder
        });
        let audio_decoder = audio.map(|stage| {
            drop(stage.converter);
            stage.decoder
        });
        drop(video_decoder);
        drop(audio_decoder);
        drop(input);

        audio_player.lock().close();
        *self.state.write() = PlaybackState::Idle;

        info!("{} ✅ session #{} stopped", log_ctx(), current);
        self.pending.lock().push_back((false, Duration::ZERO));
        drop(slot);
        self.deliver_notifications();
    }

    fn send_command(&self, command: Command) {
        let commands = self.session.lock().as_ref().map(|s| s.commands.clone());
        match commands {
            Some(tx) => {
                if tx.send(command).is_err() {
                    warn!("{} ⚠ scheduler gone, {:?} dropped", log_ctx(), command);
                }
            }
            None => warn!("{} ⚠ {:?} ignored: not started", log_ctx(), command),
        }
    }
}

fn join<T>(name: &str, handle: JoinHandle<T>) -> Option<T> {
    match handle.join() {
        Ok(value) => Some(value),
        Err(_) => {
            error!("{} ❌ {} task panicked", log_ctx(), name);
            None
        }
    }
}

impl Drop for PlayerInner {
    fn drop(&mut self) {
        if self.session.get_mut().is_some() {
            warn!("{} ⚠ player dropped while started, stopping", log_ctx());
            self.stop_session(None);
        }
    }
}
