use crate::core::{AudioSample, Command, FramePacer, Picture, PlaybackState, PlayerConfig};
use crate::player::audio_output::{
    spawn_output_pump, OutputPumpHandle, PumpExit, SharedAudioPlayer,
};
use crate::player::events::PlayerObserver;
use crate::player::log_ctx;
use crate::player::task::{CancelToken, StopTrigger, TaskGroup};
use crossbeam_channel::{after, never, select, Receiver, TryRecvError};
use log::{debug, error, info};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Instant;

/// Everything the playback scheduler needs for one session
pub struct SchedulerContext {
    pub pictures: Receiver<Picture>,
    pub samples: Receiver<AudioSample>,
    pub commands: Receiver<Command>,
    pub audio_player: SharedAudioPlayer,
    pub observer: Arc<dyn PlayerObserver>,
    /// Used to spawn output pumps into the session
    pub group: TaskGroup,
    pub config: PlayerConfig,
    /// Published for `Player::state()`
    pub state: Arc<RwLock<PlaybackState>>,
    /// Fired once the last picture and the last sample have been played
    pub stop: StopTrigger,
}

struct Scheduler {
    ctx: SchedulerContext,
    pacer: FramePacer,
    state: PlaybackState,
    pump: Option<OutputPumpHandle>,
    presented: usize,
    /// picture queue closed and empty
    video_done: bool,
    /// an output pump found the sample queue closed and empty
    audio_done: bool,
    finished: bool,
}

impl Scheduler {
    fn set_state(&mut self, state: PlaybackState) {
        self.state = state;
        *self.ctx.state.write() = state;
    }

    /// Present the head picture if there is one and arm the next tick
    fn refresh(&mut self) -> Receiver<Instant> {
        match self.ctx.pictures.try_recv() {
            Ok(picture) => {
                let delay = self.pacer.on_picture(picture.pts, Instant::now());
                self.presented += 1;
                if self.presented % 250 == 0 {
                    debug!(
                        "{} 🖼 {} pictures presented, pts {:.3}, next in {:?}",
                        log_ctx(),
                        self.presented,
                        picture.pts,
                        delay
                    );
                }
                self.ctx.observer.on_picture_ready(picture);
                after(delay)
            }
            Err(TryRecvError::Empty) => after(self.ctx.config.retry_poll()),
            Err(TryRecvError::Disconnected) => {
                if !self.video_done {
                    info!("{} 📄 picture queue closed, pacing stopped", log_ctx());
                    self.video_done = true;
                    self.check_end();
                }
                never()
            }
        }
    }

    fn on_pump_exit(&mut self, exit: Option<PumpExit>) {
        match exit {
            Some(PumpExit::Drained) | Some(PumpExit::Failed) => {
                self.audio_done = true;
                self.check_end();
            }
            Some(PumpExit::Stopped) | None => {}
        }
    }

    /// Ends the session once both outputs have run dry
    fn check_end(&mut self) {
        if self.video_done && self.audio_done && !self.finished {
            self.finished = true;
            info!(
                "{} 🏁 playback complete ({} pictures presented)",
                log_ctx(),
                self.presented
            );
            self.ctx.stop.fire("end of stream");
        }
    }

    fn pump_exit(&self) -> Receiver<PumpExit> {
        self.pump.as_ref().map(|p| p.exited()).unwrap_or_else(never)
    }

    fn start_pump(&mut self) -> bool {
        // a pump left over from a pause must be gone before a new one writes
        if let Some(old) = self.pump.take() {
            old.retire();
        }
        match spawn_output_pump(
            &self.ctx.group,
            self.ctx.samples.clone(),
            self.ctx.audio_player.clone(),
        ) {
            Ok(pump) => {
                self.pump = Some(pump);
                true
            }
            Err(e) => {
                error!("{} ❌ failed to start audio output pump: {}", log_ctx(), e);
                false
            }
        }
    }

    fn play(&mut self) -> Option<Receiver<Instant>> {
        if self.state == PlaybackState::Playing {
            debug!("{} ▶ already playing", log_ctx());
            return None;
        }
        if !self.start_pump() {
            return None;
        }
        info!("{} ▶ play", log_ctx());
        self.pacer.reanchor(Instant::now());
        self.set_state(PlaybackState::Playing);
        Some(self.refresh())
    }

    fn pause(&mut self) -> bool {
        if self.state != PlaybackState::Playing {
            debug!("{} ⏸ not playing", log_ctx());
            return false;
        }
        info!("{} ⏸ pause", log_ctx());
        if let Some(pump) = self.pump.as_mut() {
            pump.signal();
        }
        self.set_state(PlaybackState::Paused);
        true
    }
}

/// Playback scheduler (runs on its own thread)
///
/// Paces picture delivery against the frame timer and owns the Play/Pause state machine,
/// starting and stopping the audio output pump with it. Once the picture queue is closed
/// and the pump has written the last sample it asks for the session to stop.
pub fn run_scheduler(ctx: SchedulerContext, cancel: CancelToken) {
    info!("{} ⏱ scheduler started", log_ctx());

    let now = Instant::now();
    let pacer = FramePacer::new(
        now,
        ctx.config.initial_frame_delay(),
        ctx.config.min_frame_delay(),
        ctx.config.max_frame_delay_secs,
    );
    let mut commands = ctx.commands.clone();
    let autoplay = ctx.config.autoplay;
    let first_refresh = ctx.config.first_refresh();

    let mut scheduler = Scheduler {
        ctx,
        pacer,
        state: PlaybackState::Idle,
        pump: None,
        presented: 0,
        video_done: false,
        audio_done: false,
        finished: false,
    };

    let mut timer = never();
    if autoplay && scheduler.start_pump() {
        scheduler.set_state(PlaybackState::Playing);
        timer = after(first_refresh);
    } else {
        scheduler.set_state(PlaybackState::Paused);
    }
    let mut pump_exit = scheduler.pump_exit();

    loop {
        if cancel.is_cancelled() {
            break;
        }
        select! {
            recv(commands) -> cmd => match cmd {
                Ok(Command::Play) => {
                    if let Some(next) = scheduler.play() {
                        timer = next;
                        pump_exit = scheduler.pump_exit();
                    }
                }
                Ok(Command::Pause) => {
                    if scheduler.pause() {
                        timer = never();
                    }
                }
                Err(_) => {
                    debug!("{} command channel closed", log_ctx());
                    commands = never();
                }
            },
            recv(pump_exit) -> exit => {
                pump_exit = never();
                scheduler.on_pump_exit(exit.ok());
            }
            recv(cancel.signal()) -> _ => break,
            recv(timer) -> _ => timer = scheduler.refresh(),
        }
    }

    if let Some(mut pump) = scheduler.pump.take() {
        pump.signal();
    }
    scheduler.set_state(PlaybackState::Idle);
    info!("{} 🛑 scheduler exit ({} pictures presented)", log_ctx(), scheduler.presented);
}
