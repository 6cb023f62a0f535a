use std::time::{Duration, Instant};

/// Display duration of one frame: the stream's frame interval plus half an interval
/// per repeated field.
pub fn frame_duration(frame_interval: f64, repeat_pict: i32) -> f64 {
    frame_interval + repeat_pict as f64 * (frame_interval * 0.5)
}

/// Video clock - predicts the pts of the next frame when the container leaves it unset
///
/// Written only by the video decode stage.
#[derive(Debug, Default)]
pub struct VideoClock {
    clock: f64,
}

impl VideoClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the synchronized pts for a frame and advances the clock by `delay`.
    ///
    /// A present, non-zero `pts` resets the clock; otherwise the frame is assumed to
    /// continue right after the previous one.
    pub fn sync(&mut self, pts: Option<f64>, delay: f64) -> f64 {
        let pts = match pts {
            Some(pts) if pts != 0.0 => {
                self.clock = pts;
                pts
            }
            _ => self.clock,
        };
        self.clock += delay;
        pts
    }

    pub fn get(&self) -> f64 {
        self.clock
    }
}

/// Audio clock - last known packet pts plus the duration of audio decoded since
///
/// Written only by the audio decode stage.
#[derive(Debug, Default)]
pub struct AudioClock {
    clock: f64,
}

impl AudioClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_packet(&mut self, pts: Option<f64>) {
        if let Some(pts) = pts {
            if pts != 0.0 {
                self.clock = pts;
            }
        }
    }

    /// Advance by `secs` of decoded audio, returning the pre-advance clock
    pub fn advance(&mut self, secs: f64) -> f64 {
        let pts = self.clock;
        self.clock += secs;
        pts
    }

    pub fn get(&self) -> f64 {
        self.clock
    }
}

/// Frame pacing state of the playback scheduler
///
/// `frame_timer` accumulates the accepted inter-frame delays instead of being reset
/// from the wall clock, so wake-up jitter does not feed back into the schedule.
#[derive(Debug)]
pub struct FramePacer {
    frame_timer: Instant,
    frame_last_pts: f64,
    frame_last_delay: f64,
    current_pts: f64,
    current_pts_time: Instant,
    min_delay: Duration,
    max_delay: f64,
}

impl FramePacer {
    pub fn new(now: Instant, initial_delay: Duration, min_delay: Duration, max_delay: f64) -> Self {
        Self {
            frame_timer: now,
            frame_last_pts: 0.0,
            frame_last_delay: initial_delay.as_secs_f64(),
            current_pts: 0.0,
            current_pts_time: now,
            min_delay,
            max_delay,
        }
    }

    /// Account for a picture about to be presented; returns how long to wait before
    /// the next refresh.
    pub fn on_picture(&mut self, pts: f64, now: Instant) -> Duration {
        self.current_pts = pts;
        self.current_pts_time = now;

        let raw_delay = pts - self.frame_last_pts;
        // also rejects NaN
        let delay = if raw_delay > 0.0 && raw_delay < self.max_delay {
            self.frame_last_delay = raw_delay;
            raw_delay
        } else {
            self.frame_last_delay
        };
        self.frame_last_pts = pts;

        self.frame_timer += Duration::from_secs_f64(delay.max(0.0));
        self.frame_timer
            .saturating_duration_since(now)
            .max(self.min_delay)
    }

    /// Restart the schedule from `now` (after a pause)
    pub fn reanchor(&mut self, now: Instant) {
        self.frame_timer = now;
    }

    /// Interpolated position of the picture on screen
    pub fn video_clock(&self, now: Instant) -> f64 {
        self.current_pts + now.saturating_duration_since(self.current_pts_time).as_secs_f64()
    }

    pub fn frame_timer(&self) -> Instant {
        self.frame_timer
    }

    pub fn frame_last_delay(&self) -> f64 {
        self.frame_last_delay
    }

    pub fn frame_last_pts(&self) -> f64 {
        self.frame_last_pts
    }
}
