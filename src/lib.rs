//! Local media playback pipeline: demux, audio/video decode, clock correction and
//! timed picture / PCM delivery.

pub mod core;
pub mod player;

pub use crate::core::{Command, PlaybackState, PlayerConfig, PlayerError, Result};
pub use crate::player::{ChannelObserver, Player, PlayerEvent, PlayerObserver};
