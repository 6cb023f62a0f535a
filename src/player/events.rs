use crate::core::Picture;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::time::Duration;

/// UI-side callbacks
///
/// Called from pipeline threads; implementations marshal to their own UI context and
/// must not block.
pub trait PlayerObserver: Send + Sync {
    /// A picture is due for display now
    ///
    /// Runs on the scheduler thread, which `Player::stop` joins: calling `stop` from here
    /// deadlocks.
    fn on_picture_ready(&self, picture: Picture);

    /// Session started (`true`, with the media duration) or stopped (`false`)
    ///
    /// Delivered in order, after the session lock is released; querying the player from
    /// here is fine.
    fn on_state_changed(&self, started: bool, duration: Duration);
}

#[derive(Debug, Clone)]
pub enum PlayerEvent {
    PictureReady(Picture),
    StateChanged { started: bool, duration: Duration },
}

/// Forwards every callback as a `PlayerEvent` over an unbounded channel
pub struct ChannelObserver {
    tx: Sender<PlayerEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, Receiver<PlayerEvent>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }
}

impl PlayerObserver for ChannelObserver {
    fn on_picture_ready(&self, picture: Picture) {
        // receiver gone means the UI is shutting down
        let _ = self.tx.send(PlayerEvent::PictureReady(picture));
    }

    fn on_state_changed(&self, started: bool, duration: Duration) {
        let _ = self.tx.send(PlayerEvent::StateChanged { started, duration });
    }
}
