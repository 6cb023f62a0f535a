use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("session already started")]
    AlreadyStarted,

    #[error("input has no usable video + audio stream pair")]
    NoSuitableStreams,

    #[error("open failed: {0}")]
    OpenFailed(String),

    #[error("decode failed: {0}")]
    DecodeFailed(String),

    #[error("audio sink unavailable: {0}")]
    SinkUnavailable(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(feature = "ffmpeg")]
impl From<ffmpeg_next::Error> for PlayerError {
    fn from(e: ffmpeg_next::Error) -> Self {
        PlayerError::DecodeFailed(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PlayerError>;
