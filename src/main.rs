use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{never, select, unbounded};
use log::{info, warn};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use myy_sync_player::player::{CpalAudio, FfmpegBackend};
use myy_sync_player::{ChannelObserver, PlaybackState, Player, PlayerConfig, PlayerEvent};

/// Play a local media file through the sync pipeline
#[derive(Parser, Debug)]
#[command(name = "myy-sync-player", version)]
struct Args {
    /// Media file to play
    file: PathBuf,

    /// JSON file with pipeline settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Start paused
    #[arg(long)]
    paused: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    info!("🎬 myy-sync-player starting: {}", args.file.display());

    let mut config = match &args.config {
        Some(path) => PlayerConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PlayerConfig::default(),
    };
    if args.paused {
        config.autoplay = false;
    }

    let backend = FfmpegBackend::new().context("FFmpeg initialization failed")?;
    info!("✅ FFmpeg ready");

    let (observer, events) = ChannelObserver::new();
    let player = Player::new(
        &args.file,
        config,
        Arc::new(backend),
        Arc::new(CpalAudio::new()),
        Arc::new(observer),
    );
    player.start().context("failed to start playback")?;

    // p: play/pause, s or q: stop
    let (line_tx, mut line_rx) = unbounded::<String>();
    thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines().map_while(|l| l.ok()) {
                if line_tx.send(line).is_err() {
                    break;
                }
            }
        })
        .context("failed to spawn stdin reader")?;

    let mut pictures: u64 = 0;
    loop {
        select! {
            recv(events) -> event => match event {
                Ok(PlayerEvent::PictureReady(picture)) => {
                    pictures += 1;
                    if pictures % 100 == 0 {
                        info!(
                            "🖼 picture #{} pts {:.3} ({}x{})",
                            pictures,
                            picture.pts,
                            picture.image.width(),
                            picture.image.height()
                        );
                    }
                }
                Ok(PlayerEvent::StateChanged { started: true, duration }) => {
                    info!("▶ playing, duration {:.1}s", duration.as_secs_f64());
                }
                Ok(PlayerEvent::StateChanged { started: false, .. }) | Err(_) => break,
            },
            recv(line_rx) -> line => match line.as_deref().map(str::trim) {
                Ok("p") => match player.state() {
                    PlaybackState::Playing => player.pause(),
                    _ => player.play(),
                },
                Ok("s") | Ok("q") => player.stop(),
                Ok(other) => warn!("unknown command {:?} (p = play/pause, s/q = stop)", other),
                Err(_) => {
                    // stdin closed: keep playing until the end
                    line_rx = never();
                }
            },
        }
    }

    info!("🛑 done, {} pictures presented", pictures);
    Ok(())
}
