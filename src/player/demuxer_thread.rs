use crate::core::Packet;
use crate::player::demuxer_source::InputFormat;
use crate::player::log_ctx;
use crate::player::task::CancelToken;
use crossbeam_channel::{select, Sender};
use log::{debug, error, info, warn};

/// Where the demux pump routes packets
pub struct DemuxRoutes {
    pub video_index: usize,
    pub audio_index: usize,
    pub video_tx: Sender<Packet>,
    pub audio_tx: Sender<Packet>,
}

/// Demux pump (runs on its own thread)
///
/// - `select!` over send and the cancel signal: a full queue blocks the pump (backpressure)
///   without making it deaf to cancellation.
/// - packets of unselected streams are dropped (released) right away.
/// - on end of stream both queues are closed (senders dropped) and the stages downstream
///   drain what is left; the scheduler ends the session once playback has caught up.
/// - a read error is not retried and ends the stream the same way.
///
/// Returns the input so the controller can release it after the join.
pub fn run_demux_pump(
    mut input: Box<dyn InputFormat>,
    routes: DemuxRoutes,
    cancel: CancelToken,
) -> Box<dyn InputFormat> {
    info!("{} 🎬 demux pump started: {}", log_ctx(), input.description());

    let DemuxRoutes {
        video_index,
        audio_index,
        video_tx,
        audio_tx,
    } = routes;

    let mut video_packet_count: usize = 0;
    let mut audio_packet_count: usize = 0;
    let mut dropped_count: usize = 0;
    const LOG_FIRST_N: usize = 5;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let packet = match input.read_packet() {
            Ok(Some(packet)) => packet,
            Ok(None) => {
                info!("{} 📄 demux reached end of stream", log_ctx());
                break;
            }
            Err(e) => {
                error!("{} ❌ read packet failed, ending stream: {}", log_ctx(), e);
                break;
            }
        };

        let tx = if packet.stream_index == video_index {
            video_packet_count += 1;
            if video_packet_count <= LOG_FIRST_N || video_packet_count % 100 == 0 {
                debug!("{} 📦 video packet #{}", log_ctx(), video_packet_count);
            }
            &video_tx
        } else if packet.stream_index == audio_index {
            audio_packet_count += 1;
            if audio_packet_count <= LOG_FIRST_N || audio_packet_count % 100 == 0 {
                debug!("{} 🔊 audio packet #{}", log_ctx(), audio_packet_count);
            }
            &audio_tx
        } else {
            dropped_count += 1;
            continue;
        };

        select! {
            send(tx, packet) -> res => {
                if res.is_err() {
                    warn!("{} ⚠ packet queue receiver gone", log_ctx());
                    break;
                }
            }
            recv(cancel.signal()) -> _ => break,
        }
    }

    drop(video_tx);
    drop(audio_tx);

    info!(
        "{} 🛑 demux pump exit ({} video, {} audio, {} dropped)",
        log_ctx(),
        video_packet_count,
        audio_packet_count,
        dropped_count
    );

    input
}
