use crate::core::{
    frame_duration, AudioClock, AudioSample, Image, Packet, Picture, Result, SinkFormat,
    StreamInfo, VideoClock, VideoFrame,
};
use crate::player::demuxer_source::{AudioDecoder, PictureConverter, SampleConverter, VideoDecoder};
use crate::player::log_ctx;
use crate::player::task::{CancelToken, StopTrigger};
use crossbeam_channel::{select, Receiver, Sender};
use log::{debug, error, info, warn};
use std::sync::Arc;

/// Codec and conversion context of the video decode stage
pub struct VideoStage {
    pub stream: StreamInfo,
    pub decoder: Box<dyn VideoDecoder>,
    pub converter: Box<dyn PictureConverter>,
}

/// Codec and conversion context of the audio decode stage
pub struct AudioStage {
    pub stream: StreamInfo,
    pub format: SinkFormat,
    pub decoder: Box<dyn AudioDecoder>,
    pub converter: Box<dyn SampleConverter>,
}

/// How a stage loop ended
enum Exit {
    /// input closed or session cancelled
    Done,
    /// codec failure: the session has to stop
    Failed,
}

/// Block for the next packet; `None` once the queue is closed or the session cancelled
fn next_packet(packets: &Receiver<Packet>, cancel: &CancelToken) -> Option<Packet> {
    if cancel.is_cancelled() {
        return None;
    }
    select! {
        recv(packets) -> msg => msg.ok(),
        recv(cancel.signal()) -> _ => None,
    }
}

/// Push downstream; `false` when the session is cancelled or the consumer is gone
fn push<T>(tx: &Sender<T>, item: T, cancel: &CancelToken) -> bool {
    select! {
        send(tx, item) -> res => res.is_ok(),
        recv(cancel.signal()) -> _ => false,
    }
}

fn to_image(frame: &VideoFrame, converter: &mut dyn PictureConverter) -> Result<Image> {
    match Image::from_native(frame)? {
        Some(image) => Ok(image),
        None => converter.to_rgba(frame),
    }
}

/// Video decode stage: packets -> pictures with synchronized pts
///
/// Returns the stage so its codec and converter are released by the controller.
pub fn run_video_stage(
    mut stage: VideoStage,
    packets: Receiver<Packet>,
    pictures: Sender<Picture>,
    cancel: CancelToken,
    stop: StopTrigger,
) -> VideoStage {
    info!("{} 🎞 video decode stage started (stream #{})", log_ctx(), stage.stream.index);

    let mut clock = VideoClock::new();
    let interval = stage.stream.frame_interval();
    let mut frame_count: usize = 0;

    let exit = 'packets: loop {
        let Some(packet) = next_packet(&packets, &cancel) else {
            break Exit::Done;
        };

        let sent = stage.decoder.send_packet(&packet);
        drop(packet);
        if let Err(e) = sent {
            error!("{} ❌ video decode failed: {}", log_ctx(), e);
            break Exit::Failed;
        }

        loop {
            let frame = match stage.decoder.receive_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    error!("{} ❌ video decode failed: {}", log_ctx(), e);
                    break 'packets Exit::Failed;
                }
            };

            let raw_pts = frame
                .best_effort_timestamp
                .map(|ts| stage.stream.ts_to_secs(ts));
            let pts = clock.sync(raw_pts, frame_duration(interval, frame.repeat_pict));

            let image = match to_image(&frame, stage.converter.as_mut()) {
                Ok(image) => image,
                Err(e) => {
                    warn!("{} ⚠ picture dropped: {}", log_ctx(), e);
                    continue;
                }
            };

            frame_count += 1;
            if frame_count % 250 == 0 {
                debug!("{} 🎞 {} pictures decoded, pts {:.3}", log_ctx(), frame_count, pts);
            }

            let picture = Picture { image: Arc::new(image), pts };
            if !push(&pictures, picture, &cancel) {
                break 'packets Exit::Done;
            }
        }
    };

    drop(pictures);
    info!("{} 🛑 video decode stage exit ({} pictures)", log_ctx(), frame_count);
    if let Exit::Failed = exit {
        stop.fire("video decode failure");
    }
    stage
}

/// Audio decode stage: packets -> PCM samples in the sink format
pub fn run_audio_stage(
    mut stage: AudioStage,
    packets: Receiver<Packet>,
    samples: Sender<AudioSample>,
    cancel: CancelToken,
    stop: StopTrigger,
) -> AudioStage {
    info!("{} 🔊 audio decode stage started (stream #{})", log_ctx(), stage.stream.index);

    let mut clock = AudioClock::new();
    let bytes_per_second = stage.format.bytes_per_second();
    let bytes_per_frame = stage.format.bytes_per_frame();
    let mut chunk_count: usize = 0;

    let exit = 'packets: loop {
        let Some(packet) = next_packet(&packets, &cancel) else {
            break Exit::Done;
        };

        clock.on_packet(packet.pts.map(|ts| stage.stream.ts_to_secs(ts)));
        let sent = stage.decoder.send_packet(&packet);
        drop(packet);
        if let Err(e) = sent {
            error!("{} ❌ audio decode failed: {}", log_ctx(), e);
            break Exit::Failed;
        }

        loop {
            let frame = match stage.decoder.receive_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    error!("{} ❌ audio decode failed: {}", log_ctx(), e);
                    break 'packets Exit::Failed;
                }
            };

            let pcm = match stage.converter.to_pcm(&frame) {
                Ok(pcm) => pcm,
                Err(e) => {
                    warn!("{} ⚠ audio frame dropped: {}", log_ctx(), e);
                    continue;
                }
            };
            if pcm.is_empty() {
                continue;
            }

            let pts = clock.advance(pcm.len() as f64 / bytes_per_second);
            let sample = AudioSample {
                num_samples: pcm.len() / bytes_per_frame,
                data: pcm,
                pts,
            };
            chunk_count += 1;
            if !push(&samples, sample, &cancel) {
                break 'packets Exit::Done;
            }
        }
    };

    drop(samples);
    info!("{} 🛑 audio decode stage exit ({} chunks, clock {:.3})", log_ctx(), chunk_count, clock.get());
    if let Exit::Failed = exit {
        stop.fire("audio decode failure");
    }
    stage
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::testing::{
        audio_stream, video_stream, FakeAudioDecoder, FakePictureConverter, FakeSampleConverter,
        FakeVideoDecoder, TestCounters,
    };
    use bytes::Bytes;
    use crossbeam_channel::bounded;
    use parking_lot::Mutex;
    use std::sync::atomic::Ordering;
    use std::thread;
    use std::time::Duration;

    fn trigger() -> (StopTrigger, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (StopTrigger::new(move |r| sink.lock().push(r.to_string())), seen)
    }

    fn video(counters: &Arc<TestCounters>) -> VideoStage {
        // tb 1/25, 25 fps: one tick per frame
        VideoStage {
            stream: video_stream(0),
            decoder: Box::new(FakeVideoDecoder::new(counters.clone())),
            converter: Box::new(FakePictureConverter::new(counters.clone())),
        }
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_unset_timestamp_is_predicted() {
        let counters = TestCounters::new();
        let (packet_tx, packet_rx) = bounded(8);
        let (picture_tx, picture_rx) = bounded(8);
        packet_tx.send(Packet::new(0, Some(25), Bytes::from_static(b"v"))).unwrap();
        packet_tx.send(Packet::new(0, None, Bytes::from_static(b"v"))).unwrap();
        drop(packet_tx);

        let (stop, seen) = trigger();
        run_video_stage(video(&counters), packet_rx, picture_tx, CancelToken::new(), stop);

        let pts: Vec<f64> = picture_rx.iter().map(|p| p.pts).collect();
        assert_eq!(pts.len(), 2);
        assert!(approx(pts[0], 1.0));
        assert!(approx(pts[1], 1.04));
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_native_and_converted_pictures() {
        let counters = TestCounters::new();
        let (packet_tx, packet_rx) = bounded(8);
        let (picture_tx, picture_rx) = bounded(8);
        packet_tx.send(Packet::new(0, Some(1), Bytes::from_static(b"v"))).unwrap();
        packet_tx.send(Packet::new(0, Some(2), Bytes::from_static(b"nv12"))).unwrap();
        drop(packet_tx);

        let (stop, _) = trigger();
        run_video_stage(video(&counters), packet_rx, picture_tx, CancelToken::new(), stop);

        let pictures: Vec<_> = picture_rx.iter().collect();
        assert!(matches!(*pictures[0].image, Image::YCbCr(_)));
        assert!(matches!(*pictures[1].image, Image::Rgba(_)));
        assert_eq!(counters.conversions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_decode_failure_closes_output_and_requests_stop() {
        let counters = TestCounters::new();
        let (packet_tx, packet_rx) = bounded(8);
        let (picture_tx, picture_rx) = bounded(8);
        packet_tx.send(Packet::new(0, Some(1), Bytes::from_static(b"v"))).unwrap();
        packet_tx.send(Packet::new(0, Some(2), Bytes::from_static(b"corrupt"))).unwrap();
        packet_tx.send(Packet::new(0, Some(3), Bytes::from_static(b"v"))).unwrap();

        let (stop, seen) = trigger();
        let stage = run_video_stage(video(&counters), packet_rx, picture_tx, CancelToken::new(), stop);

        assert_eq!(picture_rx.iter().count(), 1);
        assert_eq!(*seen.lock(), vec!["video decode failure".to_string()]);
        // the stage hands its contexts back for release
        assert_eq!(counters.decoders_open.load(Ordering::SeqCst), 1);
        drop(stage);
        assert_eq!(counters.decoders_open.load(Ordering::SeqCst), 0);
        drop(packet_tx);
    }

    #[test]
    fn test_cancel_unblocks_full_picture_queue() {
        let counters = TestCounters::new();
        let (packet_tx, packet_rx) = bounded(8);
        let (picture_tx, _picture_rx) = bounded(0);
        packet_tx.send(Packet::new(0, Some(1), Bytes::from_static(b"v"))).unwrap();

        let cancel = CancelToken::new();
        let (stop, seen) = trigger();
        let stage = video(&counters);
        let worker = {
            let cancel = cancel.clone();
            thread::spawn(move || run_video_stage(stage, packet_rx, picture_tx, cancel, stop))
        };
        thread::sleep(Duration::from_millis(30));
        cancel.cancel();
        worker.join().unwrap();
        assert!(seen.lock().is_empty());
        drop(packet_tx);
    }

    #[test]
    fn test_audio_clock_follows_packets() {
        let counters = TestCounters::new();
        let stage = AudioStage {
            // tb 1/48000
            stream: audio_stream(1),
            format: SinkFormat { sample_rate: 48_000, channels: 2 },
            decoder: Box::new(FakeAudioDecoder::new(counters.clone())),
            converter: Box::new(FakeSampleConverter::new(counters.clone())),
        };
        let (packet_tx, packet_rx) = bounded(8);
        let (sample_tx, sample_rx) = bounded(8);
        packet_tx.send(Packet::new(1, Some(48_000), Bytes::from_static(b"a"))).unwrap();
        packet_tx.send(Packet::new(1, None, Bytes::from_static(b"a"))).unwrap();
        drop(packet_tx);

        let (stop, _) = trigger();
        run_audio_stage(stage, packet_rx, sample_tx, CancelToken::new(), stop);

        let samples: Vec<_> = sample_rx.iter().collect();
        assert_eq!(samples.len(), 2);
        // 1024 stereo s16 frames at 48 kHz
        let chunk = 1024.0 / 48_000.0;
        assert!(approx(samples[0].pts, 1.0));
        assert!(approx(samples[1].pts, 1.0 + chunk));
        assert_eq!(samples[0].num_samples, 1024);
    }
}
