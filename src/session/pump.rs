//! Pump tasks feeding local sources into engine tracks.
//!
//! Each pump suspends on the upstream source's next frame, hands the
//! payload to the engine track, and exits on end-of-stream, engine write
//! failure, per-frame transform failure, or session close. A per-frame
//! error terminates the track; there is no skip-and-continue.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use webrtc::media::Sample;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::audio::OpusEncoder;
use crate::media::track::{AudioSource, VideoSource};

pub fn spawn_video(
    mut source: Box<dyn VideoSource>,
    track: Arc<TrackLocalStaticSample>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut last_pts: Option<i64> = None;
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = source.next_frame() => next,
            };

            match next {
                Ok(Some(frame)) => {
                    let delta = last_pts.map(|p| (frame.pts - p).max(1)).unwrap_or(1);
                    last_pts = Some(frame.pts);
                    let duration = Duration::from_secs_f64(frame.time_base.seconds(delta));

                    let sample = Sample {
                        data: frame.data_bytes(),
                        duration,
                        ..Default::default()
                    };
                    if let Err(e) = track.write_sample(&sample).await {
                        debug!("video track write failed: {e}");
                        break;
                    }
                }
                Ok(None) => {
                    debug!("video source ended");
                    break;
                }
                Err(e) => {
                    error!("video frame processing failed, terminating track: {e}");
                    break;
                }
            }
        }
    });
}

pub fn spawn_audio(
    mut source: Box<dyn AudioSource>,
    track: Arc<TrackLocalStaticSample>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut encoder: Option<OpusEncoder> = None;
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = source.next_chunk() => next,
            };

            match next {
                Ok(Some(chunk)) => {
                    if encoder.is_none() {
                        match OpusEncoder::new(chunk.sample_rate, chunk.channels) {
                            Ok(enc) => encoder = Some(enc),
                            Err(e) => {
                                error!("failed to create Opus encoder: {e}");
                                break;
                            }
                        }
                    }
                    let Some(enc) = encoder.as_mut() else {
                        break;
                    };
                    let payload = match enc.encode(&chunk.samples) {
                        Ok(payload) => payload,
                        Err(e) => {
                            error!("audio encode failed, terminating track: {e}");
                            break;
                        }
                    };

                    let sample = Sample {
                        data: payload,
                        duration: Duration::from_secs_f64(chunk.duration()),
                        ..Default::default()
                    };
                    if let Err(e) = track.write_sample(&sample).await {
                        debug!("audio track write failed: {e}");
                        break;
                    }
                }
                Ok(None) => {
                    debug!("audio source ended");
                    break;
                }
                Err(e) => {
                    error!("audio chunk processing failed, terminating track: {e}");
                    break;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::frame::{TimeBase, VideoFrame};
    use crate::media::track::ChannelVideoSource;
    use crate::session::codecs;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn video_pump_stops_on_cancel() {
        let (tx, rx) = mpsc::channel(1);
        let track = Arc::new(TrackLocalStaticSample::new(
            codecs::vp8_track_capability(),
            "video".to_owned(),
            "rtcam".to_owned(),
        ));
        let cancel = CancellationToken::new();

        spawn_video(Box::new(ChannelVideoSource::new(rx)), track, cancel.clone());
        cancel.cancel();

        // The pump exits without consuming further frames; the channel
        // eventually reports a gone consumer.
        let frame = VideoFrame::from_vec(vec![0; 3], 1, 1, 0, TimeBase::new(1, 30));
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = tx.send(Ok(frame.clone())).await;
        let second = tokio::time::timeout(Duration::from_millis(200), tx.send(Ok(frame))).await;
        match second {
            Ok(Err(_)) | Err(_) => {}
            Ok(Ok(())) => panic!("pump kept consuming after cancel"),
        }
    }
}
