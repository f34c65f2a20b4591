//! Per-session media source resolution.

use std::path::Path;

use super::capture::SharedCapture;
use super::replay;
use super::track::{AudioSource, VideoSource};
use crate::error::Result;

/// A session's outbound sources; either side may be absent.
pub struct MediaSources {
    pub audio: Option<Box<dyn AudioSource>>,
    pub video: Option<Box<dyn VideoSource>>,
}

/// Resolve outbound sources for one session. Replay mode opens a fresh
/// reader; live mode subscribes to the shared capture handle (opening the
/// devices on first use). Open failures abort session creation.
pub async fn resolve(
    play_from: Option<&Path>,
    capture: &SharedCapture,
) -> Result<MediaSources> {
    match play_from {
        Some(path) => {
            let sources = replay::open(path)?;
            Ok(MediaSources {
                audio: sources.audio,
                video: sources.video,
            })
        }
        None => {
            let (audio, video) = capture.subscribe().await?;
            Ok(MediaSources {
                audio: Some(Box::new(audio)),
                video: Some(Box::new(video)),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::capture::{CaptureHandle, CaptureSpec};
    use tokio::sync::broadcast;

    fn stub_capture() -> SharedCapture {
        SharedCapture::with_opener(
            CaptureSpec::platform_default(),
            Box::new(|_spec| {
                Box::pin(async {
                    let (audio_tx, _) = broadcast::channel(4);
                    let (video_tx, _) = broadcast::channel(4);
                    Ok(CaptureHandle::new(audio_tx, video_tx))
                })
            }),
        )
    }

    #[tokio::test]
    async fn live_mode_yields_both_sources() {
        let capture = stub_capture();
        let sources = resolve(None, &capture).await.unwrap();
        assert!(sources.audio.is_some());
        assert!(sources.video.is_some());
    }

    #[tokio::test]
    async fn replay_mode_never_touches_the_capture_devices() {
        let capture = stub_capture();
        let missing = Path::new("/nonexistent/clip.y4m");
        assert!(resolve(Some(missing), &capture).await.is_err());
        assert!(!capture.is_open());
    }
}
