//! Pull-based media source tracks.
//!
//! A source yields frames one at a time; `Ok(None)` is the end-of-stream
//! signal. Callers suspend on the next frame rather than polling.

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use super::frame::{AudioFrame, VideoFrame};
use crate::error::Result;

#[async_trait]
pub trait VideoSource: Send {
    /// Await the next frame from this source. `Ok(None)` means the stream
    /// has ended and no further frames will be produced.
    async fn next_frame(&mut self) -> Result<Option<VideoFrame>>;
}

#[async_trait]
pub trait AudioSource: Send {
    /// Await the next PCM chunk. `Ok(None)` means end of stream.
    async fn next_chunk(&mut self) -> Result<Option<AudioFrame>>;
}

/// Video subscription to the shared capture handle. Slow subscribers skip
/// frames instead of stalling the capture fan-out.
pub struct SubscriptionVideoSource {
    rx: broadcast::Receiver<VideoFrame>,
}

impl SubscriptionVideoSource {
    pub fn new(rx: broadcast::Receiver<VideoFrame>) -> Self {
        Self { rx }
    }
}

#[async_trait]
impl VideoSource for SubscriptionVideoSource {
    async fn next_frame(&mut self) -> Result<Option<VideoFrame>> {
        loop {
            match self.rx.recv().await {
                Ok(frame) => return Ok(Some(frame)),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("video subscription lagged by {} frames", n);
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(None),
            }
        }
    }
}

/// Audio subscription to the shared capture handle.
pub struct SubscriptionAudioSource {
    rx: broadcast::Receiver<AudioFrame>,
}

impl SubscriptionAudioSource {
    pub fn new(rx: broadcast::Receiver<AudioFrame>) -> Self {
        Self { rx }
    }
}

#[async_trait]
impl AudioSource for SubscriptionAudioSource {
    async fn next_chunk(&mut self) -> Result<Option<AudioFrame>> {
        loop {
            match self.rx.recv().await {
                Ok(chunk) => return Ok(Some(chunk)),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("audio subscription lagged by {} chunks", n);
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(None),
            }
        }
    }
}

/// Video source fed by an owned channel (file replay readers).
pub struct ChannelVideoSource {
    rx: mpsc::Receiver<Result<VideoFrame>>,
}

impl ChannelVideoSource {
    pub fn new(rx: mpsc::Receiver<Result<VideoFrame>>) -> Self {
        Self { rx }
    }
}

#[async_trait]
impl VideoSource for ChannelVideoSource {
    async fn next_frame(&mut self) -> Result<Option<VideoFrame>> {
        match self.rx.recv().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(err)) => Err(err),
            None => Ok(None),
        }
    }
}

/// Audio source fed by an owned channel (file replay readers).
pub struct ChannelAudioSource {
    rx: mpsc::Receiver<Result<AudioFrame>>,
}

impl ChannelAudioSource {
    pub fn new(rx: mpsc::Receiver<Result<AudioFrame>>) -> Self {
        Self { rx }
    }
}

#[async_trait]
impl AudioSource for ChannelAudioSource {
    async fn next_chunk(&mut self) -> Result<Option<AudioFrame>> {
        match self.rx.recv().await {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(err)) => Err(err),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::frame::TimeBase;

    #[tokio::test]
    async fn channel_source_yields_then_ends() {
        let (tx, rx) = mpsc::channel(2);
        let mut source = ChannelVideoSource::new(rx);

        tx.send(Ok(VideoFrame::from_vec(
            vec![0; 3],
            1,
            1,
            0,
            TimeBase::new(1, 30),
        )))
        .await
        .unwrap();
        drop(tx);

        assert!(source.next_frame().await.unwrap().is_some());
        assert!(source.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn subscription_source_ends_when_sender_drops() {
        let (tx, rx) = broadcast::channel(4);
        let mut source = SubscriptionVideoSource::new(rx);

        tx.send(VideoFrame::from_vec(vec![0; 3], 1, 1, 0, TimeBase::new(1, 30)))
            .unwrap();
        drop(tx);

        assert!(source.next_frame().await.unwrap().is_some());
        assert!(source.next_frame().await.unwrap().is_none());
    }
}
