//! Transform wrapper over an upstream video source.

use async_trait::async_trait;

use super::{pipeline, TransformMode};
use crate::error::Result;
use crate::media::frame::VideoFrame;
use crate::media::track::VideoSource;

/// Wraps exactly one upstream video track and rewrites each frame according
/// to the configured mode. Stateless across frames apart from the timing
/// metadata carried by the frames themselves.
pub struct TransformTrack {
    upstream: Box<dyn VideoSource>,
    mode: TransformMode,
}

impl TransformTrack {
    pub fn new(upstream: Box<dyn VideoSource>, mode: TransformMode) -> Self {
        Self { upstream, mode }
    }

    pub fn mode(&self) -> TransformMode {
        self.mode
    }
}

#[async_trait]
impl VideoSource for TransformTrack {
    async fn next_frame(&mut self) -> Result<Option<VideoFrame>> {
        let Some(frame) = self.upstream.next_frame().await? else {
            return Ok(None);
        };
        Ok(Some(pipeline::apply(self.mode, frame)?))
    }
}
