//! Media frame data structures

use bytes::Bytes;

/// Rational time base: seconds per pts tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBase {
    pub num: u32,
    pub den: u32,
}

impl TimeBase {
    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// Presentation time in seconds for a pts expressed in this time base.
    pub fn seconds(&self, pts: i64) -> f64 {
        pts as f64 * self.num as f64 / self.den as f64
    }
}

/// A single uncompressed video frame (BGR24) with timing metadata
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Raw pixel data, `width * height * 3` bytes
    data: Bytes,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Presentation timestamp in `time_base` units
    pub pts: i64,
    /// Time base of `pts`
    pub time_base: TimeBase,
}

impl VideoFrame {
    pub fn new(data: Bytes, width: u32, height: u32, pts: i64, time_base: TimeBase) -> Self {
        Self {
            data,
            width,
            height,
            pts,
            time_base,
        }
    }

    pub fn from_vec(data: Vec<u8>, width: u32, height: u32, pts: i64, time_base: TimeBase) -> Self {
        Self::new(Bytes::from(data), width, height, pts, time_base)
    }

    /// Get frame data as a byte slice
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Get frame data as `Bytes` (cheap clone)
    pub fn data_bytes(&self) -> Bytes {
        self.data.clone()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Presentation time in seconds
    pub fn time(&self) -> f64 {
        self.time_base.seconds(self.pts)
    }
}

/// A chunk of interleaved S16LE PCM audio with timing metadata
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Interleaved samples, `channels` values per frame
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel count
    pub channels: u16,
    /// Presentation timestamp in `time_base` units (sample index)
    pub pts: i64,
    /// Time base of `pts`
    pub time_base: TimeBase,
}

impl AudioFrame {
    pub fn new(
        samples: Vec<i16>,
        sample_rate: u32,
        channels: u16,
        pts: i64,
        time_base: TimeBase,
    ) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
            pts,
            time_base,
        }
    }

    /// Samples per channel in this chunk
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Chunk duration in seconds
    pub fn duration(&self) -> f64 {
        self.frame_count() as f64 / self.sample_rate.max(1) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_base_seconds() {
        let tb = TimeBase::new(1, 30);
        assert_eq!(tb.seconds(0), 0.0);
        assert_eq!(tb.seconds(30), 1.0);
        assert_eq!(tb.seconds(45), 1.5);
    }

    #[test]
    fn video_frame_time_follows_time_base() {
        let frame = VideoFrame::from_vec(vec![0; 12], 2, 2, 90, TimeBase::new(1, 30));
        assert_eq!(frame.time(), 3.0);
        assert_eq!(frame.len(), 12);
    }

    #[test]
    fn audio_frame_duration() {
        let chunk = AudioFrame::new(vec![0i16; 960 * 2], 48_000, 2, 0, TimeBase::new(1, 48_000));
        assert_eq!(chunk.frame_count(), 960);
        assert!((chunk.duration() - 0.02).abs() < 1e-9);
    }
}
