//! Opus encoding for outbound audio tracks.

use audiopus::{coder::Encoder, Application, Channels, SampleRate};
use bytes::Bytes;

use crate::error::{AppError, Result};

/// Maximum encoded Opus frame size
const MAX_OPUS_FRAME: usize = 4000;

/// Opus encoder over 20 ms S16LE interleaved PCM chunks.
pub struct OpusEncoder {
    encoder: Encoder,
    output_buffer: Vec<u8>,
    /// Interleaved samples per 20 ms frame
    frame_samples: usize,
    channels: u16,
}

impl OpusEncoder {
    pub fn new(sample_rate: u32, channels: u16) -> Result<Self> {
        let rate = match sample_rate {
            8000 => SampleRate::Hz8000,
            12000 => SampleRate::Hz12000,
            16000 => SampleRate::Hz16000,
            24000 => SampleRate::Hz24000,
            48000 => SampleRate::Hz48000,
            other => {
                return Err(AppError::Audio(format!(
                    "unsupported Opus sample rate: {other}"
                )))
            }
        };
        let chans = match channels {
            1 => Channels::Mono,
            2 => Channels::Stereo,
            other => {
                return Err(AppError::Audio(format!(
                    "unsupported channel count: {other}"
                )))
            }
        };

        let encoder = Encoder::new(rate, chans, Application::Audio)
            .map_err(|e| AppError::Audio(format!("failed to create Opus encoder: {e:?}")))?;

        Ok(Self {
            encoder,
            output_buffer: vec![0u8; MAX_OPUS_FRAME],
            frame_samples: (sample_rate / 50) as usize * channels as usize,
            channels,
        })
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Encode one chunk. Short chunks are zero-padded up to the 20 ms frame
    /// Opus requires; longer chunks are rejected.
    pub fn encode(&mut self, pcm: &[i16]) -> Result<Bytes> {
        if pcm.len() > self.frame_samples {
            return Err(AppError::Audio(format!(
                "chunk of {} samples exceeds the {}-sample Opus frame",
                pcm.len(),
                self.frame_samples
            )));
        }

        let written = if pcm.len() == self.frame_samples {
            self.encoder
                .encode(pcm, &mut self.output_buffer)
                .map_err(|e| AppError::Audio(format!("Opus encode failed: {e:?}")))?
        } else {
            let mut padded = vec![0i16; self.frame_samples];
            padded[..pcm.len()].copy_from_slice(pcm);
            self.encoder
                .encode(&padded, &mut self.output_buffer)
                .map_err(|e| AppError::Audio(format!("Opus encode failed: {e:?}")))?
        };

        Ok(Bytes::copy_from_slice(&self.output_buffer[..written]))
    }
}
