//! Recording sink for inbound media.
//!
//! Each session owns one sink, chosen at creation time: a blackhole that
//! reads and discards, or a file sink writing inbound RTP into the engine's
//! container formats (`<base>.ivf` for video, `<base>.ogg` for audio).
//! Tracks attach as they arrive but nothing is consumed until `start()`;
//! the first track to hit end-of-stream stops the sink, and stop happens
//! exactly once no matter how many tracks end.

use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use webrtc::media::io::ivf_reader::IVFFileHeader;
use webrtc::media::io::ivf_writer::IVFWriter;
use webrtc::media::io::ogg_writer::OggWriter;
use webrtc::media::io::Writer;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_remote::TrackRemote;

use crate::error::{AppError, Result};

/// Dimensions advertised in the IVF header, matching the capture defaults.
const IVF_WIDTH: u16 = 640;
const IVF_HEIGHT: u16 = 480;
const IVF_FPS: u32 = 30;

const OGG_SAMPLE_RATE: u32 = 48_000;
const OGG_CHANNELS: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SinkState {
    Created,
    Started,
    Stopped,
}

enum Sink {
    Blackhole,
    File { base: PathBuf },
}

/// Per-session recording sink.
pub struct Recorder {
    sink: Sink,
    state: watch::Sender<SinkState>,
    stopped: AtomicBool,
}

impl Recorder {
    /// A sink that consumes and discards inbound media.
    pub fn blackhole() -> Arc<Self> {
        Arc::new(Self {
            sink: Sink::Blackhole,
            state: watch::channel(SinkState::Created).0,
            stopped: AtomicBool::new(false),
        })
    }

    /// A sink that writes inbound media next to `base`.
    pub fn to_file(base: PathBuf) -> Arc<Self> {
        Arc::new(Self {
            sink: Sink::File { base },
            state: watch::channel(SinkState::Created).0,
            stopped: AtomicBool::new(false),
        })
    }

    pub fn is_file_backed(&self) -> bool {
        matches!(self.sink, Sink::File { .. })
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Begin consuming attached tracks. For the file sink the target
    /// directory must be creatable; failures propagate to the caller.
    pub async fn start(&self) -> Result<()> {
        if let Sink::File { base } = &self.sink {
            if let Some(parent) = base.parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
        }
        let _ = self.state.send(SinkState::Started);
        Ok(())
    }

    /// Stop the sink. Only the first call acts; the return value reports
    /// whether this call performed the stop.
    pub async fn stop(&self) -> Result<bool> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }
        let _ = self.state.send(SinkState::Stopped);
        Ok(true)
    }

    /// Attach an inbound track. A reader task consumes it once the sink has
    /// started; when the track signals end-of-stream the sink is stopped.
    pub fn add_track(self: &Arc<Self>, track: Arc<TrackRemote>) {
        let recorder = self.clone();
        tokio::spawn(async move {
            let mut state_rx = recorder.state.subscribe();
            loop {
                match *state_rx.borrow() {
                    SinkState::Started => break,
                    SinkState::Stopped => return,
                    SinkState::Created => {}
                }
                if state_rx.changed().await.is_err() {
                    return;
                }
            }

            let kind = track.kind();
            let mut writer = match recorder.open_writer(&track) {
                Ok(writer) => writer,
                Err(e) => {
                    error!("failed to open recording writer for {kind} track: {e}");
                    None
                }
            };

            loop {
                tokio::select! {
                    result = track.read_rtp() => match result {
                        Ok((packet, _attributes)) => {
                            if let Some(w) = writer.as_mut() {
                                if let Err(e) = w.write_rtp(&packet) {
                                    error!("recording write failed: {e}");
                                    break;
                                }
                            }
                        }
                        Err(err) => {
                            debug!("{kind} track read ended: {err}");
                            break;
                        }
                    },
                    _ = until_stopped(recorder.state.subscribe()) => break,
                }
            }

            if let Some(mut w) = writer.take() {
                if let Err(e) = w.close() {
                    error!("failed to finalize recording: {e}");
                }
            }

            info!("Track {kind} ended");
            match recorder.stop().await {
                Ok(true) => debug!("recording sink stopped"),
                Ok(false) => {}
                Err(e) => error!("recording sink stop failed: {e}"),
            }
        });
    }

    fn open_writer(&self, track: &TrackRemote) -> Result<Option<Box<dyn Writer + Send>>> {
        let Sink::File { base } = &self.sink else {
            return Ok(None);
        };

        match track.kind() {
            RTPCodecType::Video => {
                let path = base.with_extension("ivf");
                let file = File::create(&path)?;
                let writer = IVFWriter::new(
                    file,
                    &IVFFileHeader {
                        signature: *b"DKIF",
                        version: 0,
                        header_size: 32,
                        fourcc: *b"VP80",
                        width: IVF_WIDTH,
                        height: IVF_HEIGHT,
                        timebase_denominator: IVF_FPS,
                        timebase_numerator: 1,
                        num_frames: 0,
                        unused: 0,
                    },
                )
                .map_err(|e| AppError::Recording(e.to_string()))?;
                info!("recording video to {}", path.display());
                Ok(Some(Box::new(writer)))
            }
            RTPCodecType::Audio => {
                let path = base.with_extension("ogg");
                let file = File::create(&path)?;
                let writer = OggWriter::new(file, OGG_SAMPLE_RATE, OGG_CHANNELS)
                    .map_err(|e| AppError::Recording(e.to_string()))?;
                info!("recording audio to {}", path.display());
                Ok(Some(Box::new(writer)))
            }
            _ => {
                warn!("not recording track of unspecified kind");
                Ok(None)
            }
        }
    }
}

async fn until_stopped(mut rx: watch::Receiver<SinkState>) {
    loop {
        if *rx.borrow() == SinkState::Stopped {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
