//! Shared live-capture handle.
//!
//! The process owns at most one physical microphone/camera open of each
//! kind. The handle is created lazily on first use under a single
//! initialization guard and fanned out to every live-mode session through
//! broadcast subscriptions; subscribing never re-opens a device.

use futures::future::BoxFuture;
use tokio::sync::{broadcast, OnceCell};

use super::frame::{AudioFrame, VideoFrame};
use super::track::{SubscriptionAudioSource, SubscriptionVideoSource};
use crate::error::Result;

#[cfg(not(target_os = "linux"))]
use crate::error::AppError;

/// Capture parameters requested from the device
#[derive(Debug, Clone, Copy)]
pub struct CaptureOptions {
    pub framerate: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            framerate: 30,
            width: 640,
            height: 480,
        }
    }
}

/// Capture backend selection: one branch per OS family, naming the
/// platform capture API and its default device identifier.
#[derive(Debug, Clone)]
pub struct CaptureSpec {
    pub backend: &'static str,
    pub video_device: String,
    pub audio_device: String,
    pub options: CaptureOptions,
}

impl CaptureSpec {
    #[cfg(target_os = "macos")]
    pub fn platform_default() -> Self {
        Self {
            backend: "avfoundation",
            video_device: "default:none".to_string(),
            audio_device: "default".to_string(),
            options: CaptureOptions::default(),
        }
    }

    #[cfg(target_os = "windows")]
    pub fn platform_default() -> Self {
        Self {
            backend: "dshow",
            video_device: "video=Integrated Camera".to_string(),
            audio_device: "default".to_string(),
            options: CaptureOptions::default(),
        }
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    pub fn platform_default() -> Self {
        Self {
            backend: "v4l2",
            video_device: "/dev/video0".to_string(),
            audio_device: "default".to_string(),
            options: CaptureOptions::default(),
        }
    }
}

/// The one physical device open, fanning frames out to subscribers.
pub struct CaptureHandle {
    audio_tx: broadcast::Sender<AudioFrame>,
    video_tx: broadcast::Sender<VideoFrame>,
}

impl CaptureHandle {
    pub fn new(
        audio_tx: broadcast::Sender<AudioFrame>,
        video_tx: broadcast::Sender<VideoFrame>,
    ) -> Self {
        Self { audio_tx, video_tx }
    }

    /// Independent consumer handles onto the shared device streams.
    pub fn subscribe(&self) -> (SubscriptionAudioSource, SubscriptionVideoSource) {
        (
            SubscriptionAudioSource::new(self.audio_tx.subscribe()),
            SubscriptionVideoSource::new(self.video_tx.subscribe()),
        )
    }
}

type OpenFuture = BoxFuture<'static, Result<CaptureHandle>>;
type Opener = Box<dyn Fn(CaptureSpec) -> OpenFuture + Send + Sync>;

/// Once-initialized shared capture resource.
pub struct SharedCapture {
    spec: CaptureSpec,
    opener: Opener,
    handle: OnceCell<CaptureHandle>,
}

impl SharedCapture {
    pub fn new(spec: CaptureSpec) -> Self {
        Self::with_opener(spec, Box::new(default_opener))
    }

    /// Construct with a custom device opener. The opener runs at most once
    /// for the lifetime of this value; tests use it to count opens.
    pub fn with_opener(spec: CaptureSpec, opener: Opener) -> Self {
        Self {
            spec,
            opener,
            handle: OnceCell::new(),
        }
    }

    /// Subscribe to the shared device streams, opening the devices on the
    /// first call. Concurrent first callers share a single open; open
    /// failures surface to the caller and are not retried here.
    pub async fn subscribe(&self) -> Result<(SubscriptionAudioSource, SubscriptionVideoSource)> {
        let handle = self
            .handle
            .get_or_try_init(|| (self.opener)(self.spec.clone()))
            .await?;
        Ok(handle.subscribe())
    }

    pub fn is_open(&self) -> bool {
        self.handle.initialized()
    }

    pub fn spec(&self) -> &CaptureSpec {
        &self.spec
    }
}

fn default_opener(spec: CaptureSpec) -> OpenFuture {
    Box::pin(async move {
        #[cfg(target_os = "linux")]
        {
            linux::open(spec).await
        }
        #[cfg(not(target_os = "linux"))]
        {
            Err(AppError::Capture {
                backend: spec.backend.to_string(),
                reason: "live capture is not implemented for this host platform".to_string(),
            })
        }
    })
}

#[cfg(target_os = "linux")]
mod linux {
    use std::sync::mpsc as std_mpsc;

    use tokio::sync::broadcast;
    use tracing::{error, info, warn};
    use v4l::buffer::Type;
    use v4l::io::mmap::Stream;
    use v4l::io::traits::CaptureStream;
    use v4l::video::capture::Parameters;
    use v4l::video::Capture;
    use v4l::{Device, Format, FourCC};

    use super::{CaptureHandle, CaptureSpec};
    use crate::error::{AppError, Result};
    use crate::media::convert::yuyv_to_bgr24;
    use crate::media::frame::{AudioFrame, TimeBase, VideoFrame};

    const CAPTURE_BUFFERS: u32 = 2;
    const AUDIO_SAMPLE_RATE: u32 = 48_000;
    const AUDIO_CHANNELS: u16 = 2;
    /// 20 ms at 48 kHz, one Opus frame
    const AUDIO_CHUNK_FRAMES: usize = 960;

    pub(super) async fn open(spec: CaptureSpec) -> Result<CaptureHandle> {
        tokio::task::spawn_blocking(move || {
            let (video_tx, _) = broadcast::channel(8);
            let (audio_tx, _) = broadcast::channel(64);
            start_camera(&spec, video_tx.clone())?;
            start_microphone(&spec, audio_tx.clone())?;
            info!(
                "capture devices opened [{}]: video={} audio={}",
                spec.backend, spec.video_device, spec.audio_device
            );
            Ok(CaptureHandle::new(audio_tx, video_tx))
        })
        .await
        .map_err(|e| AppError::Internal(format!("capture open task failed: {e}")))?
    }

    fn capture_error(spec: &CaptureSpec, reason: String) -> AppError {
        AppError::Capture {
            backend: spec.backend.to_string(),
            reason,
        }
    }

    /// Spawn the camera thread and wait for its open result, so a missing
    /// or busy device fails the caller instead of a background task.
    fn start_camera(spec: &CaptureSpec, tx: broadcast::Sender<VideoFrame>) -> Result<()> {
        let (ready_tx, ready_rx) = std_mpsc::sync_channel(1);
        let spec = spec.clone();
        std::thread::Builder::new()
            .name("rtcam-camera".to_string())
            .spawn(move || camera_loop(spec, tx, ready_tx))?;
        ready_rx
            .recv()
            .map_err(|_| AppError::Internal("camera thread exited before reporting".to_string()))?
    }

    fn camera_loop(
        spec: CaptureSpec,
        tx: broadcast::Sender<VideoFrame>,
        ready_tx: std_mpsc::SyncSender<Result<()>>,
    ) {
        let device = match Device::with_path(&spec.video_device) {
            Ok(device) => device,
            Err(e) => {
                let _ = ready_tx.send(Err(capture_error(
                    &spec,
                    format!("failed to open {}: {e}", spec.video_device),
                )));
                return;
            }
        };

        let wanted = Format::new(
            spec.options.width,
            spec.options.height,
            FourCC::new(b"BGR3"),
        );
        let format = match device.set_format(&wanted) {
            Ok(format) => format,
            Err(e) => {
                let _ = ready_tx.send(Err(capture_error(
                    &spec,
                    format!("failed to set capture format: {e}"),
                )));
                return;
            }
        };

        let bgr3 = FourCC::new(b"BGR3");
        let rgb3 = FourCC::new(b"RGB3");
        let yuyv = FourCC::new(b"YUYV");
        if format.fourcc != bgr3 && format.fourcc != rgb3 && format.fourcc != yuyv {
            let _ = ready_tx.send(Err(capture_error(
                &spec,
                format!("unsupported capture pixel format: {}", format.fourcc),
            )));
            return;
        }

        if let Err(e) = device.set_params(&Parameters::with_fps(spec.options.framerate)) {
            warn!("failed to set capture frame rate: {e}");
        }

        let mut stream = match Stream::with_buffers(&device, Type::VideoCapture, CAPTURE_BUFFERS) {
            Ok(stream) => stream,
            Err(e) => {
                let _ = ready_tx.send(Err(capture_error(
                    &spec,
                    format!("failed to start capture stream: {e}"),
                )));
                return;
            }
        };

        let _ = ready_tx.send(Ok(()));
        info!(
            "camera streaming: {} {}x{} {}",
            spec.video_device, format.width, format.height, format.fourcc
        );

        let (width, height) = (format.width, format.height);
        let time_base = TimeBase::new(1, spec.options.framerate.max(1));
        let packed_len = (width * height * 3) as usize;
        let mut pts = 0i64;

        loop {
            let (data, _meta) = match stream.next() {
                Ok(buf) => buf,
                Err(e) => {
                    error!("camera capture failed: {e}");
                    break;
                }
            };

            let bgr = if format.fourcc == yuyv {
                yuyv_to_bgr24(data, width, height)
            } else {
                // Packed 24-bit formats pass straight through.
                if data.len() < packed_len {
                    warn!("short camera frame: {} of {} bytes", data.len(), packed_len);
                    continue;
                }
                data[..packed_len].to_vec()
            };

            let frame = VideoFrame::from_vec(bgr, width, height, pts, time_base);
            pts += 1;
            if tx.receiver_count() > 0 {
                let _ = tx.send(frame);
            }
        }
    }

    fn start_microphone(spec: &CaptureSpec, tx: broadcast::Sender<AudioFrame>) -> Result<()> {
        let (ready_tx, ready_rx) = std_mpsc::sync_channel(1);
        let spec = spec.clone();
        std::thread::Builder::new()
            .name("rtcam-microphone".to_string())
            .spawn(move || microphone_loop(spec, tx, ready_tx))?;
        ready_rx.recv().map_err(|_| {
            AppError::Internal("microphone thread exited before reporting".to_string())
        })?
    }

    fn open_pcm(spec: &CaptureSpec) -> Result<alsa::PCM> {
        use alsa::pcm::{Access, Format as PcmFormat, HwParams};
        use alsa::{Direction, ValueOr};

        let pcm = alsa::PCM::new(&spec.audio_device, Direction::Capture, false).map_err(|e| {
            capture_error(
                spec,
                format!("failed to open audio device {}: {e}", spec.audio_device),
            )
        })?;

        {
            let hwp = HwParams::any(&pcm)
                .map_err(|e| capture_error(spec, format!("failed to get hw params: {e}")))?;
            hwp.set_channels(AUDIO_CHANNELS as u32)
                .map_err(|e| capture_error(spec, format!("failed to set channels: {e}")))?;
            hwp.set_rate(AUDIO_SAMPLE_RATE, ValueOr::Nearest)
                .map_err(|e| capture_error(spec, format!("failed to set sample rate: {e}")))?;
            hwp.set_format(PcmFormat::s16())
                .map_err(|e| capture_error(spec, format!("failed to set sample format: {e}")))?;
            hwp.set_access(Access::RWInterleaved)
                .map_err(|e| capture_error(spec, format!("failed to set access mode: {e}")))?;
            pcm.hw_params(&hwp)
                .map_err(|e| capture_error(spec, format!("failed to apply hw params: {e}")))?;
        }

        pcm.prepare()
            .map_err(|e| capture_error(spec, format!("failed to prepare pcm: {e}")))?;
        Ok(pcm)
    }

    fn microphone_loop(
        spec: CaptureSpec,
        tx: broadcast::Sender<AudioFrame>,
        ready_tx: std_mpsc::SyncSender<Result<()>>,
    ) {
        let pcm = match open_pcm(&spec) {
            Ok(pcm) => {
                let _ = ready_tx.send(Ok(()));
                pcm
            }
            Err(e) => {
                let _ = ready_tx.send(Err(e));
                return;
            }
        };

        let io = match pcm.io_i16() {
            Ok(io) => io,
            Err(e) => {
                error!("failed to get pcm io handle: {e}");
                return;
            }
        };

        info!(
            "microphone streaming: {} {}Hz {}ch",
            spec.audio_device, AUDIO_SAMPLE_RATE, AUDIO_CHANNELS
        );

        let time_base = TimeBase::new(1, AUDIO_SAMPLE_RATE);
        let chunk_samples = AUDIO_CHUNK_FRAMES * AUDIO_CHANNELS as usize;
        let mut buf = vec![0i16; chunk_samples];
        let mut pts = 0i64;

        loop {
            let mut filled_frames = 0usize;
            while filled_frames < AUDIO_CHUNK_FRAMES {
                let offset = filled_frames * AUDIO_CHANNELS as usize;
                match io.readi(&mut buf[offset..]) {
                    Ok(0) => continue,
                    Ok(frames) => filled_frames += frames,
                    Err(e) => {
                        warn!("audio read failed, recovering: {e}");
                        if pcm.try_recover(e, true).is_err() {
                            error!("audio capture unrecoverable, stopping");
                            return;
                        }
                    }
                }
            }

            let frame = AudioFrame::new(
                buf.clone(),
                AUDIO_SAMPLE_RATE,
                AUDIO_CHANNELS,
                pts,
                time_base,
            );
            pts += AUDIO_CHUNK_FRAMES as i64;
            if tx.receiver_count() > 0 {
                let _ = tx.send(frame);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::media::track::{AudioSource, VideoSource};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_capture(opens: Arc<AtomicUsize>) -> SharedCapture {
        SharedCapture::with_opener(
            CaptureSpec::platform_default(),
            Box::new(move |_spec| {
                let opens = opens.clone();
                Box::pin(async move {
                    opens.fetch_add(1, Ordering::SeqCst);
                    let (audio_tx, _) = broadcast::channel(4);
                    let (video_tx, _) = broadcast::channel(4);
                    Ok(CaptureHandle::new(audio_tx, video_tx))
                })
            }),
        )
    }

    #[tokio::test]
    async fn device_opens_exactly_once_across_concurrent_subscribers() {
        let opens = Arc::new(AtomicUsize::new(0));
        let capture = Arc::new(counting_capture(opens.clone()));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let capture = capture.clone();
                tokio::spawn(async move { capture.subscribe().await.map(|_| ()) })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert!(capture.is_open());
    }

    #[tokio::test]
    async fn open_failure_surfaces_to_the_subscriber() {
        let capture = SharedCapture::with_opener(
            CaptureSpec::platform_default(),
            Box::new(|spec| {
                Box::pin(async move {
                    Err(AppError::Capture {
                        backend: spec.backend.to_string(),
                        reason: "device busy".to_string(),
                    })
                })
            }),
        );

        assert!(capture.subscribe().await.is_err());
        assert!(!capture.is_open());
    }

    #[tokio::test]
    async fn subscriptions_fan_out_from_one_handle() {
        let (audio_tx, _) = broadcast::channel(4);
        let (video_tx, _) = broadcast::channel(4);

        let (audio_for_opener, video_for_opener) = (audio_tx.clone(), video_tx.clone());
        let capture = SharedCapture::with_opener(
            CaptureSpec::platform_default(),
            Box::new(move |_spec| {
                let (a, v) = (audio_for_opener.clone(), video_for_opener.clone());
                Box::pin(async move { Ok(CaptureHandle::new(a, v)) })
            }),
        );

        let (mut audio_a, mut video_a) = capture.subscribe().await.unwrap();
        let (mut audio_b, mut video_b) = capture.subscribe().await.unwrap();

        use crate::media::frame::{AudioFrame, TimeBase, VideoFrame};
        video_tx
            .send(VideoFrame::from_vec(vec![0; 3], 1, 1, 0, TimeBase::new(1, 30)))
            .unwrap();
        audio_tx
            .send(AudioFrame::new(vec![0; 2], 48_000, 2, 0, TimeBase::new(1, 48_000)))
            .unwrap();

        assert!(video_a.next_frame().await.unwrap().is_some());
        assert!(video_b.next_frame().await.unwrap().is_some());
        assert!(audio_a.next_chunk().await.unwrap().is_some());
        assert!(audio_b.next_chunk().await.unwrap().is_some());
    }
}
