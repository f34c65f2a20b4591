//! File replay sources.
//!
//! Replay opens a fresh demultiplexed reader per invocation; nothing is
//! shared between sessions. Video replay reads YUV4MPEG2 (`.y4m`) files,
//! audio replay reads 16-bit PCM WAV (`.wav`). Frames are paced against
//! their presentation timestamps so a replayed file plays in real time.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::convert::yuv420_to_bgr24;
use super::frame::{AudioFrame, TimeBase, VideoFrame};
use super::track::{AudioSource, ChannelAudioSource, ChannelVideoSource, VideoSource};
use crate::error::{AppError, Result};

/// Replay channel depth; small to keep the reader paced by the consumer.
const CHANNEL_DEPTH: usize = 4;

/// Resolved replay sources. Either side may be absent depending on the
/// container.
pub struct ReplaySources {
    pub audio: Option<Box<dyn AudioSource>>,
    pub video: Option<Box<dyn VideoSource>>,
}

/// Open a fresh reader for `path`. Fails fast so a bad replay file aborts
/// session creation.
pub fn open(path: &Path) -> Result<ReplaySources> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "y4m" => Ok(ReplaySources {
            audio: None,
            video: Some(Box::new(open_y4m(path)?)),
        }),
        "wav" => Ok(ReplaySources {
            audio: Some(Box::new(open_wav(path)?)),
            video: None,
        }),
        _ => Err(AppError::Replay(format!(
            "unsupported replay container: {}",
            path.display()
        ))),
    }
}

#[derive(Debug, Clone, Copy)]
struct Y4mHeader {
    width: u32,
    height: u32,
    fps_num: u32,
    fps_den: u32,
}

fn read_line<R: Read>(reader: &mut R) -> Result<Option<String>> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte)? {
            0 => {
                if line.is_empty() {
                    return Ok(None);
                }
                break;
            }
            _ if byte[0] == b'\n' => break,
            _ => line.push(byte[0]),
        }
        if line.len() > 1024 {
            return Err(AppError::Replay("unterminated y4m header line".into()));
        }
    }
    String::from_utf8(line)
        .map(Some)
        .map_err(|_| AppError::Replay("y4m header is not valid UTF-8".into()))
}

fn parse_y4m_header(line: &str) -> Result<Y4mHeader> {
    let mut tokens = line.split_ascii_whitespace();
    if tokens.next() != Some("YUV4MPEG2") {
        return Err(AppError::Replay("missing YUV4MPEG2 signature".into()));
    }

    let (mut width, mut height, mut fps_num, mut fps_den) = (0u32, 0u32, 0u32, 0u32);
    for token in tokens {
        let (tag, value) = token.split_at(1);
        match tag {
            "W" => width = value.parse().map_err(|_| bad_param(token))?,
            "H" => height = value.parse().map_err(|_| bad_param(token))?,
            "F" => {
                let (num, den) = value.split_once(':').ok_or_else(|| bad_param(token))?;
                fps_num = num.parse().map_err(|_| bad_param(token))?;
                fps_den = den.parse().map_err(|_| bad_param(token))?;
            }
            "C" => {
                if !value.starts_with("420") {
                    return Err(AppError::Replay(format!(
                        "unsupported y4m colorspace: {value}"
                    )));
                }
            }
            _ => {}
        }
    }

    if width == 0 || height == 0 || fps_num == 0 || fps_den == 0 {
        return Err(AppError::Replay("y4m header lacks W/H/F parameters".into()));
    }
    if width % 2 != 0 || height % 2 != 0 {
        return Err(AppError::Replay("y4m 4:2:0 requires even dimensions".into()));
    }

    Ok(Y4mHeader {
        width,
        height,
        fps_num,
        fps_den,
    })
}

fn bad_param(token: &str) -> AppError {
    AppError::Replay(format!("malformed y4m parameter: {token}"))
}

fn open_y4m(path: &Path) -> Result<ChannelVideoSource> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let header_line = read_line(&mut reader)?
        .ok_or_else(|| AppError::Replay(format!("empty y4m file: {}", path.display())))?;
    let header = parse_y4m_header(&header_line)?;

    let time_base = TimeBase::new(header.fps_den, header.fps_num);
    let frame_size = (header.width * header.height * 3 / 2) as usize;
    let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);

    tokio::task::spawn_blocking(move || {
        let start = Instant::now();
        let mut buf = vec![0u8; frame_size];
        let mut pts = 0i64;

        loop {
            match read_line(&mut reader) {
                Ok(None) => break,
                Ok(Some(line)) if line.starts_with("FRAME") => {}
                Ok(Some(line)) => {
                    let _ = tx.blocking_send(Err(AppError::Replay(format!(
                        "expected FRAME marker, found {line:?}"
                    ))));
                    return;
                }
                Err(err) => {
                    let _ = tx.blocking_send(Err(err));
                    return;
                }
            }

            if let Err(err) = reader.read_exact(&mut buf) {
                let _ = tx.blocking_send(Err(AppError::Replay(format!(
                    "truncated y4m frame: {err}"
                ))));
                return;
            }

            let bgr = yuv420_to_bgr24(&buf, header.width, header.height);
            let frame = VideoFrame::from_vec(bgr, header.width, header.height, pts, time_base);

            let due = start + Duration::from_secs_f64(time_base.seconds(pts));
            let now = Instant::now();
            if due > now {
                std::thread::sleep(due - now);
            }

            if tx.blocking_send(Ok(frame)).is_err() {
                debug!("y4m replay consumer went away");
                return;
            }
            pts += 1;
        }
    });

    Ok(ChannelVideoSource::new(rx))
}

fn open_wav(path: &Path) -> Result<ChannelAudioSource> {
    let reader = hound::WavReader::open(path)
        .map_err(|e| AppError::Replay(format!("failed to open {}: {e}", path.display())))?;
    let spec = reader.spec();

    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(AppError::Replay(format!(
            "replay expects 16-bit PCM wav, got {}-bit {:?}",
            spec.bits_per_sample, spec.sample_format
        )));
    }

    let time_base = TimeBase::new(1, spec.sample_rate);
    // 20 ms chunks, matching the Opus frame the outbound track consumes.
    let chunk_frames = (spec.sample_rate / 50) as usize;
    let chunk_samples = chunk_frames * spec.channels as usize;
    let (tx, rx) = mpsc::channel(CHANNEL_DEPTH * 4);

    tokio::task::spawn_blocking(move || {
        let mut reader = reader;
        let start = Instant::now();
        let mut pts = 0i64;
        let mut chunk: Vec<i16> = Vec::with_capacity(chunk_samples);

        for sample in reader.samples::<i16>() {
            let sample = match sample {
                Ok(s) => s,
                Err(err) => {
                    warn!("wav replay read failed: {err}");
                    let _ = tx.blocking_send(Err(AppError::Replay(err.to_string())));
                    return;
                }
            };
            chunk.push(sample);

            if chunk.len() == chunk_samples {
                let frame = AudioFrame::new(
                    std::mem::take(&mut chunk),
                    spec.sample_rate,
                    spec.channels,
                    pts,
                    time_base,
                );
                chunk.reserve(chunk_samples);

                let due = start + Duration::from_secs_f64(time_base.seconds(pts));
                let now = Instant::now();
                if due > now {
                    std::thread::sleep(due - now);
                }

                if tx.blocking_send(Ok(frame)).is_err() {
                    debug!("wav replay consumer went away");
                    return;
                }
                pts += chunk_frames as i64;
            }
        }

        // Trailing partial chunk, padded to a full Opus frame with silence.
        if !chunk.is_empty() {
            chunk.resize(chunk_samples, 0);
            let frame = AudioFrame::new(chunk, spec.sample_rate, spec.channels, pts, time_base);
            let _ = tx.blocking_send(Ok(frame));
        }
    });

    Ok(ChannelAudioSource::new(rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_y4m(path: &Path, frames: usize) {
        let (w, h) = (4usize, 4usize);
        let mut file = File::create(path).unwrap();
        writeln!(file, "YUV4MPEG2 W{w} H{h} F25:1 Ip A1:1 C420jpeg").unwrap();
        for i in 0..frames {
            writeln!(file, "FRAME").unwrap();
            let y = vec![(16 + i * 8) as u8; w * h];
            let uv = vec![128u8; w * h / 2];
            file.write_all(&y).unwrap();
            file.write_all(&uv).unwrap();
        }
    }

    #[test]
    fn parses_y4m_header() {
        let header = parse_y4m_header("YUV4MPEG2 W640 H480 F30:1 Ip A1:1 C420jpeg").unwrap();
        assert_eq!((header.width, header.height), (640, 480));
        assert_eq!((header.fps_num, header.fps_den), (30, 1));
    }

    #[test]
    fn rejects_non_420_colorspace() {
        assert!(parse_y4m_header("YUV4MPEG2 W640 H480 F30:1 C444").is_err());
    }

    #[test]
    fn rejects_header_without_dimensions() {
        assert!(parse_y4m_header("YUV4MPEG2 F30:1").is_err());
    }

    #[tokio::test]
    async fn y4m_replay_yields_frames_then_eos() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.y4m");
        write_y4m(&path, 3);

        let mut source = open_y4m(&path).unwrap();
        for expected_pts in 0..3 {
            let frame = source.next_frame().await.unwrap().unwrap();
            assert_eq!(frame.pts, expected_pts);
            assert_eq!((frame.width, frame.height), (4, 4));
            assert_eq!(frame.len(), 4 * 4 * 3);
        }
        assert!(source.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn wav_replay_chunks_and_pads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        // 1.5 chunks worth of samples at 20 ms = 160 frames per chunk.
        for i in 0..240i16 {
            writer.write_sample(i).unwrap();
        }
        writer.finalize().unwrap();

        let mut source = open_wav(&path).unwrap();
        let first = source.next_chunk().await.unwrap().unwrap();
        assert_eq!(first.samples.len(), 160);
        assert_eq!(first.pts, 0);
        let second = source.next_chunk().await.unwrap().unwrap();
        assert_eq!(second.samples.len(), 160);
        assert_eq!(second.pts, 160);
        // Padding fills the tail with silence.
        assert_eq!(&second.samples[80..], &[0i16; 80][..]);
        assert!(source.next_chunk().await.unwrap().is_none());
    }

    #[test]
    fn unsupported_container_is_an_error() {
        assert!(open(Path::new("clip.mp4")).is_err());
    }
}
