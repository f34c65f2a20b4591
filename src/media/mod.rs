//! Media frames, sources, capture and replay.

pub mod capture;
pub mod convert;
pub mod frame;
pub mod provider;
pub mod replay;
pub mod track;

pub use capture::{CaptureHandle, CaptureOptions, CaptureSpec, SharedCapture};
pub use frame::{AudioFrame, TimeBase, VideoFrame};
pub use provider::MediaSources;
pub use track::{AudioSource, VideoSource};
