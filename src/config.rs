//! Startup configuration, resolved once from the command line.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use crate::transform::TransformMode;

/// Resolved application configuration. Not reloaded at runtime.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Bind address for the HTTP signaling endpoint
    pub bind_address: IpAddr,
    /// Bind port
    pub bind_port: u16,
    /// Write received media next to this path (`.ivf` video, `.ogg` audio)
    pub record_to: Option<PathBuf>,
    /// Read outbound media from this file instead of the capture devices
    pub play_from: Option<PathBuf>,
    /// Force a specific outbound audio codec (e.g. "audio/opus")
    pub audio_codec: Option<String>,
    /// Force a specific outbound video codec (e.g. "video/VP8")
    pub video_codec: Option<String>,
    /// Transform applied to every outbound video frame
    pub video_transform: TransformMode,
}

impl AppConfig {
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.bind_port)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::from([0, 0, 0, 0]),
            bind_port: 8080,
            record_to: None,
            play_from: None,
            audio_codec: None,
            video_codec: None,
            video_transform: TransformMode::None,
        }
    }
}
