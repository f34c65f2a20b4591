//! One negotiated peer session and its resources.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::RTCPeerConnection;

use super::codecs;
use crate::error::Result;
use crate::recording::Recorder;

/// Build a peer connection with the capability table registered.
pub async fn new_peer_connection() -> Result<Arc<RTCPeerConnection>> {
    let mut media_engine = MediaEngine::default();
    codecs::register_codecs(&mut media_engine)?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let pc = api
        .new_peer_connection(RTCConfiguration::default())
        .await?;
    Ok(Arc::new(pc))
}

/// A live session: the peer connection, its recording sink, and the cancel
/// token for its media pump tasks. Owned by the lifecycle manager;
/// referenced by the registry and the connection's event loop.
pub struct Session {
    pub id: String,
    pc: Arc<RTCPeerConnection>,
    recorder: Arc<Recorder>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl Session {
    pub fn new(id: String, pc: Arc<RTCPeerConnection>, recorder: Arc<Recorder>) -> Arc<Self> {
        Arc::new(Self {
            id,
            pc,
            recorder,
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn pc(&self) -> &Arc<RTCPeerConnection> {
        &self.pc
    }

    pub fn recorder(&self) -> &Arc<Recorder> {
        &self.recorder
    }

    /// Child token for a pump task tied to this session's lifetime.
    pub fn child_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close the underlying connection and cancel the session's pump
    /// tasks. Only the first call acts; concurrent callers see `Ok`.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.cancel.cancel();
        self.pc.close().await?;
        Ok(())
    }
}
