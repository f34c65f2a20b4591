//! Session lifecycle manager.
//!
//! Owns the offer/answer handshake, the per-session event loop, and
//! shutdown. Per session the handshake is strictly sequential; across
//! sessions negotiations interleave freely and share nothing but the
//! registry and the capture handle.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use super::codecs;
use super::events::SessionEvent;
use super::pump;
use super::registry::SessionRegistry;
use super::session::{new_peer_connection, Session};
use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::media::capture::SharedCapture;
use crate::media::provider;
use crate::media::track::VideoSource;
use crate::recording::Recorder;
use crate::transform::TransformTrack;

pub struct SessionManager {
    config: Arc<AppConfig>,
    registry: Arc<SessionRegistry>,
    capture: Arc<SharedCapture>,
}

impl SessionManager {
    pub fn new(
        config: Arc<AppConfig>,
        registry: Arc<SessionRegistry>,
        capture: Arc<SharedCapture>,
    ) -> Self {
        Self {
            config,
            registry,
            capture,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Drive one offer/answer negotiation to completion and return the
    /// applied local description. On any failure the session is closed and
    /// deregistered before the error propagates; no partial session
    /// remains.
    pub async fn negotiate(
        &self,
        offer: RTCSessionDescription,
        remote: Option<String>,
    ) -> Result<RTCSessionDescription> {
        let pc = new_peer_connection().await?;
        let id = Uuid::new_v4().to_string();
        match &remote {
            Some(addr) => info!("Session {id} created for {addr}"),
            None => info!("Session {id} created"),
        }

        let recorder = match &self.config.record_to {
            Some(path) => Recorder::to_file(path.clone()),
            None => Recorder::blackhole(),
        };
        let session = Session::new(id.clone(), pc, recorder);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        wire_callbacks(session.pc(), &event_tx);
        spawn_event_loop(session.clone(), self.registry.clone(), event_tx.clone(), event_rx);

        match self.establish(&session, offer).await {
            Ok(answer) => {
                self.registry.add(session.clone()).await;
                // A failure event may have closed the session while the
                // registration raced it; the registry holds live sessions only.
                if session.is_closed() {
                    self.registry.discard(&id).await;
                }
                Ok(answer)
            }
            Err(err) => {
                if let Err(close_err) = session.close().await {
                    warn!("failed to close session {id} after negotiation error: {close_err}");
                }
                Err(err)
            }
        }
    }

    async fn establish(
        &self,
        session: &Arc<Session>,
        offer: RTCSessionDescription,
    ) -> Result<RTCSessionDescription> {
        let pc = session.pc();
        debug!("SDP offer for session {}:\n{}", session.id, offer.sdp);

        pc.set_remote_description(offer)
            .await
            .map_err(|e| AppError::Negotiation(format!("failed to apply remote offer: {e}")))?;

        let sources = provider::resolve(self.config.play_from.as_deref(), &self.capture).await?;

        if let Some(audio) = sources.audio {
            let track = Arc::new(TrackLocalStaticSample::new(
                codecs::opus_track_capability(),
                "audio".to_owned(),
                "rtcam".to_owned(),
            ));
            let sender = pc.add_track(track.clone()).await?;
            pump::spawn_audio(audio, track, session.child_token());
            if let Some(forced) = &self.config.audio_codec {
                codecs::force_codec(pc, &sender, forced).await?;
            }
        }

        if let Some(video) = sources.video {
            let source: Box<dyn VideoSource> = Box::new(TransformTrack::new(
                video,
                self.config.video_transform,
            ));
            let track = Arc::new(TrackLocalStaticSample::new(
                codecs::vp8_track_capability(),
                "video".to_owned(),
                "rtcam".to_owned(),
            ));
            let sender = pc.add_track(track.clone()).await?;
            pump::spawn_video(source, track, session.child_token());
            if let Some(forced) = &self.config.video_codec {
                codecs::force_codec(pc, &sender, forced).await?;
            }
        }

        session.recorder().start().await?;

        let answer = pc
            .create_answer(None)
            .await
            .map_err(|e| AppError::Negotiation(format!("failed to create answer: {e}")))?;
        pc.set_local_description(answer)
            .await
            .map_err(|e| AppError::Negotiation(format!("failed to apply local answer: {e}")))?;

        let local = pc.local_description().await.ok_or_else(|| {
            AppError::Negotiation("local description missing after apply".to_string())
        })?;
        debug!("SDP answer for session {}:\n{}", session.id, local.sdp);
        Ok(local)
    }

    /// Close every registered session concurrently, wait for all closes to
    /// complete, and leave the registry empty.
    pub async fn shutdown(&self) {
        let sessions = self.registry.drain().await;
        let count = sessions.len();
        let results = futures::future::join_all(sessions.iter().map(|s| s.close())).await;
        for (session, result) in sessions.iter().zip(results) {
            if let Err(e) = result {
                warn!("failed to close session {}: {e}", session.id);
            }
        }
        info!("Closed {count} session(s) on shutdown");
    }
}

fn wire_callbacks(pc: &Arc<RTCPeerConnection>, tx: &mpsc::UnboundedSender<SessionEvent>) {
    let state_tx = tx.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let _ = state_tx.send(SessionEvent::StateChanged(state));
        Box::pin(async {})
    }));

    let track_tx = tx.clone();
    pc.on_track(Box::new(move |track, _receiver, _transceiver| {
        let _ = track_tx.send(SessionEvent::TrackReceived(track));
        Box::pin(async {})
    }));

    let dc_tx = tx.clone();
    pc.on_data_channel(Box::new(move |channel| {
        let _ = dc_tx.send(SessionEvent::DataChannelOpened(channel));
        Box::pin(async {})
    }));
}

/// Reply for the data-channel liveness probe: any string message starting
/// with `ping` echoes back `pong ` plus the text after the prefix.
fn pong_reply(text: &str) -> Option<String> {
    text.strip_prefix("ping").map(|rest| format!("pong {rest}"))
}

fn spawn_event_loop(
    session: Arc<Session>,
    registry: Arc<SessionRegistry>,
    tx: mpsc::UnboundedSender<SessionEvent>,
    mut rx: mpsc::UnboundedReceiver<SessionEvent>,
) {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                SessionEvent::StateChanged(state) => {
                    info!("Session {} connection state: {state}", session.id);
                    match state {
                        RTCPeerConnectionState::Failed => {
                            warn!("Session {} connection failed", session.id);
                            if let Err(e) = session.close().await {
                                warn!("failed to close session {}: {e}", session.id);
                            }
                            registry.discard(&session.id).await;
                            break;
                        }
                        RTCPeerConnectionState::Closed => break,
                        _ => {}
                    }
                }
                SessionEvent::TrackReceived(track) => {
                    info!("Track {} received on session {}", track.kind(), session.id);
                    session.recorder().add_track(track);
                }
                SessionEvent::DataChannelOpened(channel) => {
                    debug!("Data channel {} opened on session {}", channel.label(), session.id);
                    let forward = tx.clone();
                    let channel_for_messages = channel.clone();
                    channel.on_message(Box::new(move |message| {
                        let _ = forward.send(SessionEvent::DataChannelMessage {
                            channel: channel_for_messages.clone(),
                            message,
                        });
                        Box::pin(async {})
                    }));
                }
                SessionEvent::DataChannelMessage { channel, message } => {
                    if !message.is_string {
                        continue;
                    }
                    let Ok(text) = std::str::from_utf8(&message.data) else {
                        continue;
                    };
                    if let Some(reply) = pong_reply(text) {
                        if let Err(e) = channel.send_text(reply).await {
                            warn!("failed to send data channel reply: {e}");
                        }
                    }
                }
            }
        }
        debug!("event loop for session {} ended", session.id);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::capture::{CaptureHandle, CaptureSpec};
    use crate::transform::TransformMode;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::broadcast;
    use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

    #[test]
    fn ping_messages_echo_their_suffix() {
        assert_eq!(pong_reply("ping-42").as_deref(), Some("pong -42"));
        assert_eq!(pong_reply("ping hello").as_deref(), Some("pong  hello"));
        assert_eq!(pong_reply("ping").as_deref(), Some("pong "));
        assert_eq!(pong_reply("PING-42"), None);
        assert_eq!(pong_reply("hello"), None);
    }

    fn stub_capture(opens: Arc<AtomicUsize>) -> Arc<SharedCapture> {
        Arc::new(SharedCapture::with_opener(
            CaptureSpec::platform_default(),
            Box::new(move |_spec| {
                let opens = opens.clone();
                Box::pin(async move {
                    opens.fetch_add(1, Ordering::SeqCst);
                    let (audio_tx, _) = broadcast::channel(8);
                    let (video_tx, _) = broadcast::channel(8);
                    Ok(CaptureHandle::new(audio_tx, video_tx))
                })
            }),
        ))
    }

    fn manager_with(config: AppConfig, opens: Arc<AtomicUsize>) -> SessionManager {
        SessionManager::new(
            Arc::new(config),
            Arc::new(SessionRegistry::new()),
            stub_capture(opens),
        )
    }

    async fn client_offer() -> (Arc<webrtc::peer_connection::RTCPeerConnection>, RTCSessionDescription) {
        let client = new_peer_connection().await.unwrap();
        client
            .add_transceiver_from_kind(RTPCodecType::Audio, None)
            .await
            .unwrap();
        client
            .add_transceiver_from_kind(RTPCodecType::Video, None)
            .await
            .unwrap();
        let _probe = client.create_data_channel("probe", None).await.unwrap();
        let offer = client.create_offer(None).await.unwrap();
        client.set_local_description(offer.clone()).await.unwrap();
        (client, offer)
    }

    fn write_test_clip(dir: &std::path::Path) -> std::path::PathBuf {
        let path = dir.join("clip.y4m");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "YUV4MPEG2 W16 H16 F30:1 Ip A1:1 C420jpeg").unwrap();
        for _ in 0..5 {
            writeln!(file, "FRAME").unwrap();
            file.write_all(&vec![128u8; 16 * 16]).unwrap();
            file.write_all(&vec![128u8; 16 * 16 / 2]).unwrap();
        }
        path
    }

    #[tokio::test]
    async fn shutdown_with_empty_registry_terminates() {
        let manager = manager_with(AppConfig::default(), Arc::new(AtomicUsize::new(0)));
        manager.shutdown().await;
        assert!(manager.registry().is_empty().await);
    }

    #[tokio::test]
    async fn shutdown_closes_and_clears_many_sessions() {
        let manager = manager_with(AppConfig::default(), Arc::new(AtomicUsize::new(0)));

        let mut sessions = Vec::new();
        for i in 0..3 {
            let pc = new_peer_connection().await.unwrap();
            let session = Session::new(format!("s{i}"), pc, Recorder::blackhole());
            manager.registry().add(session.clone()).await;
            sessions.push(session);
        }
        assert_eq!(manager.registry().len().await, 3);

        manager.shutdown().await;
        assert!(manager.registry().is_empty().await);
        for session in sessions {
            assert!(session.is_closed());
        }
    }

    #[tokio::test]
    async fn edges_negotiation_with_replay_returns_local_description() {
        let dir = tempfile::tempdir().unwrap();
        let clip = write_test_clip(dir.path());

        let config = AppConfig {
            play_from: Some(clip),
            video_transform: TransformMode::Edges,
            ..Default::default()
        };
        let manager = manager_with(config, Arc::new(AtomicUsize::new(0)));

        let (client, offer) = client_offer().await;
        let answer = manager.negotiate(offer, None).await.unwrap();
        assert_eq!(answer.sdp_type.to_string(), "answer");
        assert!(answer.sdp.contains("m=video"));
        assert_eq!(manager.registry().len().await, 1);

        manager.shutdown().await;
        assert!(manager.registry().is_empty().await);
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_live_negotiations_open_the_device_once() {
        let opens = Arc::new(AtomicUsize::new(0));
        let manager = Arc::new(manager_with(AppConfig::default(), opens.clone()));

        let (client_a, offer_a) = client_offer().await;
        let (client_b, offer_b) = client_offer().await;

        let (answer_a, answer_b) = tokio::join!(
            manager.negotiate(offer_a, None),
            manager.negotiate(offer_b, None),
        );
        answer_a.unwrap();
        answer_b.unwrap();

        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert_eq!(manager.registry().len().await, 2);

        manager.shutdown().await;
        client_a.close().await.unwrap();
        client_b.close().await.unwrap();
    }

    #[tokio::test]
    async fn bad_replay_path_leaves_no_session_registered() {
        let config = AppConfig {
            play_from: Some(std::path::PathBuf::from("/nonexistent/clip.y4m")),
            ..Default::default()
        };
        let manager = manager_with(config, Arc::new(AtomicUsize::new(0)));

        let (client, offer) = client_offer().await;
        assert!(manager.negotiate(offer, None).await.is_err());
        assert!(manager.registry().is_empty().await);
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn forcing_an_unsupported_codec_fails_the_negotiation() {
        let dir = tempfile::tempdir().unwrap();
        let clip = write_test_clip(dir.path());

        let config = AppConfig {
            play_from: Some(clip),
            video_codec: Some("video/av2".to_string()),
            ..Default::default()
        };
        let manager = manager_with(config, Arc::new(AtomicUsize::new(0)));

        let (client, offer) = client_offer().await;
        let err = manager.negotiate(offer, None).await.unwrap_err();
        assert!(matches!(err, AppError::Codec(_)));
        assert!(manager.registry().is_empty().await);
        client.close().await.unwrap();
    }
}
