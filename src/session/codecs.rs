//! Codec capability table and per-sender codec forcing.
//!
//! The engine's media engine is populated from this table, so the same
//! list backs negotiation and the codec preference enforcer.

use std::sync::Arc;

use webrtc::api::media_engine::{
    MediaEngine, MIME_TYPE_G722, MIME_TYPE_H264, MIME_TYPE_OPUS, MIME_TYPE_PCMA, MIME_TYPE_PCMU,
    MIME_TYPE_VP8, MIME_TYPE_VP9,
};
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCPFeedback;

use crate::error::{AppError, Result};

fn video_rtcp_feedback() -> Vec<RTCPFeedback> {
    vec![
        RTCPFeedback {
            typ: "goog-remb".to_owned(),
            parameter: "".to_owned(),
        },
        RTCPFeedback {
            typ: "ccm".to_owned(),
            parameter: "fir".to_owned(),
        },
        RTCPFeedback {
            typ: "nack".to_owned(),
            parameter: "".to_owned(),
        },
        RTCPFeedback {
            typ: "nack".to_owned(),
            parameter: "pli".to_owned(),
        },
    ]
}

/// Audio capabilities offered on every connection.
pub fn audio_capabilities() -> Vec<RTCRtpCodecParameters> {
    vec![
        RTCRtpCodecParameters {
            capability: RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
                rtcp_feedback: vec![],
            },
            payload_type: 111,
            ..Default::default()
        },
        RTCRtpCodecParameters {
            capability: RTCRtpCodecCapability {
                mime_type: MIME_TYPE_G722.to_owned(),
                clock_rate: 8000,
                channels: 0,
                sdp_fmtp_line: "".to_owned(),
                rtcp_feedback: vec![],
            },
            payload_type: 9,
            ..Default::default()
        },
        RTCRtpCodecParameters {
            capability: RTCRtpCodecCapability {
                mime_type: MIME_TYPE_PCMU.to_owned(),
                clock_rate: 8000,
                channels: 0,
                sdp_fmtp_line: "".to_owned(),
                rtcp_feedback: vec![],
            },
            payload_type: 0,
            ..Default::default()
        },
        RTCRtpCodecParameters {
            capability: RTCRtpCodecCapability {
                mime_type: MIME_TYPE_PCMA.to_owned(),
                clock_rate: 8000,
                channels: 0,
                sdp_fmtp_line: "".to_owned(),
                rtcp_feedback: vec![],
            },
            payload_type: 8,
            ..Default::default()
        },
    ]
}

/// Video capabilities offered on every connection.
pub fn video_capabilities() -> Vec<RTCRtpCodecParameters> {
    vec![
        RTCRtpCodecParameters {
            capability: RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90000,
                channels: 0,
                sdp_fmtp_line: "".to_owned(),
                rtcp_feedback: video_rtcp_feedback(),
            },
            payload_type: 96,
            ..Default::default()
        },
        RTCRtpCodecParameters {
            capability: RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP9.to_owned(),
                clock_rate: 90000,
                channels: 0,
                sdp_fmtp_line: "profile-id=0".to_owned(),
                rtcp_feedback: video_rtcp_feedback(),
            },
            payload_type: 98,
            ..Default::default()
        },
        RTCRtpCodecParameters {
            capability: RTCRtpCodecCapability {
                mime_type: MIME_TYPE_H264.to_owned(),
                clock_rate: 90000,
                channels: 0,
                sdp_fmtp_line:
                    "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42001f"
                        .to_owned(),
                rtcp_feedback: video_rtcp_feedback(),
            },
            payload_type: 102,
            ..Default::default()
        },
    ]
}

/// Capability list for one media kind.
pub fn capabilities(kind: RTPCodecType) -> Vec<RTCRtpCodecParameters> {
    match kind {
        RTPCodecType::Audio => audio_capabilities(),
        _ => video_capabilities(),
    }
}

/// Track capability for the outbound audio track.
pub fn opus_track_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_OPUS.to_owned(),
        clock_rate: 48000,
        channels: 2,
        sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
        rtcp_feedback: vec![],
    }
}

/// Track capability for the outbound video track.
pub fn vp8_track_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_VP8.to_owned(),
        clock_rate: 90000,
        channels: 0,
        sdp_fmtp_line: "".to_owned(),
        rtcp_feedback: vec![],
    }
}

/// Register the capability table into a media engine.
pub fn register_codecs(engine: &mut MediaEngine) -> Result<()> {
    for params in audio_capabilities() {
        engine.register_codec(params, RTPCodecType::Audio)?;
    }
    for params in video_capabilities() {
        engine.register_codec(params, RTPCodecType::Video)?;
    }
    Ok(())
}

/// Restrict `sender`'s transceiver to the capability entries matching the
/// forced `kind/name` identifier. The sender must already sit on one of the
/// connection's transceivers; anything else is a caller ordering bug. An
/// identifier matching nothing in the capability list is a fatal lookup
/// error rather than a silently empty preference list.
pub async fn force_codec(
    pc: &RTCPeerConnection,
    sender: &Arc<RTCRtpSender>,
    forced: &str,
) -> Result<()> {
    let kind = match forced.split('/').next() {
        Some("audio") => RTPCodecType::Audio,
        Some("video") => RTPCodecType::Video,
        _ => {
            return Err(AppError::Codec(format!(
                "malformed codec identifier: {forced}"
            )))
        }
    };

    let matching: Vec<RTCRtpCodecParameters> = capabilities(kind)
        .into_iter()
        .filter(|params| params.capability.mime_type.eq_ignore_ascii_case(forced))
        .collect();
    if matching.is_empty() {
        return Err(AppError::Codec(format!(
            "no capability matches forced codec {forced}"
        )));
    }

    for transceiver in pc.get_transceivers().await {
        if Arc::ptr_eq(&transceiver.sender().await, sender) {
            transceiver.set_codec_preferences(matching).await?;
            return Ok(());
        }
    }

    Err(AppError::Internal(
        "forced codec applies to a sender with no transceiver on this connection".to_string(),
    ))
}
