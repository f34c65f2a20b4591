use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::error::{AppError, Result};
use crate::state::AppState;

/// Health check acknowledgement
#[derive(Serialize)]
pub struct HealthResponse {
    #[serde(rename = "Status")]
    pub status: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "Ok" })
}

/// Session description exchanged over the signaling endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Negotiate one session: apply the remote offer, stand up the session,
/// and return the applied local answer.
pub async fn offer(
    State(state): State<Arc<AppState>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Json(request): Json<SessionDescription>,
) -> Result<Json<SessionDescription>> {
    if request.kind != "offer" {
        return Err(AppError::BadRequest(format!(
            "unsupported description type: {}",
            request.kind
        )));
    }

    let offer = RTCSessionDescription::offer(request.sdp)
        .map_err(|e| AppError::BadRequest(format!("invalid SDP offer: {e}")))?;

    let answer = state
        .manager
        .negotiate(offer, Some(remote.to_string()))
        .await?;

    Ok(Json(SessionDescription {
        sdp: answer.sdp,
        kind: answer.sdp_type.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_payload_shape() {
        let body = serde_json::to_string(&HealthResponse { status: "Ok" }).unwrap();
        assert_eq!(body, r#"{"Status":"Ok"}"#);
    }

    #[test]
    fn session_description_round_trips_type_field() {
        let json = r#"{"sdp":"v=0","type":"offer"}"#;
        let desc: SessionDescription = serde_json::from_str(json).unwrap();
        assert_eq!(desc.kind, "offer");
        assert_eq!(serde_json::to_string(&desc).unwrap(), json);
    }
}
