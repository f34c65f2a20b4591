//! Session event channel.
//!
//! Engine callbacks only forward into this channel; all acting logic lives
//! in the session event loop.

use std::sync::Arc;

use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::track::track_remote::TrackRemote;

/// Events emitted by one peer connection.
pub enum SessionEvent {
    /// Connection state signal from the transport
    StateChanged(RTCPeerConnectionState),
    /// A new inbound track arrived
    TrackReceived(Arc<TrackRemote>),
    /// The remote opened a data channel
    DataChannelOpened(Arc<RTCDataChannel>),
    /// A message arrived on an open data channel
    DataChannelMessage {
        channel: Arc<RTCDataChannel>,
        message: DataChannelMessage,
    },
}
