//! Peer connection ownership and event forwarding.
//!
//! The peer is configured from the ICE servers carried by the signaling
//! credentials and declares bidirectional video and audio transceivers
//! before the offer is created. Transport callbacks are forwarded as
//! [`TransportEvent`] values into the owning session's queue instead of
//! being handled in place.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_remote::TrackRemote;

use crate::api::SignalingCredentials;
use crate::error::{AppError, Result};
use crate::signaling::IceCandidatePayload;

/// Public STUN fallback when the credential record carries no ICE servers
const FALLBACK_STUN: &str = "stun:stun.l.google.com:19302";

/// ICE connection state as the session tracks it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl TransportState {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }
}

impl From<RTCIceConnectionState> for TransportState {
    fn from(state: RTCIceConnectionState) -> Self {
        match state {
            RTCIceConnectionState::Checking => Self::Checking,
            RTCIceConnectionState::Connected => Self::Connected,
            RTCIceConnectionState::Completed => Self::Completed,
            RTCIceConnectionState::Disconnected => Self::Disconnected,
            RTCIceConnectionState::Failed => Self::Failed,
            RTCIceConnectionState::Closed => Self::Closed,
            _ => Self::New,
        }
    }
}

impl std::fmt::Display for TransportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Checking => write!(f, "checking"),
            Self::Connected => write!(f, "connected"),
            Self::Completed => write!(f, "completed"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Failed => write!(f, "failed"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Transport callback traffic, delivered over the session's queue
#[derive(Debug)]
pub enum TransportEvent {
    /// Locally gathered ICE candidate to trickle to the remote side
    LocalCandidate(IceCandidatePayload),
    /// ICE connection state change
    IceState(TransportState),
    /// A remote media track arrived
    Track(Arc<TrackRemote>),
}

/// Build the ICE server list for one connection attempt.
pub fn ice_servers_from(credentials: &SignalingCredentials) -> Vec<RTCIceServer> {
    let mut servers: Vec<RTCIceServer> = credentials
        .servers
        .iter()
        .map(|s| RTCIceServer {
            urls: s.urls.clone(),
            username: s.username.clone().unwrap_or_default(),
            credential: s.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect();

    if servers.is_empty() {
        warn!("No ICE servers in credentials, falling back to public STUN");
        servers.push(RTCIceServer {
            urls: vec![FALLBACK_STUN.to_owned()],
            ..Default::default()
        });
    }

    servers
}

/// Peer connection wrapper for one camera session
pub struct CameraPeer {
    pc: Arc<RTCPeerConnection>,
}

impl CameraPeer {
    /// Create a peer connection with both transceivers declared and all
    /// handlers forwarding into `events`.
    pub async fn new(
        ice_servers: Vec<RTCIceServer>,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| AppError::Transport(format!("failed to register codecs: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| AppError::Transport(format!("failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let pc = api
            .new_peer_connection(rtc_config)
            .await
            .map_err(|e| AppError::Transport(format!("failed to create peer connection: {}", e)))?;
        let pc = Arc::new(pc);

        // The cloud side only answers offers that declare both directions
        for kind in [RTPCodecType::Video, RTPCodecType::Audio] {
            pc.add_transceiver_from_kind(
                kind,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Sendrecv,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(|e| {
                AppError::Transport(format!("failed to add {} transceiver: {}", kind, e))
            })?;
        }

        let peer = Self { pc };
        peer.setup_event_handlers(events);
        Ok(peer)
    }

    fn setup_event_handlers(&self, events: mpsc::Sender<TransportEvent>) {
        let track_events = events.clone();
        self.pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let track_events = track_events.clone();
            Box::pin(async move {
                info!("Received {} track", track.kind());
                let _ = track_events.send(TransportEvent::Track(track)).await;
            })
        }));

        let candidate_events = events.clone();
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let candidate_events = candidate_events.clone();
                Box::pin(async move {
                    let Some(candidate) = candidate else { return };
                    match candidate.to_json() {
                        Ok(json) => {
                            debug!("Gathered local ICE candidate");
                            let payload = IceCandidatePayload {
                                candidate: json.candidate,
                                sdp_mid: json.sdp_mid,
                                sdp_mline_index: json.sdp_mline_index,
                            };
                            let _ = candidate_events
                                .send(TransportEvent::LocalCandidate(payload))
                                .await;
                        }
                        Err(e) => warn!("Failed to serialize ICE candidate: {}", e),
                    }
                })
            }));

        let ice_events = events;
        self.pc.on_ice_connection_state_change(Box::new(
            move |state: RTCIceConnectionState| {
                let ice_events = ice_events.clone();
                Box::pin(async move {
                    let _ = ice_events
                        .send(TransportEvent::IceState(TransportState::from(state)))
                        .await;
                })
            },
        ));

        self.pc.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| {
                Box::pin(async move {
                    info!("Peer connection state: {}", state);
                })
            },
        ));
    }

    /// Create the SDP offer and install it as the local description.
    pub async fn create_offer(&self) -> Result<String> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| AppError::Transport(format!("failed to create offer: {}", e)))?;
        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| AppError::Transport(format!("failed to set local description: {}", e)))?;
        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| AppError::Transport("local description missing after offer".into()))?;
        Ok(local.sdp)
    }

    /// Install the remote SDP answer.
    pub async fn set_answer(&self, sdp: String) -> Result<()> {
        let answer = RTCSessionDescription::answer(sdp)
            .map_err(|e| AppError::Transport(format!("invalid SDP answer: {}", e)))?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| AppError::Transport(format!("failed to set remote description: {}", e)))
    }

    /// Add a trickled remote ICE candidate.
    pub async fn add_remote_candidate(&self, candidate: IceCandidatePayload) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| AppError::Transport(format!("failed to add ICE candidate: {}", e)))
    }

    /// Close the peer connection.
    pub async fn close(&self) -> Result<()> {
        self.pc
            .close()
            .await
            .map_err(|e| AppError::Transport(format!("failed to close peer connection: {}", e)))
    }
}
