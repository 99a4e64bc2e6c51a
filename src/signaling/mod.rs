//! Cloud signaling: wire envelope codec and the WebSocket channel

mod channel;
mod envelope;

pub use channel::{SignalingChannel, SignalingEvent};
pub use envelope::{IceCandidatePayload, SdpPayload, SignalEnvelope};
