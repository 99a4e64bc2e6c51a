//! WebRTC transport layer: peer connection ownership and track frame sources

mod peer;
mod tracks;

pub use peer::{ice_servers_from, CameraPeer, TransportEvent, TransportState};
pub use tracks::{
    AudioFrameSource, H264TrackSource, OpusTrackSource, RawAudioFrame, RawVideoFrame,
    VideoFrameSource, AUDIO_SAMPLE_RATE,
};
