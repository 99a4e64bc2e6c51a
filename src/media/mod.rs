//! Media hand-off: named pipes, the remux subprocess, and the encode pumps

mod audio;
mod bridge;
mod pipes;
mod remux;
mod video;

pub use audio::{pump_audio, AacEncoder};
pub use bridge::MediaBridge;
pub use pipes::MediaPipeSet;
pub use remux::{remux_cmd, RemuxProcess, RemuxSlot};
pub use video::{pump_video, VideoEncoder};
