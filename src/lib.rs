//! camrelay - cloud WebRTC cameras on a local RTSP fabric
//!
//! This crate provides the per-camera WebRTC session engine: cloud
//! signaling, the session state machine with health monitoring and bounded
//! reconnection, and the media hand-off into named pipes read by an
//! external remux process.

pub mod api;
pub mod config;
pub mod error;
pub mod media;
pub mod session;
pub mod signaling;
pub mod transport;

pub use error::{AppError, Result};
