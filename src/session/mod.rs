//! Per-camera stream sessions: state machine, connection driver, supervisor

mod connect;
mod state;
mod stream;
mod supervisor;

pub use state::StreamState;
pub use stream::{FailureKind, SessionInfo, StreamSession};
pub use supervisor::SessionSupervisor;
