//! Boundary types for the camera catalog / credential collaborator.
//!
//! The cloud account login and camera catalog live outside this crate; a
//! session only ever sees an immutable [`CameraEndpoint`] and asks a
//! [`CredentialSource`] for fresh [`SignalingCredentials`] on every
//! connection attempt. Credentials are time-limited upstream and must never
//! be cached across reconnects.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One camera as the catalog collaborator describes it.
///
/// Immutable for the lifetime of a stream session; a catalog refresh
/// produces a new value and a session restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraEndpoint {
    /// Stable identifier, also the RTSP path and pipe-name stem
    pub name_uri: String,
    /// Display name
    pub nickname: String,
    /// Whether the camera supports the WebRTC transport at all
    pub supports_webrtc: bool,
}

/// One ICE server descriptor from the signaling credential record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServerDesc {
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// Fresh signaling material for one connection attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingCredentials {
    /// WebSocket URL of the cloud signaling endpoint; may be pre-signed
    pub signaling_url: String,
    /// Client identifier used as the envelope recipient
    pub client_id: String,
    /// Authentication token for non-pre-signed URLs
    pub signal_token: String,
    /// ICE servers to configure on the peer connection
    pub servers: Vec<IceServerDesc>,
}

/// Source of fresh signaling credentials, keyed by camera identifier.
///
/// Implementations report failures as error values: a generic not-ok result
/// maps to [`crate::AppError::Credential`] and feeds the reconnect path,
/// while a confirmed-unreachable camera maps to
/// [`crate::AppError::CameraOffline`] and parks the session.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn fresh_credentials(&self, uri: &str) -> Result<SignalingCredentials>;
}

/// Credential source backed by pre-provisioned material.
///
/// Useful when an external helper keeps the credential record up to date;
/// each call hands out the current material so the per-attempt contract
/// still holds.
pub struct StaticCredentialSource {
    credentials: SignalingCredentials,
}

impl StaticCredentialSource {
    pub fn new(credentials: SignalingCredentials) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl CredentialSource for StaticCredentialSource {
    async fn fresh_credentials(&self, _uri: &str) -> Result<SignalingCredentials> {
        Ok(self.credentials.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_source_hands_out_material_per_call() {
        let source = StaticCredentialSource::new(SignalingCredentials {
            signaling_url: "wss://signal.example.com/ws".into(),
            client_id: "client-1".into(),
            signal_token: "tok".into(),
            servers: vec![],
        });

        let a = source.fresh_credentials("cam1").await.unwrap();
        let b = source.fresh_credentials("cam1").await.unwrap();
        assert_eq!(a.client_id, "client-1");
        assert_eq!(b.signaling_url, a.signaling_url);
    }
}
