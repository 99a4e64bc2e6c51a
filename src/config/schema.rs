use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::api::{IceServerDesc, SignalingCredentials};
use crate::error::{AppError, Result};

/// Main bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Cameras to bridge
    pub cameras: Vec<CameraSettings>,
    /// Per-stream behavior
    pub stream: StreamSettings,
    /// Remux subprocess settings
    pub remux: RemuxSettings,
    /// Signaling credential material
    pub signaling: SignalingSettings,
    /// Seconds between supervisor health checks
    pub health_interval_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            cameras: Vec::new(),
            stream: StreamSettings::default(),
            remux: RemuxSettings::default(),
            signaling: SignalingSettings::default(),
            health_interval_secs: 10,
        }
    }
}

impl BridgeConfig {
    pub fn validate(&self) -> Result<()> {
        for cam in &self.cameras {
            if cam.name_uri.is_empty() {
                return Err(AppError::Config("camera name_uri must not be empty".into()));
            }
            // The identifier becomes pipe file names and the RTSP path
            if !cam
                .name_uri
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            {
                return Err(AppError::Config(format!(
                    "camera name_uri {:?} contains characters unsafe for pipe paths",
                    cam.name_uri
                )));
            }
        }
        if self.health_interval_secs == 0 {
            return Err(AppError::Config("health_interval_secs must be positive".into()));
        }
        Ok(())
    }
}

/// One configured camera
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    /// Stable identifier (RTSP path, pipe name stem)
    pub name_uri: String,
    /// Display name; falls back to the identifier
    pub nickname: Option<String>,
    /// Whether the bridge should run this camera at all
    pub enabled: bool,
    /// Whether the camera supports the WebRTC transport
    pub webrtc: bool,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            name_uri: String::new(),
            nickname: None,
            enabled: true,
            webrtc: true,
        }
    }
}

/// Per-stream behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    /// Reconnect with backoff after fatal failures
    pub reconnect: bool,
    /// Bridge the audio track when the camera offers one
    pub audio: bool,
    /// Target video bitrate in kbps
    pub bitrate_kbps: u32,
    /// Negotiated framerate (also the keyframe cadence)
    pub fps: u32,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            reconnect: true,
            audio: false,
            bitrate_kbps: 1000,
            fps: 30,
        }
    }
}

/// ffmpeg log level passed through to the remux subprocess
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FfmpegLogLevel {
    Quiet,
    Panic,
    Fatal,
    Error,
    Warning,
    Info,
    Verbose,
    Debug,
}

impl FfmpegLogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quiet => "quiet",
            Self::Panic => "panic",
            Self::Fatal => "fatal",
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
            Self::Verbose => "verbose",
            Self::Debug => "debug",
        }
    }
}

impl Default for FfmpegLogLevel {
    fn default() -> Self {
        Self::Fatal
    }
}

impl std::fmt::Display for FfmpegLogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// RTSP transport used between the remux process and the local server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RtspTransport {
    Tcp,
    Udp,
}

impl RtspTransport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

impl Default for RtspTransport {
    fn default() -> Self {
        Self::Tcp
    }
}

/// Remux subprocess settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemuxSettings {
    /// ffmpeg binary to invoke
    pub ffmpeg_bin: String,
    /// ffmpeg log level
    pub loglevel: FfmpegLogLevel,
    /// RTSP transport towards the local server
    pub rtsp_transport: RtspTransport,
    /// Base URL of the local RTSP server; the camera identifier is appended
    pub rtsp_base_url: String,
    /// Directory for the named pipes
    pub pipe_dir: PathBuf,
}

impl Default for RemuxSettings {
    fn default() -> Self {
        Self {
            ffmpeg_bin: "ffmpeg".into(),
            loglevel: FfmpegLogLevel::default(),
            rtsp_transport: RtspTransport::default(),
            rtsp_base_url: "rtsp://127.0.0.1:8554".into(),
            pipe_dir: PathBuf::from("/tmp"),
        }
    }
}

/// Signaling credential material for the config-backed credential source
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingSettings {
    pub url: String,
    pub client_id: String,
    pub signal_token: String,
    pub ice_servers: Vec<IceServerSettings>,
}

impl SignalingSettings {
    pub fn to_credentials(&self) -> SignalingCredentials {
        SignalingCredentials {
            signaling_url: self.url.clone(),
            client_id: self.client_id.clone(),
            signal_token: self.signal_token.clone(),
            servers: self
                .ice_servers
                .iter()
                .map(|s| IceServerDesc {
                    urls: s.urls.clone(),
                    username: s.username.clone(),
                    credential: s.credential.clone(),
                })
                .collect(),
        }
    }
}

/// One ICE server entry in the config file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IceServerSettings {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = BridgeConfig::default();
        assert!(config.stream.reconnect);
        assert!(!config.stream.audio);
        assert_eq!(config.stream.fps, 30);
        assert_eq!(config.remux.ffmpeg_bin, "ffmpeg");
        assert_eq!(config.remux.loglevel, FfmpegLogLevel::Fatal);
        assert_eq!(config.health_interval_secs, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_minimal_file() {
        let raw = r#"
            [[cameras]]
            name_uri = "front-door"

            [stream]
            audio = true

            [remux]
            loglevel = "error"
            rtsp_transport = "udp"

            [signaling]
            url = "wss://signal.example.com/ws"
            client_id = "client-1"
            signal_token = "tok"
        "#;
        let config: BridgeConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.cameras.len(), 1);
        assert_eq!(config.cameras[0].name_uri, "front-door");
        assert!(config.cameras[0].enabled);
        assert!(config.stream.audio);
        assert_eq!(config.remux.loglevel, FfmpegLogLevel::Error);
        assert_eq!(config.remux.rtsp_transport, RtspTransport::Udp);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_unsafe_camera_identifier() {
        let mut config = BridgeConfig::default();
        config.cameras.push(CameraSettings {
            name_uri: "../etc/passwd".into(),
            ..Default::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_empty_camera_identifier() {
        let mut config = BridgeConfig::default();
        config.cameras.push(CameraSettings::default());
        assert!(config.validate().is_err());
    }

    #[test]
    fn signaling_settings_convert_to_credentials() {
        let settings = SignalingSettings {
            url: "wss://signal.example.com/ws".into(),
            client_id: "client-1".into(),
            signal_token: "tok".into(),
            ice_servers: vec![IceServerSettings {
                urls: vec!["turn:turn.example.com:443".into()],
                username: Some("user".into()),
                credential: Some("pass".into()),
            }],
        };
        let creds = settings.to_credentials();
        assert_eq!(creds.servers.len(), 1);
        assert_eq!(creds.servers[0].username.as_deref(), Some("user"));
    }
}
