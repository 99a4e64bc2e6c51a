//! Bridge configuration (TOML file + defaults)

mod schema;

use std::path::Path;

use crate::error::{AppError, Result};

pub use schema::{
    BridgeConfig, CameraSettings, FfmpegLogLevel, IceServerSettings, RemuxSettings,
    RtspTransport, SignalingSettings, StreamSettings,
};

/// Load and validate a configuration file.
pub fn load(path: &Path) -> Result<BridgeConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("failed to read {}: {}", path.display(), e)))?;
    let config: BridgeConfig = toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("failed to parse {}: {}", path.display(), e)))?;
    config.validate()?;
    Ok(config)
}
