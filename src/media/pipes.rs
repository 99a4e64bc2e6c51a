//! Named pipe pair for one connected episode.
//!
//! Pipes exist only between bridge start and cleanup; a leftover pipe from
//! a crashed episode is reused rather than treated as an error.

use std::path::{Path, PathBuf};

use nix::sys::stat::Mode;
use tracing::{debug, warn};

use crate::error::{AppError, Result};

/// The fifo pair the remux subprocess reads from
#[derive(Debug, Clone)]
pub struct MediaPipeSet {
    pub video: PathBuf,
    pub audio: Option<PathBuf>,
}

impl MediaPipeSet {
    /// Derive the pipe paths for a camera.
    pub fn for_camera(pipe_dir: &Path, uri: &str, audio: bool) -> Self {
        Self {
            video: pipe_dir.join(format!("{}_video.pipe", uri)),
            audio: audio.then(|| pipe_dir.join(format!("{}_audio.pipe", uri))),
        }
    }

    /// Create the fifos. Idempotent.
    pub fn create(&self) -> Result<()> {
        create_fifo(&self.video)?;
        if let Some(audio) = &self.audio {
            create_fifo(audio)?;
        }
        Ok(())
    }

    /// Remove the fifos, best-effort. Idempotent.
    pub fn remove(&self) {
        remove_quiet(&self.video);
        if let Some(audio) = &self.audio {
            remove_quiet(audio);
        }
    }
}

fn create_fifo(path: &Path) -> Result<()> {
    match nix::unistd::mkfifo(path, Mode::from_bits_truncate(0o644)) {
        Ok(()) => {
            debug!("Created pipe {}", path.display());
            Ok(())
        }
        Err(nix::errno::Errno::EEXIST) => {
            debug!("Pipe {} already exists, reusing", path.display());
            Ok(())
        }
        Err(e) => Err(AppError::Media(format!(
            "failed to create pipe {}: {}",
            path.display(),
            e
        ))),
    }
}

fn remove_quiet(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed pipe {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove pipe {}: {}", path.display(), e),
    }
}
