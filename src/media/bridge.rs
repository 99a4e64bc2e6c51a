//! Orchestration of one connected episode's media path.
//!
//! Order matters: pipes exist before the subprocess spawns, the subprocess
//! is running before any pump opens a pipe for writing, and cleanup tears
//! all three down exactly once whichever way the episode ends.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::pipes::MediaPipeSet;
use super::remux::{remux_cmd, RemuxProcess, RemuxSlot};
use super::{pump_audio, pump_video};
use crate::config::{RemuxSettings, StreamSettings};
use crate::error::Result;
use crate::transport::{AudioFrameSource, VideoFrameSource, AUDIO_SAMPLE_RATE};

const PUMP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Live media path for one connected episode
pub struct MediaBridge {
    uri: String,
    pipes: MediaPipeSet,
    stop: CancellationToken,
    pumps: Vec<JoinHandle<Result<()>>>,
}

impl MediaBridge {
    /// Create the pipes, spawn the remux subprocess into `remux_slot`, and
    /// start the pump tasks.
    pub async fn start(
        remux: &RemuxSettings,
        stream: &StreamSettings,
        uri: &str,
        video: Box<dyn VideoFrameSource>,
        audio: Option<Box<dyn AudioFrameSource>>,
        remux_slot: &RemuxSlot,
        parent: &CancellationToken,
    ) -> Result<Self> {
        let pipes = MediaPipeSet::for_camera(&remux.pipe_dir, uri, audio.is_some());
        pipes.create()?;

        let args = remux_cmd(remux, uri, &pipes);
        let process = match RemuxProcess::spawn(&remux.ffmpeg_bin, &args, uri) {
            Ok(process) => process,
            Err(e) => {
                pipes.remove();
                return Err(e);
            }
        };
        *remux_slot.lock().await = Some(process);

        let stop = parent.child_token();
        let mut pumps = Vec::new();
        pumps.push(tokio::spawn(pump_video(
            video,
            pipes.video.clone(),
            stream.fps,
            uri.to_owned(),
            stop.clone(),
        )));
        if let (Some(audio), Some(audio_pipe)) = (audio, pipes.audio.clone()) {
            pumps.push(tokio::spawn(pump_audio(
                audio,
                audio_pipe,
                AUDIO_SAMPLE_RATE,
                uri.to_owned(),
                stop.clone(),
            )));
        }

        info!("Media bridge for {} started ({} pumps)", uri, pumps.len());
        Ok(Self {
            uri: uri.to_owned(),
            pipes,
            stop,
            pumps,
        })
    }

    /// Hand the pump handles to a watcher; the bridge keeps ownership of
    /// pipes, subprocess slot and the stop token for cleanup.
    pub fn take_pumps(&mut self) -> Vec<JoinHandle<Result<()>>> {
        std::mem::take(&mut self.pumps)
    }

    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Tear everything down: cancel pumps, terminate the subprocess, remove
    /// the pipes. Safe against a concurrent fallback cleanup because the
    /// subprocess handle is taken out of the shared slot.
    pub async fn shutdown(mut self, remux_slot: &RemuxSlot) {
        self.stop.cancel();
        for pump in self.pumps.drain(..) {
            if timeout(PUMP_JOIN_TIMEOUT, pump).await.is_err() {
                warn!("Media pump for {} did not stop in time", self.uri);
            }
        }
        if let Some(mut process) = remux_slot.lock().await.take() {
            process.shutdown().await;
        }
        self.pipes.remove();
        info!("Media bridge for {} cleaned up", self.uri);
    }
}
