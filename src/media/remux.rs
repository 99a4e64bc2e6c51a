//! Remux subprocess: ffmpeg reading the pipes and publishing RTSP locally

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::pipes::MediaPipeSet;
use crate::config::RemuxSettings;
use crate::error::{AppError, Result};

/// Bounded wait after SIGTERM before escalating to SIGKILL
const TERMINATE_WAIT: Duration = Duration::from_secs(3);

/// Shared handle slot so the session health check can poll the subprocess
pub type RemuxSlot = Arc<Mutex<Option<RemuxProcess>>>;

/// Build the ffmpeg argument list for one camera.
///
/// The process reads the raw H264 elementary stream (and AAC, if present)
/// from the pipes and republishes them over RTSP without re-encoding.
pub fn remux_cmd(settings: &RemuxSettings, uri: &str, pipes: &MediaPipeSet) -> Vec<String> {
    let mut cmd: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        settings.loglevel.as_str().into(),
        "-thread_queue_size".into(),
        "8".into(),
        "-f".into(),
        "h264".into(),
        "-i".into(),
        pipes.video.to_string_lossy().into_owned(),
    ];

    if let Some(audio) = &pipes.audio {
        cmd.extend([
            "-thread_queue_size".into(),
            "8".into(),
            "-f".into(),
            "aac".into(),
            "-i".into(),
            audio.to_string_lossy().into_owned(),
        ]);
    }

    cmd.extend(["-map".into(), "0:v".into(), "-c:v".into(), "copy".into()]);
    if pipes.audio.is_some() {
        cmd.extend(["-map".into(), "1:a".into(), "-c:a".into(), "copy".into()]);
    }

    cmd.extend([
        "-f".into(),
        "rtsp".into(),
        "-rtsp_transport".into(),
        settings.rtsp_transport.as_str().into(),
        format!("{}/{}", settings.rtsp_base_url.trim_end_matches('/'), uri),
    ]);

    cmd
}

/// One running remux subprocess
pub struct RemuxProcess {
    child: Child,
}

impl RemuxProcess {
    /// Spawn the subprocess with its output drained into debug logs.
    pub fn spawn(bin: &str, args: &[String], uri: &str) -> Result<Self> {
        info!("Starting remux for {}: {} {}", uri, bin, args.join(" "));

        let mut child = Command::new(bin)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AppError::Media(format!("failed to start remux process: {}", e)))?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(drain_logs(uri.to_owned(), stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_logs(uri.to_owned(), stderr));
        }

        debug!("Remux for {} started with PID {:?}", uri, child.id());
        Ok(Self { child })
    }

    /// Exit status if the process has died.
    pub fn has_exited(&mut self) -> Option<ExitStatus> {
        self.child.try_wait().ok().flatten()
    }

    /// Terminate gracefully, then kill after a bounded wait.
    pub async fn shutdown(&mut self) {
        if self.has_exited().is_some() {
            return;
        }

        if let Some(pid) = self.child.id() {
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
            if timeout(TERMINATE_WAIT, self.child.wait()).await.is_ok() {
                debug!("Remux process exited after SIGTERM");
                return;
            }
            warn!("Remux process ignored SIGTERM, killing");
        }

        let _ = self.child.kill().await;
    }
}

async fn drain_logs<R>(uri: String, reader: R)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!("[{} remux] {}", uri, line);
    }
}
