//! Owns the session collection and the periodic health-check tasks.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::stream::StreamSession;

const MONITOR_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs one health-check loop per session and tears everything down on
/// shutdown. The monitor handles are owned here; nothing lives in
/// process-global state.
pub struct SessionSupervisor {
    interval: Duration,
    sessions: RwLock<Vec<Arc<StreamSession>>>,
    monitors: Mutex<Vec<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl SessionSupervisor {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            sessions: RwLock::new(Vec::new()),
            monitors: Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn add(&self, session: Arc<StreamSession>) {
        self.sessions.write().push(session);
    }

    pub fn sessions(&self) -> Vec<Arc<StreamSession>> {
        self.sessions.read().clone()
    }

    pub fn get(&self, uri: &str) -> Option<Arc<StreamSession>> {
        self.sessions
            .read()
            .iter()
            .find(|s| s.uri() == uri)
            .cloned()
    }

    /// Spawn one monitor task per session added so far.
    pub fn start(&self) {
        let mut monitors = self.monitors.lock();
        for session in self.sessions.read().iter().cloned() {
            let interval = self.interval;
            let shutdown = self.shutdown.clone();
            monitors.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = ticker.tick() => {
                            session.health_check().await;
                        }
                    }
                }
            }));
        }
        info!(
            "Session supervisor started ({} sessions, every {}s)",
            self.sessions.read().len(),
            self.interval.as_secs()
        );
    }

    /// Cancel the monitors and stop every session.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let monitors: Vec<_> = self.monitors.lock().drain(..).collect();
        for monitor in monitors {
            if timeout(MONITOR_JOIN_TIMEOUT, monitor).await.is_err() {
                warn!("Session monitor did not finish in time");
            }
        }

        for session in self.sessions() {
            if let Err(e) = session.stop().await {
                warn!("Failed to stop stream {}: {}", session.uri(), e);
            }
        }
        info!("Session supervisor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::api::{CameraEndpoint, CredentialSource, SignalingCredentials};
    use crate::config::{RemuxSettings, StreamSettings};
    use crate::error::{AppError, Result};
    use crate::session::StreamState;

    struct FailingCredentials;

    #[async_trait]
    impl CredentialSource for FailingCredentials {
        async fn fresh_credentials(&self, _uri: &str) -> Result<SignalingCredentials> {
            Err(AppError::Credential("signal result not ok".into()))
        }
    }

    fn session(uri: &str, pipe_dir: &std::path::Path) -> Arc<StreamSession> {
        StreamSession::new(
            CameraEndpoint {
                name_uri: uri.into(),
                nickname: uri.into(),
                supports_webrtc: true,
            },
            StreamSettings {
                reconnect: false,
                ..Default::default()
            },
            RemuxSettings {
                pipe_dir: pipe_dir.to_path_buf(),
                ..Default::default()
            },
            Arc::new(FailingCredentials),
        )
    }

    #[tokio::test]
    async fn monitors_run_and_shut_down_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = SessionSupervisor::new(Duration::from_millis(50));

        supervisor.add(session("cam1", dir.path()));
        supervisor.add(session("cam2", dir.path()));
        assert_eq!(supervisor.sessions().len(), 2);
        assert!(supervisor.get("cam1").is_some());
        assert!(supervisor.get("nope").is_none());

        for s in supervisor.sessions() {
            s.start().unwrap();
        }
        supervisor.start();

        // Give the failing attempts and a few health ticks time to run
        tokio::time::sleep(Duration::from_millis(300)).await;
        supervisor.shutdown().await;

        for s in supervisor.sessions() {
            assert_eq!(s.state(), StreamState::Stopped);
        }
    }
}
