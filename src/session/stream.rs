//! One camera's stream session: lifecycle facade and recovery policy.
//!
//! All connection work happens on a dedicated task (see `connect`); the
//! facade serializes transitions, owns the reconnect counter, and exposes
//! read-only snapshots to the orchestrator.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::connect::run_connection;
use super::state::StreamState;
use crate::api::{CameraEndpoint, CredentialSource};
use crate::config::{RemuxSettings, StreamSettings};
use crate::error::{AppError, Result};
use crate::media::{MediaPipeSet, RemuxSlot};
use crate::transport::TransportState;

/// Exponential backoff saturates at this delay
pub(crate) const BACKOFF_CAP_SECS: u64 = 60;
/// Consecutive failures before the session stops trying
pub(crate) const MAX_RECONNECT_ATTEMPTS: u32 = 10;
/// ICE `disconnected` tolerated this long before the warning escalates
const DISCONNECT_GRACE: Duration = Duration::from_secs(300);
/// Recent-motion window reported by `get_info`
const MOTION_WINDOW: Duration = Duration::from_secs(60);
/// Bounded wait for the connection task to unwind during stop
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Fatal failure classes, all feeding the same teardown/backoff path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Credential,
    Channel,
    Transport,
    MediaPump,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Credential => write!(f, "credential failure"),
            Self::Channel => write!(f, "signaling channel failure"),
            Self::Transport => write!(f, "transport failure"),
            Self::MediaPump => write!(f, "media pump failure"),
        }
    }
}

/// Map an attempt error to the failure class recovery will log
pub(crate) fn classify(error: &AppError) -> Option<FailureKind> {
    match error {
        AppError::Credential(_) => Some(FailureKind::Credential),
        AppError::Transport(_) => Some(FailureKind::Transport),
        AppError::Media(_) => Some(FailureKind::MediaPump),
        AppError::CameraOffline(_) => None,
        _ => Some(FailureKind::Channel),
    }
}

/// Backoff delay for a given attempt number
pub(crate) fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(attempt).min(BACKOFF_CAP_SECS))
}

struct IceHealth {
    state: TransportState,
    disconnected_since: Option<Instant>,
}

/// State cell shared between the facade and the connection task.
///
/// Transitions are performed by the owning task, `stop`, or recovery; the
/// locks only make the individual writes atomic.
pub(crate) struct SessionShared {
    pub(crate) uri: String,
    state: RwLock<StreamState>,
    ice: RwLock<IceHealth>,
    start_time: RwLock<Option<Instant>>,
    motion_ts: RwLock<Option<Instant>>,
    reconnects: AtomicU32,
    pub(crate) failure: Mutex<Option<FailureKind>>,
    pub(crate) remux: RemuxSlot,
}

impl SessionShared {
    fn new(uri: String) -> Self {
        Self {
            uri,
            state: RwLock::new(StreamState::Stopped),
            ice: RwLock::new(IceHealth {
                state: TransportState::New,
                disconnected_since: None,
            }),
            start_time: RwLock::new(None),
            motion_ts: RwLock::new(None),
            reconnects: AtomicU32::new(0),
            failure: Mutex::new(None),
            remux: RemuxSlot::default(),
        }
    }

    pub(crate) fn state(&self) -> StreamState {
        *self.state.read()
    }

    pub(crate) fn set_state(&self, new: StreamState) {
        let mut state = self.state.write();
        if *state != new {
            info!("Stream {} state: {} -> {}", self.uri, state, new);
            *state = new;
        }
    }

    /// Settle in `Stopped` unless a deliberate state was already set.
    pub(crate) fn settle_stopped(&self) {
        let mut state = self.state.write();
        if !matches!(
            *state,
            StreamState::Stopping | StreamState::Stopped | StreamState::Disabled | StreamState::Offline
        ) {
            info!("Stream {} state: {} -> stopped", self.uri, state);
            *state = StreamState::Stopped;
        }
    }

    fn begin_connecting(&self) -> std::result::Result<(), StreamState> {
        let mut state = self.state.write();
        match *state {
            StreamState::Stopped | StreamState::Initializing => {
                info!("Stream {} state: {} -> connecting", self.uri, state);
                *state = StreamState::Connecting;
                Ok(())
            }
            other => Err(other),
        }
    }

    fn enable(&self) {
        let mut state = self.state.write();
        if *state == StreamState::Disabled {
            info!("Stream {} enabled", self.uri);
            *state = StreamState::Stopped;
        }
    }

    pub(crate) fn note_ice_state(&self, new: TransportState) {
        let mut ice = self.ice.write();
        if ice.state != new {
            info!("Stream {} ICE state: {}", self.uri, new);
        }
        match new {
            TransportState::Disconnected => {
                if ice.disconnected_since.is_none() {
                    warn!("Stream {} ICE disconnected, connection may recover", self.uri);
                    ice.disconnected_since = Some(Instant::now());
                }
            }
            TransportState::Connected | TransportState::Completed => {
                ice.disconnected_since = None;
            }
            _ => {}
        }
        ice.state = new;
    }

    pub(crate) fn reset_ice(&self) {
        let mut ice = self.ice.write();
        ice.state = TransportState::New;
        ice.disconnected_since = None;
    }

    fn ice_snapshot(&self) -> (TransportState, Option<Instant>) {
        let ice = self.ice.read();
        (ice.state, ice.disconnected_since)
    }

    /// Successful connection: stamp the start time, reset the counter.
    pub(crate) fn mark_connected(&self) {
        *self.start_time.write() = Some(Instant::now());
        self.reconnects.store(0, Ordering::SeqCst);
    }

    fn bump_reconnects(&self) -> u32 {
        self.reconnects.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn reconnects(&self) -> u32 {
        self.reconnects.load(Ordering::SeqCst)
    }

    fn uptime_secs(&self) -> u64 {
        self.start_time
            .read()
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0)
    }
}

/// Everything the connection task needs
pub(crate) struct SessionCtx {
    pub(crate) camera: CameraEndpoint,
    pub(crate) options: StreamSettings,
    pub(crate) remux: RemuxSettings,
    pub(crate) credentials: Arc<dyn CredentialSource>,
    pub(crate) shared: SessionShared,
}

struct Runner {
    handle: JoinHandle<()>,
    stop: CancellationToken,
}

/// Read-only session snapshot
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub uri: String,
    pub nickname: String,
    pub state: StreamState,
    pub connected: bool,
    pub enabled: bool,
    pub motion: bool,
    pub uptime: u64,
    pub reconnects: u32,
}

/// Per-camera WebRTC stream session
pub struct StreamSession {
    ctx: Arc<SessionCtx>,
    runner: Mutex<Option<Runner>>,
    recovery: Mutex<Option<CancellationToken>>,
    recovery_task: Mutex<Option<JoinHandle<()>>>,
    weak_self: Weak<StreamSession>,
}

impl StreamSession {
    pub fn new(
        camera: CameraEndpoint,
        options: StreamSettings,
        remux: RemuxSettings,
        credentials: Arc<dyn CredentialSource>,
    ) -> Arc<Self> {
        let shared = SessionShared::new(camera.name_uri.clone());
        let ctx = Arc::new(SessionCtx {
            camera,
            options,
            remux,
            credentials,
            shared,
        });
        Arc::new_cyclic(|weak| Self {
            ctx,
            runner: Mutex::new(None),
            recovery: Mutex::new(None),
            recovery_task: Mutex::new(None),
            weak_self: weak.clone(),
        })
    }

    pub fn uri(&self) -> &str {
        &self.ctx.shared.uri
    }

    pub fn state(&self) -> StreamState {
        self.ctx.shared.state()
    }

    pub fn connected(&self) -> bool {
        self.state() == StreamState::Connected
    }

    pub fn enabled(&self) -> bool {
        self.state().is_enabled()
    }

    pub fn motion(&self) -> bool {
        self.ctx
            .shared
            .motion_ts
            .read()
            .map(|t| t.elapsed() < MOTION_WINDOW)
            .unwrap_or(false)
    }

    /// Record a motion event reported by the catalog collaborator.
    pub fn note_motion(&self) {
        *self.ctx.shared.motion_ts.write() = Some(Instant::now());
    }

    pub fn reconnects(&self) -> u32 {
        self.ctx.shared.reconnects()
    }

    /// The remux fabric announced this camera's path. Metadata only.
    pub fn init(&self) {
        info!("Stream {} path initializing", self.ctx.shared.uri);
        self.ctx.shared.set_state(StreamState::Initializing);
    }

    /// Launch the connection task. Allowed from `Stopped` or `Initializing`.
    pub fn start(&self) -> Result<()> {
        self.ctx.shared.begin_connecting().map_err(|state| {
            warn!(
                "Stream {} cannot start while {}",
                self.ctx.shared.uri, state
            );
            AppError::InvalidState {
                op: "start",
                state: state.to_string(),
            }
        })?;

        *self.ctx.shared.failure.lock() = None;
        self.ctx.shared.reset_ice();

        let stop = CancellationToken::new();
        let handle = tokio::spawn(run_connection(self.ctx.clone(), stop.clone()));
        *self.runner.lock() = Some(Runner { handle, stop });
        Ok(())
    }

    /// Tear down the connection attempt and every resource it holds.
    ///
    /// Idempotent, safe to call concurrently with an in-flight attempt, and
    /// preempts a pending reconnect backoff.
    pub async fn stop(&self) -> Result<()> {
        if let Some(guard) = self.recovery.lock().take() {
            guard.cancel();
        }
        if let Some(task) = self.recovery_task.lock().take() {
            task.abort();
        }

        let current = self.state();
        if current == StreamState::Stopped {
            return Ok(());
        }
        let resume_disabled = current == StreamState::Disabled;

        info!("Stream {} stopping", self.ctx.shared.uri);
        self.ctx.shared.set_state(StreamState::Stopping);

        let runner = self.runner.lock().take();
        if let Some(runner) = runner {
            runner.stop.cancel();
            let abort = runner.handle.abort_handle();
            if tokio::time::timeout(STOP_JOIN_TIMEOUT, runner.handle)
                .await
                .is_err()
            {
                warn!(
                    "Stream {} connection task did not unwind in time",
                    self.ctx.shared.uri
                );
                abort.abort();
            }
        }

        // Fallback cleanup; a no-op when the task already tore down
        if let Some(mut process) = self.ctx.shared.remux.lock().await.take() {
            process.shutdown().await;
        }
        MediaPipeSet::for_camera(&self.ctx.remux.pipe_dir, &self.ctx.shared.uri, true).remove();

        self.ctx.shared.set_state(if resume_disabled {
            StreamState::Disabled
        } else {
            StreamState::Stopped
        });
        Ok(())
    }

    /// Stop and park the session; only `enable` brings it back.
    pub async fn disable(&self) {
        info!("Stream {} disabling", self.ctx.shared.uri);
        let _ = self.stop().await;
        self.ctx.shared.set_state(StreamState::Disabled);
    }

    /// Move `Disabled` back to `Stopped`. Never auto-starts.
    pub fn enable(&self) {
        self.ctx.shared.enable();
    }

    /// Inspect the transport and subprocess, run recovery on fatal states.
    pub async fn health_check(&self) -> StreamState {
        if self.state() == StreamState::Connected {
            let remux_exit = {
                let mut slot = self.ctx.shared.remux.lock().await;
                slot.as_mut().and_then(|p| p.has_exited())
            };
            if let Some(status) = remux_exit {
                warn!(
                    "Stream {} remux process died ({})",
                    self.ctx.shared.uri, status
                );
                self.handle_failure(FailureKind::MediaPump).await;
                return self.state();
            }

            let (ice, disconnected_since) = self.ctx.shared.ice_snapshot();
            if ice.is_fatal() {
                warn!(
                    "Stream {} ICE connection {} - possible credential expiration",
                    self.ctx.shared.uri, ice
                );
                self.handle_failure(FailureKind::Transport).await;
                return self.state();
            }
            if ice == TransportState::Disconnected {
                if let Some(since) = disconnected_since {
                    if since.elapsed() > DISCONNECT_GRACE {
                        warn!(
                            "Stream {} extended ICE disconnection ({}s)",
                            self.ctx.shared.uri,
                            since.elapsed().as_secs()
                        );
                    }
                }
            }
        }

        let pending = self.ctx.shared.failure.lock().take();
        if let Some(kind) = pending {
            self.handle_failure(kind).await;
        }

        self.state()
    }

    /// Full stop, then a delayed restart when reconnection is enabled.
    async fn handle_failure(&self, kind: FailureKind) {
        let uri = self.ctx.shared.uri.clone();
        warn!("Stream {} recovering from {}", uri, kind);

        let _ = self.stop().await;
        *self.ctx.shared.failure.lock() = None;

        if !self.ctx.options.reconnect {
            info!("Stream {} reconnect disabled, staying stopped", uri);
            return;
        }

        let attempt = self.ctx.shared.bump_reconnects();
        if attempt >= MAX_RECONNECT_ATTEMPTS {
            error!("Stream {} reached max reconnect attempts", uri);
            return;
        }

        let delay = backoff_delay(attempt);
        info!(
            "Stream {} reconnecting in {}s (attempt {})",
            uri,
            delay.as_secs(),
            attempt
        );

        let Some(session) = self.weak_self.upgrade() else {
            return;
        };
        let guard = CancellationToken::new();
        *self.recovery.lock() = Some(guard.clone());
        let task = tokio::spawn(async move {
            tokio::select! {
                _ = guard.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if let Err(e) = session.start() {
                        warn!(
                            "Stream {} reconnect start failed: {}",
                            session.ctx.shared.uri, e
                        );
                    }
                }
            }
        });
        *self.recovery_task.lock() = Some(task);
    }

    /// Human-readable state name.
    pub fn status(&self) -> &'static str {
        self.state().as_str()
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            uri: self.ctx.shared.uri.clone(),
            nickname: self.ctx.camera.nickname.clone(),
            state: self.state(),
            connected: self.connected(),
            enabled: self.enabled(),
            motion: self.motion(),
            uptime: self.ctx.shared.uptime_secs(),
            reconnects: self.reconnects(),
        }
    }

    /// Snapshot as JSON, optionally narrowed to one field.
    pub fn get_info(&self, item: Option<&str>) -> serde_json::Value {
        let info = serde_json::to_value(self.info()).unwrap_or(serde_json::Value::Null);
        match item {
            Some(key) => info.get(key).cloned().unwrap_or(serde_json::Value::Null),
            None => info,
        }
    }

    /// Camera control has no back-channel over this transport.
    pub fn send_cmd(&self, cmd: &str, _payload: serde_json::Value) -> serde_json::Value {
        warn!(
            "Stream {} camera commands are not supported over this transport",
            self.ctx.shared.uri
        );
        json!({
            "error": "camera control not available over the WebRTC transport",
            "command": cmd,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::Path;

    use crate::api::SignalingCredentials;

    struct FailingCredentials;

    #[async_trait]
    impl CredentialSource for FailingCredentials {
        async fn fresh_credentials(&self, _uri: &str) -> Result<SignalingCredentials> {
            Err(AppError::Credential("signal result not ok".into()))
        }
    }

    struct PendingCredentials;

    #[async_trait]
    impl CredentialSource for PendingCredentials {
        async fn fresh_credentials(&self, _uri: &str) -> Result<SignalingCredentials> {
            futures::future::pending::<()>().await;
            unreachable!()
        }
    }

    struct OfflineCredentials;

    #[async_trait]
    impl CredentialSource for OfflineCredentials {
        async fn fresh_credentials(&self, _uri: &str) -> Result<SignalingCredentials> {
            Err(AppError::CameraOffline("camera unreachable".into()))
        }
    }

    fn session_with(
        credentials: Arc<dyn CredentialSource>,
        reconnect: bool,
        pipe_dir: &Path,
    ) -> Arc<StreamSession> {
        let camera = CameraEndpoint {
            name_uri: "cam1".into(),
            nickname: "Test Cam".into(),
            supports_webrtc: true,
        };
        let options = StreamSettings {
            reconnect,
            ..Default::default()
        };
        let remux = RemuxSettings {
            pipe_dir: pipe_dir.to_path_buf(),
            ..Default::default()
        };
        StreamSession::new(camera, options, remux, credentials)
    }

    async fn wait_for_state(session: &Arc<StreamSession>, wanted: StreamState) {
        for _ in 0..100 {
            if session.state() == wanted {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!(
            "session never reached {}, stuck in {}",
            wanted,
            session.state()
        );
    }

    #[test]
    fn backoff_table_matches_policy() {
        let mut previous = Duration::ZERO;
        for attempt in 1..=12 {
            let delay = backoff_delay(attempt);
            let expected = 2u64.pow(attempt).min(BACKOFF_CAP_SECS);
            assert_eq!(delay.as_secs(), expected, "attempt {}", attempt);
            assert!(delay >= previous, "backoff must not decrease");
            previous = delay;
        }
        assert_eq!(backoff_delay(6).as_secs(), 60);
        assert_eq!(backoff_delay(12).as_secs(), 60);
    }

    #[test]
    fn failure_classification() {
        assert_eq!(
            classify(&AppError::Credential("x".into())),
            Some(FailureKind::Credential)
        );
        assert_eq!(
            classify(&AppError::Channel("x".into())),
            Some(FailureKind::Channel)
        );
        assert_eq!(
            classify(&AppError::Transport("x".into())),
            Some(FailureKind::Transport)
        );
        assert_eq!(
            classify(&AppError::Media("x".into())),
            Some(FailureKind::MediaPump)
        );
        assert_eq!(classify(&AppError::CameraOffline("x".into())), None);
    }

    #[tokio::test]
    async fn credential_failure_ends_stopped_with_one_reconnect() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_with(Arc::new(FailingCredentials), true, dir.path());

        session.start().unwrap();
        wait_for_state(&session, StreamState::Stopped).await;

        session.health_check().await;
        assert_eq!(session.state(), StreamState::Stopped);
        assert_eq!(session.reconnects(), 1);

        // No pipes may exist after a failed attempt
        assert!(!dir.path().join("cam1_video.pipe").exists());
        assert!(!dir.path().join("cam1_audio.pipe").exists());

        session.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_preempts_a_pending_backoff() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_with(Arc::new(FailingCredentials), true, dir.path());

        session.start().unwrap();
        wait_for_state(&session, StreamState::Stopped).await;
        session.health_check().await;
        assert_eq!(session.reconnects(), 1);

        // A restart is now scheduled in 2s; stop must cancel it
        session.stop().await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(session.state(), StreamState::Stopped);
        assert_eq!(session.reconnects(), 1);
    }

    #[tokio::test]
    async fn reconnect_disabled_means_no_counter_bump() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_with(Arc::new(FailingCredentials), false, dir.path());

        session.start().unwrap();
        wait_for_state(&session, StreamState::Stopped).await;
        session.health_check().await;

        assert_eq!(session.state(), StreamState::Stopped);
        assert_eq!(session.reconnects(), 0);
    }

    #[tokio::test]
    async fn unreachable_camera_parks_offline() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_with(Arc::new(OfflineCredentials), true, dir.path());

        session.start().unwrap();
        wait_for_state(&session, StreamState::Offline).await;

        session.health_check().await;
        assert_eq!(session.state(), StreamState::Offline);
        assert_eq!(session.reconnects(), 0);
    }

    #[tokio::test]
    async fn start_is_rejected_outside_stopped_and_initializing() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_with(Arc::new(PendingCredentials), true, dir.path());

        session.start().unwrap();
        assert_eq!(session.state(), StreamState::Connecting);

        let rejected = session.start();
        assert!(matches!(
            rejected,
            Err(AppError::InvalidState { op: "start", .. })
        ));
        assert_eq!(session.state(), StreamState::Connecting);

        session.stop().await.unwrap();
        assert_eq!(session.state(), StreamState::Stopped);
    }

    #[tokio::test]
    async fn start_allowed_from_initializing() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_with(Arc::new(PendingCredentials), true, dir.path());

        session.init();
        assert_eq!(session.state(), StreamState::Initializing);
        session.start().unwrap();
        assert_eq!(session.state(), StreamState::Connecting);

        session.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_with(Arc::new(PendingCredentials), true, dir.path());

        session.stop().await.unwrap();
        session.stop().await.unwrap();
        assert_eq!(session.state(), StreamState::Stopped);

        session.start().unwrap();
        session.stop().await.unwrap();
        session.stop().await.unwrap();
        assert_eq!(session.state(), StreamState::Stopped);
    }

    #[tokio::test]
    async fn stop_from_connected_passes_through_stopping() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_with(Arc::new(PendingCredentials), true, dir.path());

        session.start().unwrap();
        session.ctx.shared.set_state(StreamState::Connected);
        session.stop().await.unwrap();
        assert_eq!(session.state(), StreamState::Stopped);
    }

    #[tokio::test]
    async fn disable_blocks_start_until_enable() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_with(Arc::new(PendingCredentials), true, dir.path());

        session.disable().await;
        assert_eq!(session.state(), StreamState::Disabled);
        assert!(!session.enabled());

        assert!(session.start().is_err());
        assert_eq!(session.state(), StreamState::Disabled);

        session.enable();
        assert_eq!(session.state(), StreamState::Stopped);
        assert!(session.enabled());

        // Enabling an already-enabled session changes nothing
        session.enable();
        assert_eq!(session.state(), StreamState::Stopped);
    }

    #[tokio::test]
    async fn connected_marker_resets_the_counter() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_with(Arc::new(FailingCredentials), true, dir.path());

        session.start().unwrap();
        wait_for_state(&session, StreamState::Stopped).await;
        session.health_check().await;
        assert_eq!(session.reconnects(), 1);
        session.stop().await.unwrap();

        session.ctx.shared.mark_connected();
        assert_eq!(session.reconnects(), 0);
        assert!(session.ctx.shared.uptime_secs() < 2);
    }

    #[tokio::test]
    async fn fatal_ice_state_triggers_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_with(Arc::new(FailingCredentials), true, dir.path());

        session.ctx.shared.set_state(StreamState::Connected);
        session.ctx.shared.note_ice_state(TransportState::Failed);

        session.health_check().await;
        assert_eq!(session.state(), StreamState::Stopped);
        assert_eq!(session.reconnects(), 1);

        session.stop().await.unwrap();
    }

    #[tokio::test]
    async fn transient_ice_disconnect_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_with(Arc::new(PendingCredentials), true, dir.path());

        session.ctx.shared.set_state(StreamState::Connected);
        session.ctx.shared.note_ice_state(TransportState::Disconnected);

        session.health_check().await;
        assert_eq!(session.state(), StreamState::Connected);
        assert_eq!(session.reconnects(), 0);

        // Recovering to connected clears the disconnect bookkeeping
        session.ctx.shared.note_ice_state(TransportState::Connected);
        session.health_check().await;
        assert_eq!(session.state(), StreamState::Connected);
        assert_eq!(session.reconnects(), 0);
    }

    #[tokio::test]
    async fn dead_remux_process_triggers_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_with(Arc::new(FailingCredentials), true, dir.path());

        let mut process = crate::media::RemuxProcess::spawn("true", &[], "cam1").unwrap();
        for _ in 0..50 {
            if process.has_exited().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        *session.ctx.shared.remux.lock().await = Some(process);
        session.ctx.shared.set_state(StreamState::Connected);
        session.ctx.shared.note_ice_state(TransportState::Connected);

        session.health_check().await;
        assert_eq!(session.state(), StreamState::Stopped);
        assert_eq!(session.reconnects(), 1);
        assert!(session.ctx.shared.remux.lock().await.is_none());

        session.stop().await.unwrap();
    }

    #[tokio::test]
    async fn info_snapshot_has_the_documented_fields() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_with(Arc::new(PendingCredentials), true, dir.path());

        let info = session.get_info(None);
        assert_eq!(info["uri"], "cam1");
        assert_eq!(info["nickname"], "Test Cam");
        assert_eq!(info["state"], "stopped");
        assert_eq!(info["connected"], false);
        assert_eq!(info["enabled"], true);
        assert_eq!(info["motion"], false);
        assert_eq!(info["uptime"], 0);
        assert_eq!(info["reconnects"], 0);

        assert_eq!(session.get_info(Some("state")), "stopped");
        assert_eq!(session.get_info(Some("bogus")), serde_json::Value::Null);
        assert_eq!(session.status(), "stopped");
    }

    #[tokio::test]
    async fn motion_flag_tracks_recent_events() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_with(Arc::new(PendingCredentials), true, dir.path());

        assert!(!session.motion());
        session.note_motion();
        assert!(session.motion());
    }

    #[test]
    fn send_cmd_always_reports_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_with(Arc::new(PendingCredentials), true, dir.path());

        let response = session.send_cmd("power_off", json!({}));
        assert_eq!(response["command"], "power_off");
        assert!(response["error"].as_str().unwrap().contains("not available"));
    }
}
