//! The per-attempt connection coroutine.
//!
//! One task per attempt owns the signaling channel, the peer connection and
//! the media bridge, and multiplexes their event queues. Fatal errors are
//! recorded for the next health check; teardown runs on every exit path.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_remote::TrackRemote;

use super::state::StreamState;
use super::stream::{classify, FailureKind, SessionCtx};
use crate::error::{AppError, Result};
use crate::media::MediaBridge;
use crate::signaling::{SignalingChannel, SignalingEvent};
use crate::transport::{
    ice_servers_from, AudioFrameSource, CameraPeer, H264TrackSource, OpusTrackSource,
    TransportEvent, TransportState,
};

const EVENT_QUEUE: usize = 64;
const WATCHER_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection-attempt resources, collected so teardown can release them on
/// any exit path.
#[derive(Default)]
struct Connection {
    channel: Option<SignalingChannel>,
    peer: Option<CameraPeer>,
    bridge: Option<MediaBridge>,
    pump_watcher: Option<JoinHandle<()>>,
    video_track: Option<Arc<TrackRemote>>,
    audio_track: Option<Arc<TrackRemote>>,
}

impl Connection {
    async fn negotiate(&self) -> Result<()> {
        let (Some(peer), Some(channel)) = (&self.peer, &self.channel) else {
            return Ok(());
        };
        let offer = peer.create_offer().await?;
        channel.send_offer(&offer).await
    }

    async fn set_answer(&self, sdp: String) -> Result<()> {
        match &self.peer {
            Some(peer) => peer.set_answer(sdp).await,
            None => Ok(()),
        }
    }

    async fn add_remote_candidate(&self, candidate: crate::signaling::IceCandidatePayload) {
        if let Some(peer) = &self.peer {
            if let Err(e) = peer.add_remote_candidate(candidate).await {
                warn!("Failed to add remote ICE candidate: {}", e);
            }
        }
    }

    fn send_local_candidate(&self, candidate: &crate::signaling::IceCandidatePayload) {
        if let Some(channel) = &self.channel {
            channel.send_ice_candidate(candidate);
        }
    }

    async fn teardown(&mut self, ctx: &SessionCtx) {
        if let Some(bridge) = self.bridge.take() {
            bridge.stop_token().cancel();
            if let Some(watcher) = self.pump_watcher.take() {
                if timeout(WATCHER_JOIN_TIMEOUT, watcher).await.is_err() {
                    warn!("Stream {} pump watcher did not finish", ctx.shared.uri);
                }
            }
            bridge.shutdown(&ctx.shared.remux).await;
        } else if let Some(mut process) = ctx.shared.remux.lock().await.take() {
            process.shutdown().await;
        }

        if let Some(peer) = self.peer.take() {
            if let Err(e) = peer.close().await {
                debug!("Peer close: {}", e);
            }
        }
        if let Some(mut channel) = self.channel.take() {
            channel.close().await;
        }
        self.video_track = None;
        self.audio_track = None;
    }
}

/// Task entry point for one connection attempt.
pub(crate) async fn run_connection(ctx: Arc<SessionCtx>, stop: CancellationToken) {
    let uri = ctx.shared.uri.clone();
    let mut conn = Connection::default();

    let result = drive(&ctx, &stop, &mut conn).await;
    conn.teardown(&ctx).await;

    match result {
        Ok(()) => debug!("Stream {} connection task finished", uri),
        Err(AppError::CameraOffline(reason)) => {
            warn!("Stream {} camera is offline: {}", uri, reason);
            ctx.shared.set_state(StreamState::Offline);
            return;
        }
        Err(e) => {
            if stop.is_cancelled() {
                debug!("Stream {} attempt ended during stop: {}", uri, e);
            } else {
                warn!("Stream {} connection attempt failed: {}", uri, e);
                *ctx.shared.failure.lock() = classify(&e);
            }
        }
    }

    ctx.shared.settle_stopped();
}

async fn drive(
    ctx: &Arc<SessionCtx>,
    stop: &CancellationToken,
    conn: &mut Connection,
) -> Result<()> {
    let uri = ctx.shared.uri.clone();

    info!("Stream {} requesting fresh signaling credentials", uri);
    let credentials = tokio::select! {
        _ = stop.cancelled() => return Ok(()),
        result = ctx.credentials.fresh_credentials(&uri) => result?,
    };

    let (signal_tx, mut signal_rx) = mpsc::channel(EVENT_QUEUE);
    conn.channel = Some(tokio::select! {
        _ = stop.cancelled() => return Ok(()),
        result = SignalingChannel::connect(&credentials, signal_tx) => result?,
    });

    let (transport_tx, mut transport_rx) = mpsc::channel(EVENT_QUEUE);
    conn.peer = Some(CameraPeer::new(ice_servers_from(&credentials), transport_tx).await?);

    info!("Stream {} sending SDP offer", uri);
    conn.negotiate().await?;

    loop {
        tokio::select! {
            _ = stop.cancelled() => return Ok(()),

            event = signal_rx.recv() => match event {
                Some(SignalingEvent::Answer(sdp)) => {
                    info!("Stream {} applying SDP answer", uri);
                    conn.set_answer(sdp).await?;
                }
                Some(SignalingEvent::RemoteCandidate(candidate)) => {
                    conn.add_remote_candidate(candidate).await;
                }
                Some(SignalingEvent::Closed) | None => {
                    return Err(AppError::Channel("signaling connection closed".into()));
                }
            },

            event = transport_rx.recv() => match event {
                Some(TransportEvent::LocalCandidate(candidate)) => {
                    conn.send_local_candidate(&candidate);
                }
                Some(TransportEvent::IceState(state)) => {
                    ctx.shared.note_ice_state(state);
                    match state {
                        TransportState::Connected | TransportState::Completed => {
                            ctx.shared.set_state(StreamState::Connected);
                            ctx.shared.mark_connected();
                        }
                        s if s.is_fatal() => {
                            return Err(AppError::Transport(format!("ICE connection {}", s)));
                        }
                        _ => {}
                    }
                }
                Some(TransportEvent::Track(track)) => {
                    note_track(ctx, conn, track);
                    maybe_start_media(ctx, stop, conn).await?;
                }
                None => {
                    return Err(AppError::Transport("transport event channel closed".into()));
                }
            },
        }
    }
}

fn note_track(ctx: &SessionCtx, conn: &mut Connection, track: Arc<TrackRemote>) {
    match track.kind() {
        RTPCodecType::Video => {
            if conn.video_track.is_none() {
                info!("Stream {} received video track", ctx.shared.uri);
                conn.video_track = Some(track);
            }
        }
        RTPCodecType::Audio => {
            if !ctx.options.audio {
                debug!(
                    "Stream {} ignoring audio track (audio disabled)",
                    ctx.shared.uri
                );
            } else if conn.audio_track.is_none() {
                info!("Stream {} received audio track", ctx.shared.uri);
                conn.audio_track = Some(track);
            }
        }
        _ => {}
    }
}

/// Start the media bridge once every required track is present.
async fn maybe_start_media(
    ctx: &Arc<SessionCtx>,
    stop: &CancellationToken,
    conn: &mut Connection,
) -> Result<()> {
    if conn.bridge.is_some() {
        return Ok(());
    }
    let Some(video_track) = conn.video_track.clone() else {
        return Ok(());
    };
    if ctx.options.audio && conn.audio_track.is_none() {
        return Ok(());
    }

    let video_source = Box::new(H264TrackSource::new(video_track)?);
    let audio_source: Option<Box<dyn AudioFrameSource>> = match conn.audio_track.clone() {
        Some(track) if ctx.options.audio => Some(Box::new(OpusTrackSource::new(track)?)),
        _ => None,
    };

    let mut bridge = MediaBridge::start(
        &ctx.remux,
        &ctx.options,
        &ctx.shared.uri,
        video_source,
        audio_source,
        &ctx.shared.remux,
        stop,
    )
    .await?;

    let pumps = bridge.take_pumps();
    let pump_stop = bridge.stop_token();
    conn.pump_watcher = Some(tokio::spawn(watch_pumps(ctx.clone(), pumps, pump_stop)));
    conn.bridge = Some(bridge);
    Ok(())
}

/// Join the pump tasks; a pump that dies without a stop request is a fatal
/// media failure for the next health check.
async fn watch_pumps(
    ctx: Arc<SessionCtx>,
    mut pumps: Vec<JoinHandle<Result<()>>>,
    stop: CancellationToken,
) {
    while !pumps.is_empty() {
        let (result, _index, rest) = futures::future::select_all(pumps).await;
        pumps = rest;

        let failed = match result {
            Ok(Ok(())) => !stop.is_cancelled(),
            Ok(Err(e)) => {
                warn!("Stream {} media pump failed: {}", ctx.shared.uri, e);
                true
            }
            Err(e) => {
                warn!("Stream {} media pump panicked: {}", ctx.shared.uri, e);
                true
            }
        };

        if failed && !stop.is_cancelled() {
            let mut failure = ctx.shared.failure.lock();
            if failure.is_none() {
                *failure = Some(FailureKind::MediaPump);
            }
        }
    }
}
