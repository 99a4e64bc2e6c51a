//! WebSocket signaling channel to the cloud endpoint.
//!
//! Inbound traffic is decoded and delivered as [`SignalingEvent`] values
//! over the queue handed to [`SignalingChannel::connect`]; malformed
//! messages are logged and dropped without disturbing the receive loop.

use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::envelope::{self, IceCandidatePayload};
use crate::api::SignalingCredentials;
use crate::error::{AppError, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);
const PING_INTERVAL: Duration = Duration::from_secs(20);
const OUTBOUND_QUEUE: usize = 32;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Decoded inbound signaling traffic
#[derive(Debug)]
pub enum SignalingEvent {
    /// SDP answer for the offer we sent
    Answer(String),
    /// Trickled remote ICE candidate
    RemoteCandidate(IceCandidatePayload),
    /// The socket closed or failed
    Closed,
}

/// Live signaling channel wrapping one open socket
pub struct SignalingChannel {
    client_id: String,
    out_tx: mpsc::Sender<Message>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl SignalingChannel {
    /// Open the socket and start the receive loop.
    pub async fn connect(
        credentials: &SignalingCredentials,
        events: mpsc::Sender<SignalingEvent>,
    ) -> Result<Self> {
        let url = build_signaling_url(
            &credentials.signaling_url,
            &credentials.client_id,
            &credentials.signal_token,
        );
        info!("Connecting to signaling endpoint");

        let (ws, _response) = timeout(CONNECT_TIMEOUT, connect_async(url.as_str()))
            .await
            .map_err(|_| AppError::Channel("signaling handshake timed out".into()))?
            .map_err(|e| AppError::Channel(format!("signaling connect failed: {}", e)))?;
        info!("Signaling socket connected");

        let (sink, stream) = ws.split();
        let cancel = CancellationToken::new();
        let (out_tx, out_rx) = mpsc::channel(OUTBOUND_QUEUE);

        let tasks = vec![
            tokio::spawn(writer_loop(sink, out_rx, cancel.clone())),
            tokio::spawn(receive_loop(stream, events, cancel.clone())),
        ];

        Ok(Self {
            client_id: credentials.client_id.clone(),
            out_tx,
            cancel,
            tasks,
        })
    }

    /// Send the SDP offer. Fails if the channel is no longer connected.
    pub async fn send_offer(&self, sdp: &str) -> Result<()> {
        let raw = envelope::offer(sdp, &self.client_id)?;
        info!("Sending SDP offer to {}", self.client_id);
        self.out_tx
            .send(Message::Text(raw))
            .await
            .map_err(|_| AppError::Channel("signaling channel is closed".into()))
    }

    /// Send a local ICE candidate, best-effort.
    ///
    /// Candidates queue behind the writer; when the queue is full or the
    /// channel is gone the candidate is dropped with a log line.
    pub fn send_ice_candidate(&self, candidate: &IceCandidatePayload) {
        let raw = match envelope::ice_candidate(candidate, &self.client_id) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to encode ICE candidate: {}", e);
                return;
            }
        };
        debug!("Sending local ICE candidate");
        if let Err(e) = self.out_tx.try_send(Message::Text(raw)) {
            debug!("Dropping local ICE candidate: {}", e);
        }
    }

    /// Cancel the receive loop and close the socket. Idempotent.
    pub async fn close(&mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            if timeout(CLOSE_TIMEOUT, task).await.is_err() {
                warn!("Signaling task did not finish before close timeout");
            }
        }
        info!("Signaling socket closed");
    }
}

/// Compose the connect URL.
///
/// Pre-signed URLs already carry their authentication and must pass through
/// untouched; anything else gets the client/token query parameters appended.
fn build_signaling_url(url: &str, client_id: &str, token: &str) -> String {
    if url.contains("X-Amz-") {
        debug!("Using pre-signed signaling URL");
        return url.to_owned();
    }
    let sep = if url.contains('?') { '&' } else { '?' };
    format!(
        "{}{}ClientId={}&signalToken={}",
        url,
        sep,
        urlencoding::encode(client_id),
        urlencoding::encode(token)
    )
}

async fn writer_loop(
    mut sink: WsSink,
    mut out_rx: mpsc::Receiver<Message>,
    cancel: CancellationToken,
) {
    let start = tokio::time::Instant::now() + PING_INTERVAL;
    let mut ping = tokio::time::interval_at(start, PING_INTERVAL);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            msg = out_rx.recv() => match msg {
                Some(msg) => {
                    if let Err(e) = sink.send(msg).await {
                        warn!("Signaling send failed: {}", e);
                        break;
                    }
                }
                None => break,
            },
            _ = ping.tick() => {
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn receive_loop(
    mut stream: WsStream,
    events: mpsc::Sender<SignalingEvent>,
    cancel: CancellationToken,
) {
    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => return,
            msg = stream.next() => msg,
        };

        match msg {
            Some(Ok(Message::Text(text))) => dispatch(&text, &events).await,
            Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                Ok(text) => dispatch(text, &events).await,
                Err(_) => warn!("Dropping non-UTF-8 signaling message"),
            },
            Some(Ok(Message::Close(_))) | None => {
                info!("Signaling socket closed by remote");
                let _ = events.send(SignalingEvent::Closed).await;
                return;
            }
            Some(Ok(_)) => {} // ping/pong frames
            Some(Err(e)) => {
                warn!("Signaling receive error: {}", e);
                let _ = events.send(SignalingEvent::Closed).await;
                return;
            }
        }
    }
}

async fn dispatch(raw: &str, events: &mpsc::Sender<SignalingEvent>) {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        debug!("Skipping empty signaling message");
        return;
    }

    let envelope = match envelope::parse_envelope(trimmed) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("Dropping undecodable signaling message: {}", e);
            return;
        }
    };

    match envelope.message_type.as_deref() {
        Some(envelope::MSG_SDP_ANSWER) => match envelope::answer_sdp(&envelope) {
            Ok(sdp) => {
                info!("Received SDP answer");
                let _ = events.send(SignalingEvent::Answer(sdp)).await;
            }
            Err(e) => warn!("Dropping malformed SDP answer: {}", e),
        },
        Some(envelope::MSG_ICE_CANDIDATE) => match envelope::remote_candidate(&envelope) {
            Ok(candidate) => {
                debug!("Received remote ICE candidate");
                let _ = events.send(SignalingEvent::RemoteCandidate(candidate)).await;
            }
            Err(e) => warn!("Dropping malformed ICE candidate: {}", e),
        },
        Some(envelope::MSG_STATUS_RESPONSE) => {
            debug!("Signaling status: {:?}", envelope.status_response);
        }
        other => warn!("Ignoring signaling message type {:?}", other),
    }
}
