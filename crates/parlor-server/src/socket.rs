//! WebSocket connection lifecycle.
//!
//! One task per socket: it drains the hub mailbox, decodes inbound frames
//! and keeps the heartbeat. Presence and routing live in the gateway.

use crate::handlers::{AppState, ConnectionSlot};
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::extract::ws::{Message, WebSocket};
use bytes::BytesMut;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parlor_core::{
    ConnectionId, Credentials, DropReason, Identity, InboundMessage, Mailed, Peer, RouteOutcome,
};
use parlor_protocol::{codec, codes, ClientFrame, Encoding, ProtocolError, ServerFrame};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, warn};

type Sink = SplitSink<WebSocket, Message>;

/// What the upgrade request carried.
pub(crate) struct Upgrade {
    pub encoding: Encoding,
    pub token: Option<String>,
    pub session: Option<String>,
}

/// Handle a WebSocket connection.
pub(crate) async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    slot: ConnectionSlot,
    upgrade: Upgrade,
) {
    let _slot = slot;
    let _metrics_guard = ConnectionMetricsGuard::new();
    let gateway = &state.gateway;
    let encoding = upgrade.encoding;

    let (mut peer, mut mailbox) = gateway.open();
    let connection_id = peer.id();
    let (mut sender, mut receiver) = socket.split();

    // Presence frames queue up in the mailbox and go out after `connected`.
    let identity = gateway.connect(
        &mut peer,
        Credentials {
            token: upgrade.token.as_deref(),
            session: upgrade.session.as_deref(),
        },
    );
    metrics::set_online(gateway.presence().count());

    let heartbeat_ms = state.config.heartbeat.interval_ms.max(1);
    let connected = ServerFrame::connected(
        connection_id.to_string(),
        identity.map(Identity::into_string),
        u32::try_from(heartbeat_ms).unwrap_or(u32::MAX),
    );
    if send_frame(&mut sender, encoding, &connected).await.is_err() {
        warn!(connection = %connection_id, "Failed to send Connected frame");
        gateway.disconnect(peer);
        metrics::set_online(gateway.presence().count());
        return;
    }

    let heartbeat_every = Duration::from_millis(heartbeat_ms);
    let idle_timeout = Duration::from_millis(state.config.heartbeat.timeout_ms);
    let mut heartbeat = interval_at(Instant::now() + heartbeat_every, heartbeat_every);
    let mut last_seen = Instant::now();
    let mut read_buffer = BytesMut::with_capacity(4096);

    loop {
        tokio::select! {
            biased;

            mailed = mailbox.recv() => {
                match mailed {
                    Mailed::Frame(frame) => {
                        if send_frame(&mut sender, encoding, &frame).await.is_err() {
                            break;
                        }
                    }
                    Mailed::Evicted(reason) => {
                        info!(connection = %connection_id, reason = reason.as_str(), "Connection evicted");
                        metrics::record_eviction(reason);
                        let _ = send_frame(&mut sender, encoding, &ServerFrame::evicted(reason.as_str())).await;
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                    Mailed::Closed => break,
                }
            }

            msg = receiver.next() => {
                last_seen = Instant::now();
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = match codec::decode_json::<ClientFrame>(&text) {
                            Ok(frame) => handle_frame(frame, &mut peer, &state).await,
                            Err(e) => Some(invalid_frame(connection_id, &e)),
                        };
                        if let Some(reply) = reply {
                            if send_frame(&mut sender, encoding, &reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        read_buffer.extend_from_slice(&data);
                        let mut replies = Vec::new();
                        loop {
                            match codec::decode_from::<ClientFrame>(&mut read_buffer) {
                                Ok(Some(frame)) => replies.extend(handle_frame(frame, &mut peer, &state).await),
                                Ok(None) => break,
                                Err(e) => {
                                    read_buffer.clear();
                                    replies.push(invalid_frame(connection_id, &e));
                                    break;
                                }
                            }
                        }
                        let mut failed = false;
                        for reply in &replies {
                            if send_frame(&mut sender, encoding, reply).await.is_err() {
                                failed = true;
                                break;
                            }
                        }
                        if failed {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }

            _ = heartbeat.tick() => {
                if last_seen.elapsed() > idle_timeout {
                    debug!(connection = %connection_id, "Idle timeout");
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
                let ping = ServerFrame::Ping { timestamp: Some(unix_millis()) };
                if send_frame(&mut sender, encoding, &ping).await.is_err() {
                    break;
                }
            }
        }
    }

    gateway.disconnect(peer);
    metrics::set_online(gateway.presence().count());
    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Handle a decoded frame, returning a reply for this connection only.
async fn handle_frame(frame: ClientFrame, peer: &mut Peer, state: &AppState) -> Option<ServerFrame> {
    let gateway = &state.gateway;

    match frame {
        ClientFrame::Connect { token } => {
            if peer.is_authenticated() {
                debug!(connection = %peer.id(), "Connect frame (already authenticated)");
                return None;
            }
            let credentials = Credentials {
                token: token.as_deref(),
                session: None,
            };
            if gateway.connect(peer, credentials).is_some() {
                metrics::set_online(gateway.presence().count());
                None
            } else {
                Some(ServerFrame::error(
                    codes::NOT_AUTHENTICATED,
                    "Invalid or expired session token",
                ))
            }
        }

        ClientFrame::SendMessage { recipient, message } => {
            let start = Instant::now();
            let inbound = InboundMessage {
                recipient,
                body: message,
            };

            match gateway.message(peer, inbound).await {
                Ok(RouteOutcome::Delivered { message, pushed }) => {
                    let kind = if message.is_broadcast() { "broadcast" } else { "direct" };
                    metrics::record_routed(kind, pushed, start.elapsed().as_secs_f64());
                    None
                }
                Ok(RouteOutcome::Dropped(reason)) => {
                    metrics::record_dropped(reason.as_str());
                    match reason {
                        DropReason::Unauthenticated => Some(ServerFrame::error(
                            codes::NOT_AUTHENTICATED,
                            "Log in before sending messages",
                        )),
                        DropReason::TooLong => Some(ServerFrame::error(
                            codes::MESSAGE_TOO_LONG,
                            format!(
                                "Message exceeds {} characters",
                                state.config.limits.max_body_length
                            ),
                        )),
                        DropReason::EmptyBody => None,
                    }
                }
                Err(e) => {
                    metrics::record_error("storage");
                    Some(ServerFrame::error(codes::STORAGE_FAILURE, e.to_string()))
                }
            }
        }

        ClientFrame::Ping { timestamp } => Some(ServerFrame::pong(timestamp)),

        // Any inbound traffic already refreshed the idle timer.
        ClientFrame::Pong { .. } => None,
    }
}

fn invalid_frame(connection_id: ConnectionId, error: &ProtocolError) -> ServerFrame {
    debug!(connection = %connection_id, error = %error, "Invalid frame");
    metrics::record_error("invalid_frame");
    ServerFrame::error(codes::INVALID_FRAME, error.to_string())
}

/// Send a frame in the connection's encoding.
async fn send_frame(sender: &mut Sink, encoding: Encoding, frame: &ServerFrame) -> Result<()> {
    let message = match encoding {
        Encoding::Json => Message::Text(codec::encode_json(frame)?),
        Encoding::MsgPack => Message::Binary(codec::encode(frame)?.to_vec()),
    };
    sender.send(message).await?;
    Ok(())
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}
