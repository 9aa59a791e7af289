//! Per-connection read and write pumps.
//!
//! The read pump runs in the upgrade task and turns client frames into hub
//! calls. The write pump runs in its own task and drains the outbound queue
//! onto the socket, interleaving keepalive pings. Whichever side fails first
//! moves the lifecycle to `Closing`; the read pump always ends by
//! unregistering, and unregistering closes the queue the write pump drains.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures_util::stream::SplitStream;
use futures_util::{Sink, SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};

use super::connection::{self, Connection, ConnectionInfo, Lifecycle};
use super::envelope::{
    decode_client_frame, ClientAction, Envelope, HubEvent, ProtocolError, RoomKey, UserId, WireEvent,
};
use super::{RoomRegistry, SharedRegistry};
use crate::config::HubConfig;

type WsStream = SplitStream<WebSocket>;

/// Run one upgraded socket until either side gives up.
///
/// Registers the connection, runs both pumps, unregisters, and returns once
/// the connection is `Closed`.
pub async fn serve<R, P>(
    hub: SharedRegistry<R, P>,
    socket: WebSocket,
    user_id: UserId,
    room_id: R,
    config: HubConfig,
) where
    R: RoomKey + Serialize,
    P: WireEvent,
{
    let (handle, conn) = connection::channel(user_id, room_id, config.outbound_capacity);
    let Connection {
        info,
        lifecycle,
        outbound,
    } = conn;
    let (ws_tx, mut ws_rx) = socket.split();

    hub.register(handle).await;

    let writer = tokio::spawn(write_pump(
        ws_tx,
        outbound,
        lifecycle.clone(),
        info.clone(),
        config.write_wait,
        config.ping_period,
    ));

    let reason = read_pump(&*hub, &mut ws_rx, &info, &lifecycle, config.pong_wait).await;
    tracing::debug!(conn_id = %info.id, room_id = %info.room_id, reason, "read pump finished");

    lifecycle.begin_closing();
    hub.unregister(&info.room_id, &info.id).await;

    if let Err(err) = writer.await {
        tracing::error!(conn_id = %info.id, ?err, "write pump panicked");
    }
    lifecycle.mark_closed();

    tracing::info!(
        conn_id = %info.id,
        room_id = %info.room_id,
        user_id = info.user_id,
        "connection closed"
    );
}

/// Read client frames until the peer leaves, goes quiet for `pong_wait`, or
/// the connection starts closing. Returns why it stopped.
async fn read_pump<R, P>(
    hub: &dyn RoomRegistry<R, P>,
    ws_rx: &mut WsStream,
    info: &ConnectionInfo<R>,
    lifecycle: &Lifecycle,
    pong_wait: Duration,
) -> &'static str
where
    R: RoomKey,
    P: WireEvent,
{
    let mut state = lifecycle.subscribe();

    loop {
        // Any inbound frame counts as a sign of life and resets the deadline.
        let next = tokio::select! {
            _ = connection::closing(&mut state) => return "closing",
            next = time::timeout(pong_wait, ws_rx.next()) => next,
        };

        let msg = match next {
            Err(_) => {
                tracing::debug!(conn_id = %info.id, "liveness timeout");
                return "liveness timeout";
            }
            Ok(None) => return "stream ended",
            Ok(Some(Err(err))) => {
                tracing::debug!(conn_id = %info.id, ?err, "ws read error");
                return "read error";
            }
            Ok(Some(Ok(msg))) => msg,
        };

        match msg {
            Message::Text(text) => handle_text(hub, info, text.as_str()).await,
            Message::Binary(_) => {
                tracing::debug!(conn_id = %info.id, "discarding binary frame");
            }
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => return "peer closed",
        }
    }
}

async fn handle_text<R, P>(hub: &dyn RoomRegistry<R, P>, info: &ConnectionInfo<R>, text: &str)
where
    R: RoomKey,
    P: WireEvent,
{
    // Identity always comes from the connection, never from the frame.
    let envelope = |event: P| Envelope::new(info.room_id.clone(), info.user_id, event);

    match decode_client_frame::<P>(text) {
        Ok(ClientAction::Broadcast(event)) => {
            tracing::debug!(conn_id = %info.id, event_type = event.event_type(), "client broadcast");
            hub.broadcast(envelope(event)).await;
        }
        Ok(ClientAction::Reply(event)) => {
            hub.send_to(&info.id, envelope(event)).await;
        }
        Err(err @ (ProtocolError::NotPermitted(_) | ProtocolError::InvalidPayload { .. })) => {
            tracing::warn!(conn_id = %info.id, user_id = info.user_id, %err, "rejecting client frame");
            hub.send_to(&info.id, envelope(P::error(err.to_string()))).await;
        }
        Err(err) => {
            tracing::warn!(conn_id = %info.id, user_id = info.user_id, %err, "discarding client frame");
        }
    }
}

#[derive(Debug)]
enum WriteError {
    Timeout,
    Transport(axum::Error),
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("write deadline exceeded"),
            Self::Transport(err) => write!(f, "transport error: {err}"),
        }
    }
}

async fn send_within<S>(ws_tx: &mut S, msg: Message, write_wait: Duration) -> Result<(), WriteError>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    match time::timeout(write_wait, ws_tx.send(msg)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(WriteError::Transport(err)),
        Err(_) => Err(WriteError::Timeout),
    }
}

/// Drain the outbound queue onto the socket, one frame per event, with a
/// keepalive ping every `ping_period`. Ends with a close frame once the queue
/// is closed, or early on the first failed write.
async fn write_pump<S, R, P>(
    mut ws_tx: S,
    mut outbound: mpsc::Receiver<Arc<Envelope<R, P>>>,
    lifecycle: Lifecycle,
    info: ConnectionInfo<R>,
    write_wait: Duration,
    ping_period: Duration,
) where
    S: Sink<Message, Error = axum::Error> + Unpin,
    R: RoomKey + Serialize,
    P: WireEvent,
{
    let mut keepalive = time::interval_at(time::Instant::now() + ping_period, ping_period);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let result = loop {
        tokio::select! {
            next = outbound.recv() => {
                let Some(envelope) = next else {
                    let close = Message::Close(Some(CloseFrame {
                        code: close_code::NORMAL,
                        reason: "".into(),
                    }));
                    break send_within(&mut ws_tx, close, write_wait).await;
                };
                let text = match serde_json::to_string(&*envelope) {
                    Ok(text) => text,
                    Err(err) => {
                        tracing::error!(conn_id = %info.id, ?err, "failed to encode envelope");
                        continue;
                    }
                };
                if let Err(err) = send_within(&mut ws_tx, Message::Text(text.into()), write_wait).await {
                    break Err(err);
                }
            }
            _ = keepalive.tick() => {
                if let Err(err) = send_within(&mut ws_tx, Message::Ping(Bytes::new()), write_wait).await {
                    break Err(err);
                }
            }
        }
    };

    if let Err(err) = result {
        tracing::debug!(conn_id = %info.id, %err, "write pump stopped");
    }
    lifecycle.begin_closing();
}
