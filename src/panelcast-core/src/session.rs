//! Per-subscriber WebSocket session.
//!
//! A session validates its channel name, registers a [`Connection`] with the
//! relay and then runs two halves until either ends: a writer forwarding
//! dispatched frames to the socket, and a reader routing inbound frames
//! either to the speaking flags or into the delivery queue on the
//! session's own channel.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::channel::{Channel, Connection, ConnectionId};
use crate::payload::InboundFrame;
use crate::relay::Relay;

/// Close code sent when the requested channel is not in the fixed set.
pub const INVALID_CHANNEL_CLOSE_CODE: u16 = 4000;

/// Drive one subscriber connection to completion.
pub async fn run_session(
    socket: WebSocket,
    channel_name: String,
    relay: Arc<Relay>,
    outbound_buffer: usize,
) {
    let channel = match channel_name.parse::<Channel>() {
        Ok(channel) => channel,
        Err(e) => {
            warn!(channel = %channel_name, error = %e, "rejecting connection");
            reject(socket).await;
            return;
        }
    };

    let (tx, mut rx) = mpsc::channel::<Arc<str>>(outbound_buffer);
    let connection = Arc::new(Connection::new(tx));
    let connection_id = connection.id().clone();
    relay.register(channel, Arc::clone(&connection));

    let (mut ws_tx, mut ws_rx) = socket.split();

    {
        let writer = async {
            while let Some(frame) = rx.recv().await {
                if ws_tx.send(Message::Text(frame.to_string().into())).await.is_err() {
                    break;
                }
            }
        };

        let reader = async {
            while let Some(message) = ws_rx.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        handle_inbound(&relay, channel, &connection_id, text.as_str());
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(Message::Binary(_)) => {
                        debug!(%channel, %connection_id, "ignoring binary frame");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!(%channel, %connection_id, error = %e, "socket read failed");
                        break;
                    }
                }
            }
        };

        tokio::select! {
            _ = writer => debug!(%connection_id, "writer finished"),
            _ = reader => debug!(%connection_id, "reader finished"),
            _ = connection.closed() => info!(%connection_id, "connection closed by dispatcher"),
        }
    }

    relay.unregister(channel, &connection_id);
    let _ = ws_tx.close().await;
}

/// Route one inbound text frame.
pub fn handle_inbound(relay: &Relay, channel: Channel, connection_id: &ConnectionId, raw: &str) {
    match InboundFrame::parse(raw) {
        InboundFrame::Speaking(update) => {
            for (target, speaking) in update.flags() {
                relay.set_speaking(target, speaking);
            }
            debug!(%channel, %connection_id, ?update, "speaking state update");
        }
        InboundFrame::Message(text) => match relay.enqueue(&text, channel) {
            Ok(key) => {
                debug!(%channel, %connection_id, seq = key.seq, "subscriber message queued")
            }
            Err(e) => {
                warn!(%channel, %connection_id, error = %e, "failed to queue subscriber message")
            }
        },
    }
}

async fn reject(mut socket: WebSocket) {
    let frame = CloseFrame {
        code: INVALID_CHANNEL_CLOSE_CODE,
        reason: Utf8Bytes::from_static("invalid channel"),
    };
    if let Err(e) = socket.send(Message::Close(Some(frame))).await {
        debug!(error = %e, "failed to send close frame");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatchConfig;

    #[test]
    fn test_speaking_frame_updates_flags() {
        let relay = Relay::new(DispatchConfig::default());
        let id = ConnectionId::new();
        handle_inbound(
            &relay,
            Channel::Audience,
            &id,
            r#"{"type":"speaking_state","left":true,"right":false}"#,
        );
        assert!(relay.speaking().is_speaking(Channel::Left));
        assert!(!relay.speaking().is_speaking(Channel::Right));
        assert!(relay.queue().is_empty());
    }

    #[test]
    fn test_other_frames_enqueue_on_own_channel() {
        let relay = Relay::new(DispatchConfig::default());
        let id = ConnectionId::new();
        handle_inbound(&relay, Channel::Right, &id, "Host: plain text");
        handle_inbound(&relay, Channel::Right, &id, r#"{"text":"structured"}"#);

        let first = relay.queue().pop().unwrap();
        assert_eq!(first.channel, Channel::Right);
        assert_eq!(first.message, "plain text");
        relay.queue().complete(first.key);

        let second = relay.queue().pop().unwrap();
        assert_eq!(second.message, "structured");
    }

    #[tokio::test]
    async fn test_frames_after_shutdown_are_not_queued() {
        let relay = Relay::new(DispatchConfig::default());
        relay.shutdown().await;
        handle_inbound(&relay, Channel::Left, &ConnectionId::new(), "too late");
        assert!(relay.queue().is_empty());
    }
}
