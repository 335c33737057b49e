// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket server implementation.
//!
//! Handles client connections, envelope routing, and broadcast fanout.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use pillar_core::{Envelope, Message};

use crate::state::{ClientId, RelayState};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Run the WebSocket server on the given address.
pub async fn run(addr: SocketAddr, state: RelayState) -> Result<(), BoxError> {
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on: {}", addr);
    serve(listener, state).await
}

/// Accepts connections on an already bound listener until it fails.
pub async fn serve(listener: TcpListener, state: RelayState) -> Result<(), BoxError> {
    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let state = state.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer_addr, state).await {
                error!("Connection error from {}: {}", peer_addr, e);
            }
        });
    }
}

/// Handle a single WebSocket connection.
pub(crate) async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: RelayState,
) -> Result<(), BoxError> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let client = state.next_client_id();
    info!(client, "New WebSocket connection from: {}", peer_addr);

    let (mut ws_sink, mut ws_stream) = ws_stream.split();
    let mut broadcast_rx = state.subscribe();

    loop {
        tokio::select! {
            msg = ws_stream.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Some(reply) = handle_frame(text.as_str(), client, &state).await {
                            ws_sink.send(WsMessage::Text(reply.to_json()?.into())).await?;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) => {
                        info!("Client {} disconnected", peer_addr);
                        break;
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        ws_sink.send(WsMessage::Pong(data)).await?;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!("WebSocket error from {}: {}", peer_addr, e);
                        break;
                    }
                    None => {
                        info!("Client {} stream ended", peer_addr);
                        break;
                    }
                }
            }

            broadcast = broadcast_rx.recv() => {
                match broadcast {
                    Ok(b) if b.from == client => {}
                    Ok(b) => {
                        let json = b.envelope.to_json()?;
                        if let Err(e) = ws_sink.send(WsMessage::Text(json.into())).await {
                            warn!("Failed to send broadcast to {}: {}", peer_addr, e);
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!("Client {} lagged by {} messages, resyncing", peer_addr, n);
                        let resync = full_sync_response(&state).await;
                        ws_sink.send(WsMessage::Text(resync.to_json()?.into())).await?;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    info!("Connection closed: {}", peer_addr);
    Ok(())
}

/// Processes one text frame and returns the reply, if any.
///
/// Malformed or rejected frames are answered with an `error` envelope; they
/// never end the connection.
pub(crate) async fn handle_frame(
    text: &str,
    client: ClientId,
    state: &RelayState,
) -> Option<Envelope> {
    let message = match Envelope::from_json(text).and_then(|envelope| envelope.decode()) {
        Ok(message) => message,
        Err(e) => {
            warn!(client, "rejecting frame: {}", e);
            return Some(Envelope::error(e.to_string()));
        }
    };
    debug!(client, kind = message.kind(), "received");

    match message {
        Message::Event(event) => match state.apply_event(client, event).await {
            Ok(()) => None,
            Err(e) => Some(Envelope::error(format!("event rejected: {e}"))),
        },
        Message::FullSyncRequest { since } => {
            debug!(client, ?since, "full sync");
            Some(full_sync_response(state).await)
        }
        Message::Ping { id } => Some(Envelope::pong(id)),
        Message::Pong { .. } => None,
        Message::FullSyncResponse { .. } | Message::Error { .. } => Some(Envelope::error(format!(
            "unexpected message type: '{}'",
            message.kind()
        ))),
    }
}

/// The whole dataset as a `full_sync_response`. Also sent unasked to a
/// client that fell behind the broadcast buffer.
pub(crate) async fn full_sync_response(state: &RelayState) -> Envelope {
    let (collections, as_of) = state.snapshot().await;
    match Envelope::new(&Message::FullSyncResponse { collections, as_of }, None) {
        Ok(envelope) => envelope,
        Err(e) => Envelope::error(e.to_string()),
    }
}
