use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::models::{
    ClientMessage, ServerMessage, SubscribeRequest, WrappedMessage, PROTOCOL_VERSION,
};
use crate::sync::room::{RoomCommand, RoomHandle};
use crate::sync::session::SessionHandle;
use crate::sync::SyncError;
use crate::AppState;

/// WebSocket upgrade handler
pub async fn ws_handler(State(app): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    info!("New WebSocket connection attempt");
    ws.on_upgrade(move |socket| handle_socket(socket, app))
}

/// The room a connection is currently attached to. Shared with the
/// disconnect guard so cleanup sees the latest binding.
type RoomBinding = Arc<Mutex<Option<RoomHandle>>>;

/// Detaches the session from its room when the connection task ends,
/// whether by close, error, or panic.
struct DisconnectGuard {
    binding: RoomBinding,
    session_id: Uuid,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.binding.lock().ok().and_then(|mut b| b.take()) {
            let unsubscribe = RoomCommand::Unsubscribe {
                session_id: self.session_id,
            };
            if handle.commands.try_send(unsubscribe).is_err() {
                // The room reaps the dead outbound channel on its next send.
                debug!(session_id = %self.session_id, "Room queue unavailable on disconnect");
            }
        }
    }
}

/// Handle one WebSocket connection for its whole lifetime.
async fn handle_socket(socket: WebSocket, app: Arc<AppState>) {
    let session_id = Uuid::new_v4();
    info!(%session_id, "WebSocket connection established");

    let (sender, mut receiver) = socket.split();
    let (out_tx, out_rx) = mpsc::channel::<ServerMessage>(app.config.outbound_capacity);
    let client_seq = Arc::new(AtomicU64::new(0));

    // Outbound traffic gets its own task so a slow socket never stalls
    // message routing.
    let send_task = tokio::spawn(send_loop(sender, out_rx, client_seq.clone()));

    // Greet first: the client starts its subscribe once welcomed.
    if out_tx.send(ServerMessage::Welcome).await.is_err() {
        send_task.abort();
        return;
    }

    let binding: RoomBinding = Arc::new(Mutex::new(None));
    let _guard = DisconnectGuard {
        binding: binding.clone(),
        session_id,
    };

    loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => {
                let wrapped: WrappedMessage<ClientMessage> = match serde_json::from_str(&text) {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(
                            %session_id,
                            "{}",
                            SyncError::MalformedRequest(format!("unparseable message: {}", e))
                        );
                        continue;
                    }
                };

                // Duplicate client messages (retries after a timeout) are
                // dropped by sequence number; the transport is ordered, so
                // a gap can only be a client bug.
                let seen = client_seq.load(Ordering::Relaxed);
                if wrapped.c != 0 {
                    if wrapped.c <= seen {
                        debug!(%session_id, c = wrapped.c, seen, "Dropping duplicate client message");
                        continue;
                    }
                    if wrapped.c > seen + 1 {
                        warn!(%session_id, c = wrapped.c, seen, "Client sequence gap");
                    }
                    client_seq.store(wrapped.c, Ordering::Relaxed);
                }

                dispatch(&app, &binding, session_id, &out_tx, wrapped.message).await;
            }
            Some(Ok(Message::Close(_))) | None => {
                info!(%session_id, "WebSocket connection closed");
                break;
            }
            // Ping/pong are answered by axum; binary frames are not part of
            // the protocol.
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                error!(%session_id, "WebSocket error: {}", e);
                break;
            }
        }
    }

    send_task.abort();
}

async fn dispatch(
    app: &Arc<AppState>,
    binding: &RoomBinding,
    session_id: Uuid,
    out_tx: &mpsc::Sender<ServerMessage>,
    message: ClientMessage,
) {
    match message {
        ClientMessage::Subscribe(req) => {
            match subscribe_flow(app, &req, session_id, out_tx.clone()).await {
                Ok(handle) => {
                    let previous = match binding.lock() {
                        Ok(mut b) => b.replace(handle),
                        Err(_) => None,
                    };
                    // Switching documents on one connection: detach from the
                    // old room. A re-subscribe to the same room just replaced
                    // the existing subscriber entry.
                    if let Some(old) = previous {
                        if old.doc_id != req.room_id {
                            let _ = old.commands.try_send(RoomCommand::Unsubscribe { session_id });
                        }
                    }
                }
                Err(e) => {
                    warn!(%session_id, room_id = %req.room_id, "Subscribe failed: {}", e);
                    let _ = out_tx
                        .send(ServerMessage::Error {
                            message: e.to_string(),
                        })
                        .await;
                }
            }
        }
        ClientMessage::Unsubscribe(req) => {
            let taken = match binding.lock() {
                Ok(mut b) => {
                    let bound_here = b
                        .as_ref()
                        .map(|handle| handle.doc_id == req.room_id)
                        .unwrap_or(false);
                    if bound_here {
                        b.take()
                    } else {
                        None
                    }
                }
                Err(_) => None,
            };
            match taken {
                Some(handle) => {
                    let _ = handle
                        .commands
                        .send(RoomCommand::Unsubscribe { session_id })
                        .await;
                }
                None => {
                    debug!(%session_id, room_id = %req.room_id, "Unsubscribe for a room this session is not in");
                }
            }
        }
        ClientMessage::Diff(diff) => {
            forward(binding, session_id, RoomCommand::Diff { session_id, diff }).await;
        }
        ClientMessage::SelectionChange(selection) => {
            forward(
                binding,
                session_id,
                RoomCommand::Selection {
                    session_id,
                    selection,
                },
            )
            .await;
        }
        ClientMessage::RequestResend(req) => {
            forward(
                binding,
                session_id,
                RoomCommand::Resend {
                    session_id,
                    from_version: req.from_version,
                },
            )
            .await;
        }
        ClientMessage::GetDocument => {
            forward(binding, session_id, RoomCommand::GetDocument { session_id }).await;
        }
    }
}

/// Authenticate, resolve access, and attach the session to its room.
///
/// Token verification can call out to the app service and happens before
/// any room is touched, so it never blocks room throughput.
async fn subscribe_flow(
    app: &Arc<AppState>,
    req: &SubscribeRequest,
    session_id: Uuid,
    outbound: mpsc::Sender<ServerMessage>,
) -> Result<RoomHandle, SyncError> {
    let user = app.registry.authenticate(&req.auth_token).await?;
    let access = app.registry.document_access(&user.id, req.room_id).await;
    if !access.can_view() {
        return Err(SyncError::AuthFailure(
            "no access to this document".to_string(),
        ));
    }
    debug!(%session_id, user = %user.id, room_id = %req.room_id, "Subscribe authenticated");
    let session = SessionHandle {
        session_id,
        user,
        can_edit: access.can_edit(),
        outbound,
    };
    app.hub.subscribe(req.room_id, session, req.connection).await
}

/// Send a command to the bound room, detaching if the room is gone.
async fn forward(binding: &RoomBinding, session_id: Uuid, cmd: RoomCommand) {
    let handle = match binding.lock() {
        Ok(guard) => (*guard).clone(),
        Err(_) => None,
    };
    let Some(handle) = handle else {
        warn!(%session_id, "Ignoring message because session is not subscribed to a room");
        return;
    };
    if handle.commands.send(cmd).await.is_err() {
        warn!(%session_id, doc_id = %handle.doc_id, "Room is gone; detaching session");
        if let Ok(mut b) = binding.lock() {
            b.take();
        }
    }
}

/// Drain the outbound queue onto the socket, stamping each message with
/// the connection's sequence counters.
async fn send_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::Receiver<ServerMessage>,
    client_seq: Arc<AtomicU64>,
) {
    let mut server_seq: u64 = 0;
    while let Some(message) = out_rx.recv().await {
        server_seq += 1;
        let wrapped = WrappedMessage {
            message,
            c: client_seq.load(Ordering::Relaxed),
            s: server_seq,
            v: PROTOCOL_VERSION,
        };
        let text = match serde_json::to_string(&wrapped) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to serialize outbound message: {}", e);
                continue;
            }
        };
        if sink.send(Message::Text(text)).await.is_err() {
            break;
        }
    }
}
