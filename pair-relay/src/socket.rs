use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::{
    select,
    sync::mpsc,
    time::{Instant, sleep},
};
use tracing::{debug, info, warn};

use crate::{
    connection::{ConnectionHandle, Outbound},
    message::{ServerMessage, decode_command},
    server::AppState,
    session::{Flow, Session},
};

type Sink = SplitSink<WebSocket, Message>;

/// Drives one WebSocket until the client leaves, misbehaves, goes idle, or
/// the relay shuts down. Registration cleanup always runs on the way out.
pub async fn handle_socket(socket: WebSocket, state: AppState) {
    let (connection, mut outbound) = ConnectionHandle::channel();
    let connection_id = connection.id();
    let mut session = Session::new(
        state.table.clone(),
        Arc::clone(&state.dashboard),
        connection,
    );
    let (mut sink, mut stream) = socket.split();

    debug!(connection = connection_id, "websocket opened");
    run_socket_session(&state, &mut session, &mut sink, &mut stream, &mut outbound).await;
    session.close().await;

    // Errors queued by the last command (or by shutdown) still go out.
    while let Ok(item) = outbound.try_recv() {
        if let Outbound::Message(message) = item {
            if !write_server_message(&mut sink, &message).await {
                break;
            }
        }
    }
    if let Err(err) = sink.close().await {
        debug!(connection = connection_id, ?err, "websocket close failed");
    }
    debug!(connection = connection_id, "websocket closed");
}

async fn run_socket_session(
    state: &AppState,
    session: &mut Session,
    sink: &mut Sink,
    stream: &mut SplitStream<WebSocket>,
    outbound: &mut mpsc::UnboundedReceiver<Outbound>,
) {
    let read_timeout = state.read_timeout();
    let idle = sleep(read_timeout);
    tokio::pin!(idle);
    let mut shutdown = state.subscribe_shutdown();

    loop {
        select! {
            frame = stream.next() => {
                idle.as_mut().reset(Instant::now() + read_timeout);
                if handle_frame(frame, session).await == Flow::Close {
                    break;
                }
            }
            item = outbound.recv() => {
                if !handle_outbound(item, session, sink).await {
                    break;
                }
            }
            _ = &mut idle => {
                info!(?read_timeout, "websocket idle for too long, closing");
                break;
            }
            _ = shutdown.changed() => {
                // A closed channel also means the server is gone.
                let notice = ServerMessage::error("relay shutting down");
                write_server_message(sink, &notice).await;
                break;
            }
        }
    }
}

async fn handle_frame(
    frame: Option<Result<Message, axum::Error>>,
    session: &mut Session,
) -> Flow {
    match frame {
        Some(Ok(Message::Text(text))) => match decode_command(&text) {
            Ok(command) => session.handle(command).await,
            Err(err) => session.reject_frame(err),
        },
        Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
            Ok(text) => match decode_command(text) {
                Ok(command) => session.handle(command).await,
                Err(err) => session.reject_frame(err),
            },
            Err(err) => session.reject_frame(err),
        },
        Some(Ok(Message::Ping(_) | Message::Pong(_))) => Flow::Continue,
        Some(Ok(Message::Close(_))) | None => Flow::Close,
        Some(Err(err)) => {
            debug!(?err, "websocket read failed");
            Flow::Close
        }
    }
}

/// Returns `false` once the socket can no longer be written.
async fn handle_outbound(item: Option<Outbound>, session: &mut Session, sink: &mut Sink) -> bool {
    match item {
        Some(Outbound::Message(message)) => write_server_message(sink, &message).await,
        Some(Outbound::Evicted { registration }) => {
            session.on_evicted(registration);
            true
        }
        // The session owns a sender, so the channel cannot close while we run.
        None => false,
    }
}

async fn write_server_message(sink: &mut Sink, message: &ServerMessage) -> bool {
    let encoded = match serde_json::to_string(message) {
        Ok(encoded) => encoded,
        Err(err) => {
            warn!(?err, "failed to encode server message");
            return true;
        }
    };
    match sink.send(Message::Text(encoded)).await {
        Ok(()) => true,
        Err(err) => {
            debug!(?err, "failed to deliver message to client");
            false
        }
    }
}
