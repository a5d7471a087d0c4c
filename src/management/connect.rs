//! Management connect (spec.md §4.F): upgrades an HTTP request to a
//! websocket and bridges it to a device over the bus for the lifetime of
//! one session. Every frame crossing the bridge (either direction) is fed
//! to a `Recorder`; spec.md §4.D makes every session recordable.
//!
//! State machine (spec.md §4.F): INIT (pre-upgrade) -> OPENING (session
//! allocated, websocket upgraded) -> OPEN (bridging) -> CLOSING (either side
//! closed, draining) -> CLOSED (session record removed, recording flushed).

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};

use crate::bus::{session_subject, MessageBus};
use crate::error::RelayError;
use crate::frame::{shell_kind, Frame, Proto};
use crate::models::Session;
use crate::session::recorder::Recorder;
use crate::session::SessionManager;
use crate::store::DataStore;

pub async fn bridge(
    socket: WebSocket,
    session: Session,
    bus: Arc<dyn MessageBus>,
    session_manager: Arc<SessionManager>,
    store: Arc<dyn DataStore>,
    recorder_channel_capacity: usize,
    recorder_chunk_bytes: usize,
) -> Result<(), RelayError> {
    let (mut sink, mut stream) = socket.split();
    let mut device_replies = bus.subscribe(&session_subject(&session.id.to_string())).await?;
    let recorder = Recorder::spawn(recorder_channel_capacity, recorder_chunk_bytes);

    loop {
        tokio::select! {
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Binary(bytes))) => {
                        recorder.record(bytes.clone());
                        if let Ok(mut frame) = Frame::decode(bytes::Bytes::from(bytes)) {
                            frame.session_id = Some(session.id);
                            let _ = bus
                                .publish(&crate::bus::device_subject(&session.tenant_id, &session.device_id), frame.encode().freeze())
                                .await;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => continue,
                }
            }
            outgoing = device_replies.next() => {
                match outgoing {
                    Some(payload) => {
                        recorder.record(payload.to_vec());
                        if sink.send(Message::Binary(payload.to_vec())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    let compressed = recorder.finish().await;
    store
        .insert_session_recording(&session.tenant_id, session.id, compressed, chrono::Utc::now(), chrono::Duration::days(30))
        .await?;

    session_manager.close_session(&session.tenant_id, session.id).await?;
    Ok(())
}

/// Convenience wrapper for the `StartShell` handshake frame a management
/// client sends right after the websocket upgrade completes.
pub fn start_shell_frame(session_id: uuid::Uuid) -> Frame {
    Frame::new(Proto::Shell, shell_kind::START_SHELL, Some(session_id))
}
