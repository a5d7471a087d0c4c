//! DeviceEndpoint (spec.md §4.E): the server side of one device's
//! websocket connection. Structured as four cooperative tasks sharing a
//! cancellation token — reader, writer, ping watchdog, presence renewer —
//! the same shape as the teacher's `relay::handle_websocket`
//! (split socket into sender/receiver halves, spawn one task per half, race
//! them with `tokio::select!`, then tear down whichever survives).

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::bus::{device_subject, MessageBus};
use crate::error::RelayError;
use crate::frame::{shell_kind, Frame, Proto};
use crate::presence::PresenceTracker;

pub struct DeviceEndpointConfig {
    pub ping_period: Duration,
    pub max_missed_pongs: u32,
}

/// Runs one device connection to completion. Returns once the socket
/// closes, the watchdog trips, or the caller cancels `shutdown`.
pub async fn serve(
    socket: WebSocket,
    tenant_id: String,
    device_id: String,
    instance_id: String,
    bus: Arc<dyn MessageBus>,
    presence: Arc<PresenceTracker>,
    config: DeviceEndpointConfig,
    shutdown: CancellationToken,
) -> Result<(), RelayError> {
    let lease = presence.connect(&tenant_id, &device_id, &instance_id).await?;
    tracing::info!(tenant_id, device_id, "device connected");

    let (mut sink, mut stream) = socket.split();
    let cancel = shutdown.child_token();
    let missed_pongs = Arc::new(AtomicU32::new(0));

    let mut subscription = bus.subscribe(&device_subject(&tenant_id, &device_id)).await?;

    let writer_cancel = cancel.clone();
    let writer_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = writer_cancel.cancelled() => break,
                msg = subscription.next() => {
                    match msg {
                        Some(payload) => {
                            if sink.send(Message::Binary(payload.to_vec())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
    });

    let reader_cancel = cancel.clone();
    let reader_bus = bus.clone();
    let reader_tenant = tenant_id.clone();
    let reader_device = device_id.clone();
    let reader_missed = missed_pongs.clone();
    let reader_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = reader_cancel.cancelled() => break,
                frame = stream.next() => {
                    match frame {
                        Some(Ok(Message::Binary(bytes))) => {
                            if let Ok(frame) = Frame::decode(bytes::Bytes::from(bytes)) {
                                if frame.proto == Proto::Shell && frame.is_kind(shell_kind::PONG) {
                                    reader_missed.store(0, Ordering::Relaxed);
                                    continue;
                                }
                                if let Some(sid) = frame.session_id {
                                    let _ = reader_bus
                                        .publish(&crate::bus::session_subject(&sid.to_string()), frame.encode().freeze())
                                        .await;
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(_)) => break,
                        _ => continue,
                    }
                }
            }
        }
        tracing::debug!(tenant_id = reader_tenant, device_id = reader_device, "reader task exiting");
    });

    let watchdog_cancel = cancel.clone();
    let watchdog_bus = bus.clone();
    let watchdog_tenant = tenant_id.clone();
    let watchdog_device = device_id.clone();
    let watchdog_missed = missed_pongs.clone();
    let watchdog_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.ping_period);
        loop {
            tokio::select! {
                _ = watchdog_cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let missed = watchdog_missed.fetch_add(1, Ordering::Relaxed) + 1;
                    if missed > config.max_missed_pongs {
                        tracing::warn!(tenant_id = watchdog_tenant, device_id = watchdog_device, "ping watchdog tripped");
                        watchdog_cancel.cancel();
                        break;
                    }
                    let ping = Frame::new(Proto::Shell, shell_kind::PING, None);
                    if watchdog_bus
                        .publish(&device_subject(&watchdog_tenant, &watchdog_device), ping.encode().freeze())
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            }
        }
    });

    tokio::select! {
        _ = reader_task => {},
        _ = writer_task => {},
        _ = watchdog_task => {},
        _ = shutdown.cancelled() => {},
    }
    cancel.cancel();

    presence.disconnect(&tenant_id, &device_id, lease).await?;
    tracing::info!(tenant_id, device_id, "device disconnected");
    Ok(())
}
