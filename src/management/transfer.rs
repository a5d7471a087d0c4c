//! File transfer (spec.md §4.F, protocol 2): a multi-frame request/response
//! exchange over the device's subject, the same correlation-subject pattern
//! as `control.rs` but streaming `FileChunk` frames instead of a single
//! reply.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use uuid::Uuid;

use crate::bus::{device_subject, MessageBus};
use crate::error::RelayError;
use crate::frame::{file_kind, Frame, Proto};

/// Requests a file from the device and collects every `FileChunk` reply
/// until an `ACK` (end of stream) or `Error` frame arrives.
pub async fn download(
    bus: &Arc<dyn MessageBus>,
    tenant_id: &str,
    device_id: &str,
    path: &str,
    timeout: Duration,
) -> Result<Vec<u8>, RelayError> {
    let correlation_id = Uuid::new_v4();
    let correlation_subject = format!("transfer.{correlation_id}");
    let mut reply_sub = bus.subscribe(&correlation_subject).await?;

    let request = Frame::new(Proto::FileTransfer, file_kind::GET_FILE, None)
        .with_prop("reply_to", correlation_subject.clone())
        .with_prop(file_kind::PROP_PATH, path);
    bus.publish(&device_subject(tenant_id, device_id), request.encode().freeze()).await?;

    let mut data = Vec::new();
    loop {
        match tokio::time::timeout(timeout, reply_sub.next()).await {
            Ok(Some(payload)) => {
                let frame = Frame::decode(payload)?;
                if frame.is_kind(file_kind::ERROR) {
                    return Err(RelayError::Internal(String::from_utf8_lossy(&frame.body).to_string()));
                }
                if frame.is_kind(file_kind::ACK) {
                    return Ok(data);
                }
                data.extend_from_slice(&frame.body);
            }
            Ok(None) => return Err(RelayError::DeviceNotConnected),
            Err(_) => return Err(RelayError::Timeout),
        }
    }
}

/// `path,uid,gid,mode` metadata accompanying an uploaded file's bytes
/// (spec.md §6's multipart upload form).
#[derive(Debug, Default, Clone)]
pub struct UploadMetadata {
    pub path: String,
    pub uid: Option<i64>,
    pub gid: Option<i64>,
    pub mode: Option<i64>,
}

/// Sends a file to the device as a single `PutFile` frame (carrying path and
/// ownership/permission metadata) followed by one `FileChunk` carrying the
/// whole body, then awaits the device's terminating ack frame on a
/// correlation subject (spec.md §4.F: "upload streams request bytes to the
/// device until exhaustion, then awaits an ack frame") before returning;
/// spec.md does not require chunking on the upload path at the relay layer
/// (the device may re-chunk on its end).
pub async fn upload(
    bus: &Arc<dyn MessageBus>,
    tenant_id: &str,
    device_id: &str,
    metadata: UploadMetadata,
    body: Bytes,
    timeout: Duration,
) -> Result<(), RelayError> {
    let correlation_id = Uuid::new_v4();
    let correlation_subject = format!("transfer.{correlation_id}");
    let mut reply_sub = bus.subscribe(&correlation_subject).await?;

    let mut put = Frame::new(Proto::FileTransfer, file_kind::PUT_FILE, None)
        .with_prop("reply_to", correlation_subject.clone())
        .with_prop(file_kind::PROP_PATH, metadata.path.as_str());
    if let Some(uid) = metadata.uid {
        put = put.with_prop(file_kind::PROP_UID, uid);
    }
    if let Some(gid) = metadata.gid {
        put = put.with_prop(file_kind::PROP_GID, gid);
    }
    if let Some(mode) = metadata.mode {
        put = put.with_prop(file_kind::PROP_MODE, mode);
    }
    bus.publish(&device_subject(tenant_id, device_id), put.encode().freeze()).await?;

    let chunk = Frame::new(Proto::FileTransfer, file_kind::FILE_CHUNK, None)
        .with_prop("reply_to", correlation_subject)
        .with_prop(file_kind::PROP_PATH, metadata.path.as_str())
        .with_body(body);
    bus.publish(&device_subject(tenant_id, device_id), chunk.encode().freeze()).await?;

    match tokio::time::timeout(timeout, reply_sub.next()).await {
        Ok(Some(payload)) => {
            let frame = Frame::decode(payload)?;
            if frame.is_kind(file_kind::ERROR) {
                return Err(RelayError::Internal(String::from_utf8_lossy(&frame.body).to_string()));
            }
            Ok(())
        }
        Ok(None) => Err(RelayError::DeviceNotConnected),
        Err(_) => Err(RelayError::Timeout),
    }
}
