//! Synchronous control round-trips over the bus (spec.md §4.F):
//! check-update and send-inventory both publish a Mender-protocol frame on
//! the device's subject and wait on a private correlation subject for the
//! device's reply, bounded by `control_timeout`. 202 means the device
//! accepted and is working on it; 409 means it's unreachable; 408 means it
//! didn't answer in time.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::bus::{device_subject, MessageBus};
use crate::error::RelayError;
use crate::frame::{mender_kind, Frame, Proto};
use crate::presence::PresenceTracker;

/// Runs one check-update/send-inventory round trip. A device with no live
/// presence entry is rejected immediately with `RelayError::DeviceNotConnected`
/// (409, spec.md §4.F scenario 3); only a connected-but-silent device is
/// allowed to run out the clock into `RelayError::Timeout` (408, scenario 4).
pub async fn run_control_round_trip(
    bus: &Arc<dyn MessageBus>,
    presence: &Arc<PresenceTracker>,
    tenant_id: &str,
    device_id: &str,
    kind: &str,
    timeout: Duration,
) -> Result<Vec<u8>, RelayError> {
    if presence.lookup(tenant_id, device_id).await?.is_none() {
        return Err(RelayError::DeviceNotConnected);
    }

    let correlation_id = Uuid::new_v4();
    let correlation_subject = format!("control.{correlation_id}");
    let mut reply_sub = bus.subscribe(&correlation_subject).await?;

    let request = Frame::new(Proto::MenderClient, kind, None).with_prop("reply_to", correlation_subject.clone());
    bus.publish(&device_subject(tenant_id, device_id), request.encode().freeze()).await?;

    match tokio::time::timeout(timeout, reply_sub.next()).await {
        Ok(Some(payload)) => {
            let frame = Frame::decode(payload)?;
            Ok(frame.body.to_vec())
        }
        Ok(None) => Err(RelayError::DeviceNotConnected),
        Err(_) => Err(RelayError::Timeout),
    }
}

pub async fn check_update(
    bus: &Arc<dyn MessageBus>,
    presence: &Arc<PresenceTracker>,
    tenant_id: &str,
    device_id: &str,
    timeout: Duration,
) -> Result<Vec<u8>, RelayError> {
    run_control_round_trip(bus, presence, tenant_id, device_id, mender_kind::CHECK_UPDATE, timeout).await
}

pub async fn send_inventory(
    bus: &Arc<dyn MessageBus>,
    presence: &Arc<PresenceTracker>,
    tenant_id: &str,
    device_id: &str,
    timeout: Duration,
) -> Result<Vec<u8>, RelayError> {
    run_control_round_trip(bus, presence, tenant_id, device_id, mender_kind::SEND_INVENTORY, timeout).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::fake::InMemoryBus;
    use crate::frame::shell_kind;
    use crate::store::fake::InMemoryStore;
    use crate::store::DataStore;

    fn presence_tracker(bus: Arc<dyn MessageBus>) -> Arc<PresenceTracker> {
        let store: Arc<dyn DataStore> = Arc::new(InMemoryStore::new());
        Arc::new(PresenceTracker::new(store, bus, Duration::from_secs(60), Duration::from_secs(30)))
    }

    #[tokio::test]
    async fn control_round_trip_rejects_device_with_no_presence() {
        let bus: Arc<dyn MessageBus> = InMemoryBus::new();
        let presence = presence_tracker(bus.clone());
        let err = check_update(&bus, &presence, "t", "d", Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, RelayError::DeviceNotConnected));
    }

    #[tokio::test]
    async fn control_round_trip_times_out_when_connected_device_stays_silent() {
        let bus: Arc<dyn MessageBus> = InMemoryBus::new();
        let presence = presence_tracker(bus.clone());
        let _lease = presence.connect("t", "d", "instance-a").await.unwrap();

        let err = check_update(&bus, &presence, "t", "d", Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, RelayError::Timeout));
    }

    #[tokio::test]
    async fn control_round_trip_returns_device_reply_body() {
        let bus: Arc<dyn MessageBus> = InMemoryBus::new();
        let presence = presence_tracker(bus.clone());
        let _lease = presence.connect("t", "d", "instance-a").await.unwrap();

        let mut device_sub = bus.subscribe(&device_subject("t", "d")).await.unwrap();
        let bus_for_device = bus.clone();
        tokio::spawn(async move {
            let payload = device_sub.next().await.unwrap();
            let request = Frame::decode(payload).unwrap();
            let reply_to = match request.props.get("reply_to") {
                Some(crate::frame::PropValue::Text(s)) => s.clone(),
                _ => return,
            };
            let reply = Frame::new(Proto::MenderClient, shell_kind::ERROR, None).with_body(bytes::Bytes::from_static(b"ok"));
            let _ = bus_for_device.publish(&reply_to, reply.encode().freeze()).await;
        });

        let body = check_update(&bus, &presence, "t", "d", Duration::from_secs(2)).await.unwrap();
        assert_eq!(body, b"ok");
    }
}
