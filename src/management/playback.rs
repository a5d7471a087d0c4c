//! Session playback (spec.md §4.F, §6): decompresses a stored recording and
//! paces its delivery back out so a client reproduces the original session
//! timing instead of receiving the whole gzip blob at once.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use flate2::read::GzDecoder;
use std::io::Read;
use uuid::Uuid;

use crate::error::RelayError;
use crate::frame::Frame;
use crate::store::DataStore;

/// One paced delivery step: a decoded frame and how long to sleep before
/// sending it, relative to the previous frame's arrival.
#[derive(Debug)]
pub struct PlaybackStep {
    pub frame: Frame,
    pub delay: Duration,
}

/// Replays a recording as a sequence of frames, each spaced `sleep_ms` apart
/// (spec §6's `?sleep_ms=` query parameter, default 0: deliver with no
/// delay). Frames in a recording carry no explicit inter-frame delay field,
/// so this is a caller-chosen uniform pacing rather than a reproduction of
/// the original session's real-time timing (see DESIGN.md's open question
/// on this).
pub async fn load_playback_steps(
    store: &Arc<dyn DataStore>,
    tenant_id: &str,
    session_id: Uuid,
    sleep_ms: u64,
) -> Result<Vec<PlaybackStep>, RelayError> {
    let recording = store.get_session_recording(tenant_id, session_id).await?;

    let mut decoder = GzDecoder::new(recording.recording.as_slice());
    let mut raw = Vec::new();
    decoder
        .read_to_end(&mut raw)
        .map_err(|e| RelayError::Internal(format!("recording decompression failed: {e}")))?;

    let delay = Duration::from_millis(sleep_ms);
    let mut steps = Vec::new();
    let mut buf = Bytes::from(raw);
    while !buf.is_empty() {
        let frame = Frame::decode(&mut buf)?;
        steps.push(PlaybackStep { frame, delay });
    }
    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{shell_kind, Proto};
    use crate::store::fake::InMemoryStore;
    use chrono::Utc;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[tokio::test]
    async fn loads_frames_in_recorded_order() {
        let store: Arc<dyn DataStore> = Arc::new(InMemoryStore::new());
        let session_id = Uuid::new_v4();

        let f1 = Frame::new(Proto::Shell, shell_kind::SHELL_DATA, Some(session_id)).with_body(Bytes::from_static(b"a"));
        let f2 = Frame::new(Proto::Shell, shell_kind::SHELL_DATA, Some(session_id)).with_body(Bytes::from_static(b"b"));

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&f1.encode()).unwrap();
        encoder.write_all(&f2.encode()).unwrap();
        let compressed = encoder.finish().unwrap();

        store
            .insert_session_recording("t", session_id, compressed, Utc::now(), chrono::Duration::days(30))
            .await
            .unwrap();

        let steps = load_playback_steps(&store, "t", session_id, 1000).await.unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].frame.body, Bytes::from_static(b"a"));
        assert_eq!(steps[1].frame.body, Bytes::from_static(b"b"));
        assert_eq!(steps[0].delay, Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn zero_sleep_ms_yields_no_delay() {
        let store: Arc<dyn DataStore> = Arc::new(InMemoryStore::new());
        let session_id = Uuid::new_v4();
        let frame = Frame::new(Proto::Shell, shell_kind::SHELL_DATA, Some(session_id)).with_body(Bytes::from_static(b"a"));
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&frame.encode()).unwrap();
        let compressed = encoder.finish().unwrap();
        store
            .insert_session_recording("t", session_id, compressed, Utc::now(), chrono::Duration::days(30))
            .await
            .unwrap();

        let steps = load_playback_steps(&store, "t", session_id, 0).await.unwrap();
        assert_eq!(steps[0].delay, Duration::ZERO);
    }

    #[tokio::test]
    async fn missing_recording_yields_not_found() {
        let store: Arc<dyn DataStore> = Arc::new(InMemoryStore::new());
        let err = load_playback_steps(&store, "t", Uuid::new_v4(), 0).await.unwrap_err();
        assert!(matches!(err, RelayError::NotFound(_)));
    }
}
