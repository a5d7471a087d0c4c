//! Session recording (spec.md §4.D, §5): every frame relayed during a
//! recordable session is appended to a gzip stream on a dedicated task fed
//! by a bounded channel. A slow or wedged recorder must never back-pressure
//! the relay path, so the channel is bounded and overflow drops the frame
//! and flags the session `RecorderOverflow` rather than blocking.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderStatus {
    Ok,
    Overflow,
}

pub struct Recorder {
    tx: mpsc::Sender<Vec<u8>>,
    status: std::sync::Arc<std::sync::atomic::AtomicBool>,
    finish_rx: Option<oneshot::Receiver<Vec<u8>>>,
}

impl Recorder {
    /// Spawns the background compressor task. `chunk_hint` is a size hint
    /// for how much buffered plaintext accumulates before the gzip stream is
    /// flushed to the sink; it does not bound individual frame sizes.
    pub fn spawn(channel_capacity: usize, chunk_hint: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(channel_capacity);
        let (finish_tx, finish_rx) = oneshot::channel();
        let overflowed = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));

        tokio::spawn(async move {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            let mut buffered = 0usize;
            while let Some(chunk) = rx.recv().await {
                buffered += chunk.len();
                if encoder.write_all(&chunk).is_err() {
                    tracing::warn!("recorder write failed, dropping remainder of session");
                    break;
                }
                if buffered >= chunk_hint {
                    let _ = encoder.flush();
                    buffered = 0;
                }
            }
            let compressed = encoder.finish().unwrap_or_default();
            let _ = finish_tx.send(compressed);
        });

        Self { tx, status: overflowed, finish_rx: Some(finish_rx) }
    }

    /// Appends a chunk of relayed frame bytes. Never blocks: a full channel
    /// means the recorder can't keep up, so the chunk is dropped and the
    /// session's status flips to `Overflow` (spec.md §5).
    pub fn record(&self, chunk: Vec<u8>) -> RecorderStatus {
        match self.tx.try_send(chunk) {
            Ok(()) => RecorderStatus::Ok,
            Err(_) => {
                self.status.store(true, std::sync::atomic::Ordering::Relaxed);
                RecorderStatus::Overflow
            }
        }
    }

    pub fn overflowed(&self) -> bool {
        self.status.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Closes the input side and waits for the compressor to flush and
    /// return the final gzip-compressed bytes.
    pub async fn finish(mut self) -> Vec<u8> {
        drop(self.tx);
        match self.finish_rx.take() {
            Some(rx) => rx.await.unwrap_or_default(),
            None => Vec::new(),
        }
    }
}
