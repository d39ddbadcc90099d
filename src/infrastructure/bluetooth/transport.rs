//! Link Transport
//!
//! Moves text over the attached endpoint. Outbound frames are chunked and
//! paced; inbound notifications are reassembled into records. Nothing here
//! knows what a vehicle command is.

use crate::domain::log_book::SessionLog;
use crate::domain::models::{AppEvent, LogDirection};
use crate::infrastructure::bluetooth::connection::{
    BleBackend, ConnectionConfig, EndpointHandle, LinkError,
};
use crate::infrastructure::bluetooth::protocol::{self, Chunk, FrameDecoder};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Anything that can push a text frame towards the vehicle.
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn send_frame(&self, text: &str, logging: bool) -> Result<(), LinkError>;

    fn is_connected(&self) -> bool;
}

pub struct LinkTransport<B: BleBackend> {
    backend: Arc<B>,
    endpoint: Mutex<Option<EndpointHandle>>,
    decoder: Mutex<FrameDecoder>,
    pending: Mutex<Vec<AbortHandle>>,
    chunk_size: usize,
    chunk_delay: Duration,
    log: SessionLog,
}

impl<B: BleBackend> LinkTransport<B> {
    pub fn new(backend: Arc<B>, config: &ConnectionConfig, log: SessionLog) -> Self {
        Self {
            backend,
            endpoint: Mutex::new(None),
            decoder: Mutex::new(FrameDecoder::new()),
            pending: Mutex::new(Vec::new()),
            chunk_size: config.chunk_size,
            chunk_delay: config.chunk_delay,
            log,
        }
    }

    pub fn attach(&self, endpoint: EndpointHandle) {
        debug!("Transport attached to {}", endpoint.characteristic_uuid);
        lock(&self.decoder).clear();
        *lock(&self.endpoint) = Some(endpoint);
    }

    /// Forget the endpoint and cancel chunks still waiting to go out.
    pub fn detach(&self) -> Option<EndpointHandle> {
        let cancelled = self.cancel_pending();
        if cancelled > 0 {
            debug!("Cancelled {} pending chunk(s)", cancelled);
        }
        lock(&self.decoder).clear();
        lock(&self.endpoint).take()
    }

    pub fn endpoint(&self) -> Option<EndpointHandle> {
        lock(&self.endpoint).clone()
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.endpoint).is_some()
    }

    /// Send one frame. The first chunk is written before this returns; the
    /// rest are scheduled relative to now and written independently.
    ///
    /// Silently does nothing when detached or when `text` is empty.
    pub async fn send(&self, text: &str, logging: bool) -> Result<(), LinkError> {
        if text.is_empty() {
            return Ok(());
        }
        let Some(endpoint) = self.endpoint() else {
            trace!("Dropping frame while detached");
            return Ok(());
        };

        let built_at = Instant::now();
        let mut chunks = protocol::chunk_frame(&protocol::frame(text), self.chunk_size).into_iter();
        if logging {
            self.log.append(text.trim(), LogDirection::Out);
        }

        let Some(first) = chunks.next() else {
            return Ok(());
        };
        for chunk in chunks {
            self.schedule(endpoint.clone(), chunk, built_at);
        }

        if let Err(e) = self.backend.write(&endpoint, &first.bytes).await {
            warn!("Write failed: {}", e);
            self.log.plain(format!("Write failed: {}", e));
            return Err(e);
        }
        Ok(())
    }

    fn schedule(&self, endpoint: EndpointHandle, chunk: Chunk, built_at: Instant) {
        let due = built_at + chunk.due_after(self.chunk_delay);
        let backend = Arc::clone(&self.backend);
        let log = self.log.clone();

        let task = tokio::spawn(async move {
            tokio::time::sleep_until(due).await;
            if let Err(e) = backend.write(&endpoint, &chunk.bytes).await {
                warn!("Chunk {} write failed: {}", chunk.index, e);
                log.plain(format!("Chunk {} write failed: {}", chunk.index, e));
            }
        });

        let mut pending = lock(&self.pending);
        pending.retain(|handle| !handle.is_finished());
        pending.push(task.abort_handle());
    }

    /// Abort every chunk that has not been written yet. Returns how many.
    pub fn cancel_pending(&self) -> usize {
        let mut pending = lock(&self.pending);
        let live = pending.iter().filter(|h| !h.is_finished()).count();
        for handle in pending.drain(..) {
            handle.abort();
        }
        live
    }

    /// Feed a notification payload. Every completed record is logged and
    /// forwarded as [`AppEvent::Received`].
    pub fn on_incoming(&self, raw: &[u8]) -> Vec<String> {
        let records = lock(&self.decoder).push_bytes(raw);
        for record in &records {
            self.log.append(record.clone(), LogDirection::In);
            self.log.emit(AppEvent::Received(record.clone()));
        }
        records
    }
}

#[async_trait]
impl<B: BleBackend> FrameSink for LinkTransport<B> {
    async fn send_frame(&self, text: &str, logging: bool) -> Result<(), LinkError> {
        self.send(text, logging).await
    }

    fn is_connected(&self) -> bool {
        LinkTransport::is_connected(self)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
