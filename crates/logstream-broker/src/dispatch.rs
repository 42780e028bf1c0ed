//! Per-Client Dispatch
//!
//! One logical delivery task per client id, decoupled from the physical
//! connection so a reconnect (`CID`) can reattach without losing progress.
//!
//! ## Delivery cycle
//!
//! ```text
//! loop:
//!   heartbeat stale? ──────────────→ retire, keep state for reconnect
//!   scan subscribed topics (sorted), one record per topic per pass
//!       ↓ staged into batch, offsets advanced only locally
//!   batch full (count / bytes) or linger expired?
//!       ↓ YES
//!   flush frames to the socket ────→ write failed? retire
//!       ↓ success
//!   commit staged offsets            ← only after the flush: this ordering
//!                                      is what makes delivery at-least-once
//!   nothing staged? block on the first of the subscribed topics' signals,
//!   bounded by a short timeout, then rescan
//! ```
//!
//! One record per topic per scan keeps a busy topic from starving the rest.
//! Within one topic, records are delivered in strictly increasing offset
//! order; nothing is guaranteed across topics or across clients.

use bytes::{BufMut, Bytes, BytesMut};
use futures::stream::SplitSink;
use futures::SinkExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify};
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use logstream_storage::{LogStore, OffsetStore};

use crate::codec::FrameCodec;
use crate::config::BrokerConfig;
use crate::error::BrokerResult;
use crate::session::{ClientRegistry, ClientSession};

/// The write half of a framed connection, shared between the connection
/// task (registration replies) and this client's dispatch task.
pub(crate) type FrameSink = SplitSink<Framed<TcpStream, FrameCodec>, Bytes>;

#[derive(Debug)]
enum ExitReason {
    HeartbeatExpired,
    WriteFailed,
}

/// An in-progress delivery batch. Offsets staged here are uncommitted until
/// the batch reaches the socket.
#[derive(Default)]
struct Batch {
    frames: Vec<Bytes>,
    bytes: usize,
    staged: HashMap<String, u64>,
}

impl Batch {
    fn push(&mut self, topic: &str, next_offset: u64, frame: Bytes) {
        self.bytes += frame.len();
        self.frames.push(frame);
        self.staged.insert(topic.to_string(), next_offset);
    }

    fn messages(&self) -> usize {
        self.frames.len()
    }

    fn full(&self, config: &BrokerConfig) -> bool {
        self.messages() >= config.batch_max_messages || self.bytes >= config.batch_max_bytes
    }
}

pub(crate) struct Dispatcher {
    client_id: String,
    generation: u64,
    session: Arc<ClientSession>,
    log: Arc<LogStore>,
    offsets: Arc<OffsetStore>,
    sink: Arc<Mutex<FrameSink>>,
    config: Arc<BrokerConfig>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        client_id: String,
        generation: u64,
        session: Arc<ClientSession>,
        log: Arc<LogStore>,
        offsets: Arc<OffsetStore>,
        sink: Arc<Mutex<FrameSink>>,
        config: Arc<BrokerConfig>,
    ) -> Self {
        Self {
            client_id,
            generation,
            session,
            log,
            offsets,
            sink,
            config,
        }
    }

    /// Run until heartbeat expiry or a failed write, then deregister.
    pub(crate) async fn run(self, registry: Arc<ClientRegistry>) {
        let reason = self.deliver().await;
        debug!(client = %self.client_id, ?reason, "dispatch task retiring");
        registry.finish_dispatch(&self.client_id, self.generation);
    }

    async fn deliver(&self) -> ExitReason {
        loop {
            if self.session.since_heartbeat() >= self.config.liveness_timeout() {
                return ExitReason::HeartbeatExpired;
            }
            let Some(batch) = self.next_batch().await else {
                continue; // idle wait elapsed; re-check liveness and rescan
            };
            if self.flush(&batch).await.is_err() {
                return ExitReason::WriteFailed;
            }
            // Commit strictly after the successful flush.
            for (topic, offset) in &batch.staged {
                if let Err(e) = self.offsets.commit(&self.client_id, topic, *offset).await {
                    warn!(client = %self.client_id, topic, error = %e, "offset commit failed");
                }
            }
        }
    }

    /// Assemble one batch. Returns `None` if an idle wait elapsed with
    /// nothing staged, so the caller can re-check liveness.
    async fn next_batch(&self) -> Option<Batch> {
        let mut batch = Batch::default();
        let mut batch_started: Option<Instant> = None;
        loop {
            let staged_any = self.scan(&mut batch).await;
            if batch.messages() > 0 && batch_started.is_none() {
                batch_started = Some(Instant::now());
            }
            if batch.full(&self.config) {
                return Some(batch);
            }
            match batch_started {
                Some(started) => {
                    if started.elapsed() >= self.config.linger() {
                        return Some(batch);
                    }
                    if !staged_any {
                        let remaining = self.config.linger().saturating_sub(started.elapsed());
                        self.wait_for_signal(remaining).await;
                        if started.elapsed() >= self.config.linger() {
                            return Some(batch);
                        }
                    }
                }
                None => {
                    if !staged_any {
                        self.wait_for_signal(self.config.signal_wait()).await;
                        return None;
                    }
                }
            }
        }
    }

    /// One pass over the subscribed topics in sorted order, staging at most
    /// one record per topic. Returns whether anything moved.
    async fn scan(&self, batch: &mut Batch) -> bool {
        let mut topics: Vec<(String, u64)> =
            self.offsets.topics(&self.client_id).into_iter().collect();
        topics.sort();

        let mut moved = false;
        for (topic, committed) in topics {
            if batch.full(&self.config) {
                break;
            }
            let offset = batch.staged.get(&topic).copied().unwrap_or(committed);
            if !self.log.is_available(&topic, offset) {
                continue;
            }
            match self
                .log
                .read_message(&topic, offset, self.config.verify_read_checksums)
            {
                Ok((Some(payload), next)) => {
                    let mut frame = BytesMut::with_capacity(topic.len() + 1 + payload.len());
                    frame.extend_from_slice(topic.as_bytes());
                    frame.put_u8(b' ');
                    frame.extend_from_slice(&payload);
                    batch.push(&topic, next, frame.freeze());
                    moved = true;
                }
                Ok((None, next)) if next != offset => {
                    // Expired data or a skipped corrupt record. Nothing was
                    // delivered, so this advance commits without a flush.
                    batch.staged.insert(topic.clone(), next);
                    if let Err(e) = self.offsets.commit(&self.client_id, &topic, next).await {
                        warn!(client = %self.client_id, topic, error = %e, "fast-forward commit failed");
                    }
                    moved = true;
                }
                Ok((None, _)) => {}
                Err(e) => {
                    warn!(client = %self.client_id, topic, error = %e, "read for dispatch failed");
                }
            }
        }
        moved
    }

    async fn flush(&self, batch: &Batch) -> BrokerResult<()> {
        let mut sink = self.sink.lock().await;
        for frame in &batch.frames {
            sink.feed(frame.clone()).await?;
        }
        sink.flush().await?;
        Ok(())
    }

    /// Block until any subscribed topic signals an append, bounded by
    /// `timeout`. A signal coalesced away only costs the timeout.
    async fn wait_for_signal(&self, timeout: Duration) {
        if timeout.is_zero() {
            return;
        }
        let topics = self.offsets.topics(&self.client_id);
        let signals: Vec<Arc<Notify>> = topics
            .keys()
            .filter_map(|topic| self.log.signal(topic))
            .collect();
        if signals.is_empty() {
            tokio::time::sleep(timeout).await;
            return;
        }
        let waits: Vec<_> = signals
            .iter()
            .map(|signal| Box::pin(signal.notified()))
            .collect();
        let _ = tokio::time::timeout(timeout, futures::future::select_all(waits)).await;
    }
}
