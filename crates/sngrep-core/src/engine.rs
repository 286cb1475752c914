//! Capture engine: the explicit, caller-constructed object that owns the
//! dissector registry, storage, and the single writer task draining the
//! work queue (spec §5/§9 — no global/singleton state).

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::capture::queue::{self, WorkQueueReceiver, WorkQueueSender};
use crate::capture::CaptureInput;
use crate::config::CaptureConfig;
use crate::dissect::DissectorRegistry;
use crate::error::Result;
use crate::packet::{Packet, ProtocolId};
use crate::storage::Storage;

/// Owns everything a capture session needs: the dissector chain, the
/// storage graph, and the writer task that's the only thing allowed to
/// mutate storage (§5).
pub struct CaptureEngine {
    registry: Arc<DissectorRegistry>,
    storage: Arc<Storage>,
    queue_tx: WorkQueueSender,
    writer: Option<JoinHandle<()>>,
}

impl CaptureEngine {
    /// Build the dissector registry and storage from `config`, and spawn
    /// the single writer task. Returns immediately; the writer runs until
    /// [`CaptureEngine::close`] is called.
    pub fn new(config: CaptureConfig) -> Self {
        let registry = Arc::new(DissectorRegistry::standard(&config));
        let storage = Arc::new(Storage::new(config.clone()));
        let (queue_tx, queue_rx) = queue::channel(config.work_queue_capacity);

        let writer = tokio::spawn(Self::run_writer(registry.clone(), storage.clone(), queue_rx));

        Self {
            registry,
            storage,
            queue_tx,
            writer: Some(writer),
        }
    }

    /// The storage graph, for read access (snapshot iteration, stats) or
    /// to register an observer.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// A cloneable handle capture inputs submit frames through.
    pub fn queue_sender(&self) -> WorkQueueSender {
        self.queue_tx.clone()
    }

    /// Start a capture input's read loop as a background task, feeding
    /// this engine's queue. The caller owns the returned handle and
    /// decides how to await or abort it.
    pub fn spawn_input(&self, name: impl Into<String>, input: CaptureInput) -> JoinHandle<Result<()>> {
        let queue = self.queue_sender();
        tokio::spawn(input.start(name.into(), queue))
    }

    /// Drop every retained call along with all in-progress IP fragment and
    /// TCP segment reassembly state, so no packet is left refcounted after
    /// the call returns.
    pub fn clear_all(&self) {
        self.storage.clear_all();
        self.registry.clear_reassembly();
    }

    /// Signal the writer to drain and stop, then wait for it.
    pub async fn close(&mut self) {
        self.queue_tx.close();
        if let Some(writer) = self.writer.take() {
            let _ = writer.await;
        }
    }

    async fn run_writer(
        registry: Arc<DissectorRegistry>,
        storage: Arc<Storage>,
        mut queue_rx: WorkQueueReceiver,
    ) {
        while let Some(item) = queue_rx.recv().await {
            let payload = item.frame.bytes.clone();
            let packet = Packet::new(item.input, item.dlt, item.frame);
            registry.dissect_from(item.root, &packet, payload);

            if packet.has_protocol(ProtocolId::Sip) {
                storage.ingest_sip(&packet);
            }
            if packet.has_protocol(ProtocolId::Rtp) {
                storage.ingest_rtp(&packet);
            }
            if packet.has_protocol(ProtocolId::Rtcp) {
                storage.ingest_rtcp(&packet);
            }
        }
    }
}
