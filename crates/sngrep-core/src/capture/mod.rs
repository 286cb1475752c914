//! Capture input manager (C9): pcap-file, pcap-live and HEP-socket sources,
//! unified behind one status/pause/close surface and funneled into the
//! single-writer work queue (§5).
//!
//! Grounded on `original_source/src/pcap.c`/`.h`.

pub mod hep;
pub mod pcapfile;
pub mod pcaplive;
pub mod queue;

use crate::dissect::link::Dlt;
use crate::error::Result;
use crate::packet::ProtocolId;
use queue::{WorkItem, WorkQueueSender};

/// Whether a capture input reads a finite file or an unbounded live/network
/// source (spec §4.8 `status()`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    Offline,
    Online,
}

/// Snapshot of a capture input's progress and configuration.
#[derive(Debug, Clone)]
pub struct CaptureStatus {
    pub mode: CaptureMode,
    pub device_or_file: String,
    pub bpf: Option<String>,
    pub loaded_fraction: f32,
}

/// One of the three capture source kinds, already open.
pub enum CaptureInput {
    PcapFile(pcapfile::PcapFileInput, Dlt),
    PcapLive(pcaplive::PcapLiveInput),
    Hep(hep::HepSocketInput),
}

impl CaptureInput {
    pub async fn open_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let (input, dlt) = pcapfile::PcapFileInput::open(path).await?;
        Ok(CaptureInput::PcapFile(input, dlt))
    }

    pub fn open_live(device: impl Into<String>, bpf_expression: Option<String>) -> Result<Self> {
        Ok(CaptureInput::PcapLive(pcaplive::PcapLiveInput::open(
            device,
            bpf_expression,
        )?))
    }

    pub async fn open_hep(bind_addr: &str) -> Result<Self> {
        Ok(CaptureInput::Hep(hep::HepSocketInput::bind(bind_addr).await?))
    }

    pub fn pause(&mut self, paused: bool) {
        match self {
            CaptureInput::PcapFile(input, _) => input.pause(paused),
            CaptureInput::PcapLive(input) => input.pause(paused),
            CaptureInput::Hep(input) => input.pause(paused),
        }
    }

    pub fn status(&self) -> CaptureStatus {
        match self {
            CaptureInput::PcapFile(input, _) => CaptureStatus {
                mode: CaptureMode::Offline,
                device_or_file: input.name().to_string(),
                bpf: None,
                loaded_fraction: input.loaded_fraction(),
            },
            CaptureInput::PcapLive(input) => CaptureStatus {
                mode: CaptureMode::Online,
                device_or_file: input.device().to_string(),
                bpf: input.bpf_expression().map(str::to_string),
                loaded_fraction: 0.0,
            },
            CaptureInput::Hep(input) => CaptureStatus {
                mode: CaptureMode::Online,
                device_or_file: input.bind_addr().to_string(),
                bpf: None,
                loaded_fraction: 0.0,
            },
        }
    }

    /// The dissector this input's frames enter the chain at.
    pub fn root_protocol(&self) -> ProtocolId {
        match self {
            CaptureInput::PcapFile(..) | CaptureInput::PcapLive(_) => ProtocolId::Link,
            CaptureInput::Hep(_) => ProtocolId::Hep,
        }
    }

    /// Feed every available frame into `queue`, tagged with `name` and this
    /// input's root protocol/link type. Runs until the source is exhausted
    /// (file) or the task is cancelled (live/HEP).
    pub async fn start(mut self, name: String, queue: WorkQueueSender) -> Result<()> {
        let root = self.root_protocol();
        match &mut self {
            CaptureInput::PcapFile(input, dlt) => {
                let dlt = *dlt;
                let queue = queue.clone();
                let name = name.clone();
                input
                    .run(move |frame| {
                        let queue = queue.clone();
                        let name = name.clone();
                        Box::pin(async move {
                            queue
                                .send(WorkItem {
                                    input: name,
                                    root,
                                    dlt,
                                    frame,
                                })
                                .await;
                        })
                    })
                    .await?;
            }
            CaptureInput::PcapLive(input) => loop {
                match input.read_frame().await? {
                    Some(bytes) => {
                        let frame = crate::packet::Frame::new(crate::time::now_usec(), bytes);
                        queue
                            .send(WorkItem {
                                input: name.clone(),
                                root,
                                dlt: Dlt::En10mb,
                                frame,
                            })
                            .await;
                    }
                    None => tokio::time::sleep(std::time::Duration::from_millis(50)).await,
                }
            },
            CaptureInput::Hep(input) => loop {
                match input.read_datagram().await? {
                    Some(bytes) => {
                        let frame = crate::packet::Frame::new(crate::time::now_usec(), bytes);
                        queue
                            .send(WorkItem {
                                input: name.clone(),
                                root,
                                dlt: Dlt::Raw,
                                frame,
                            })
                            .await;
                    }
                    None => tokio::time::sleep(std::time::Duration::from_millis(50)).await,
                }
            },
        }
        Ok(())
    }
}
