//! The shared packet object (C2).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use bytes::Bytes;

use super::{Frame, ProtocolId};
use crate::dissect::hep::HepData;
use crate::dissect::ip::IpData;
use crate::dissect::link::{Dlt, LinkData};
use crate::dissect::rtcp::RtcpData;
use crate::dissect::rtp::RtpData;
use crate::dissect::sdp::SdpData;
use crate::dissect::sip::SipData;
use crate::dissect::tcp::TcpData;
use crate::dissect::udp::UdpData;

/// Per-protocol parse result a dissector attaches to a packet. One variant
/// per [`ProtocolId`]; a packet holds at most one entry per id.
#[derive(Debug, Clone)]
pub enum ProtoData {
    Link(LinkData),
    Ip(IpData),
    Udp(UdpData),
    Tcp(TcpData),
    Tls,
    Ws,
    Sip(SipData),
    Sdp(SdpData),
    Rtp(RtpData),
    Rtcp(RtcpData),
    Hep(HepData),
}

struct PacketInner {
    input: String,
    dlt: Dlt,
    frames: RwLock<Vec<Frame>>,
    protocols: RwLock<HashMap<ProtocolId, ProtoData>>,
}

/// A captured packet.
///
/// `Packet` is a cheap-to-clone handle over a reference-counted inner
/// object (spec §3/§9: "the graph...cannot be owned by a single parent").
/// Cloning it is exactly the C original's `packet_ref`; dropping the last
/// clone is `packet_unref` — Rust's `Arc` gives us both for free.
#[derive(Clone)]
pub struct Packet {
    inner: Arc<PacketInner>,
}

impl Packet {
    /// Create a new packet from a capture input, carrying a single frame.
    ///
    /// `input` names the capture source this packet came from (used for
    /// diagnostics and the back-reference spec §3 describes); `dlt` is the
    /// link type the root link dissector should use (ignored for HEP-sourced
    /// packets, which enter the pipeline at the HEP dissector instead).
    pub fn new(input: impl Into<String>, dlt: Dlt, frame: Frame) -> Self {
        Self {
            inner: Arc::new(PacketInner {
                input: input.into(),
                dlt,
                frames: RwLock::new(vec![frame]),
                protocols: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Capture input name this packet originated from.
    pub fn input(&self) -> &str {
        &self.inner.input
    }

    /// Link type to dissect this packet's first frame with.
    pub fn dlt(&self) -> Dlt {
        self.inner.dlt
    }

    /// Attach (or replace) a protocol's parse result.
    pub fn set_protocol_data(&self, id: ProtocolId, data: ProtoData) {
        self.inner.protocols.write().unwrap().insert(id, data);
    }

    /// Fetch a clone of a protocol's parse result, if present.
    pub fn protocol_data(&self, id: ProtocolId) -> Option<ProtoData> {
        self.inner.protocols.read().unwrap().get(&id).cloned()
    }

    /// Whether this packet carries a parse result for `id`.
    pub fn has_protocol(&self, id: ProtocolId) -> bool {
        self.inner.protocols.read().unwrap().contains_key(&id)
    }

    /// Remove a protocol's parse result (dissector `free_data`).
    pub fn clear_protocol_data(&self, id: ProtocolId) {
        self.inner.protocols.write().unwrap().remove(&id);
    }

    /// Append a frame (used by reassembly once a fragment/segment is
    /// folded into this packet).
    pub fn push_frame(&self, frame: Frame) {
        self.inner.frames.write().unwrap().push(frame);
    }

    /// Number of frames this packet carries (> 1 after reassembly).
    pub fn frame_count(&self) -> usize {
        self.inner.frames.read().unwrap().len()
    }

    /// Clone of the current frame list, in arrival order.
    pub fn frames(&self) -> Vec<Frame> {
        self.inner.frames.read().unwrap().clone()
    }

    /// First captured frame, if any.
    pub fn first_frame(&self) -> Option<Frame> {
        self.inner.frames.read().unwrap().first().cloned()
    }

    /// Timestamp of the *last* frame — spec §3 invariant: a reassembled
    /// packet's time is when reassembly completed, not when the first
    /// fragment/segment arrived.
    pub fn time(&self) -> u64 {
        self.inner
            .frames
            .read()
            .unwrap()
            .last()
            .map(|f| f.timestamp_usec)
            .unwrap_or(0)
    }

    /// Move `other`'s frames onto the end of this packet's frame list,
    /// leaving `other` with none. Used when IP fragments or TCP segments
    /// from several single-frame packets are merged into the packet that
    /// completes reassembly.
    pub fn absorb_frames_from(&self, other: &Packet) {
        let mut taken = std::mem::take(&mut *other.inner.frames.write().unwrap());
        self.inner.frames.write().unwrap().append(&mut taken);
    }

    /// Replace the timestamp of the most recently pushed frame. Used by the
    /// HEP dissector to swap the socket-arrival time for the original
    /// capture timestamp an HEP agent reports.
    pub fn override_last_frame_timestamp(&self, timestamp_usec: u64) {
        if let Some(frame) = self.inner.frames.write().unwrap().last_mut() {
            frame.timestamp_usec = timestamp_usec;
        }
    }

    /// Whether `self` and `other` are handles to the same underlying packet.
    pub fn is_same(&self, other: &Packet) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Strong reference count — exposed for the "no orphan refcount after
    /// clear_all()" invariant test (spec §8); not meaningful in production
    /// code paths.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl std::fmt::Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("input", &self.inner.input)
            .field("frames", &self.inner.frames.read().unwrap().len())
            .finish()
    }
}

/// Convenience: build a one-frame raw byte payload as `Bytes` for tests and
/// capture inputs that already hold owned buffers.
pub fn payload_bytes(data: impl Into<Vec<u8>>) -> Bytes {
    Bytes::from(data.into())
}
