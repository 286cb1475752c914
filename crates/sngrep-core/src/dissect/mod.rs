//! Dissector framework (C3).
//!
//! Mirrors `packet_dissector_next`/`packet_dissector_next_proto` from the
//! original `storage/packet/dissector.c`: each dissector consumes a prefix
//! of its input, attaches a parse result to the packet, and either hands
//! the remainder to its registered sub-dissectors or signals it is done.

pub mod hep;
pub mod ip;
pub mod link;
pub mod rtcp;
pub mod rtp;
pub mod sdp;
pub mod sip;
pub mod tcp;
pub mod tls;
pub mod udp;

use std::collections::HashMap;
use std::sync::Arc;

use crate::packet::{Packet, ProtocolId};

/// Outcome of a single dissector's `dissect` call.
pub enum DissectResult {
    /// This dissector consumed the whole payload; no sub-dissection needed.
    Done,
    /// This dissector peeled its header and sub-dissectors should run on
    /// the returned tail.
    Continue(bytes::Bytes),
    /// This dissector did not recognize the payload at all; the caller
    /// should try the next sibling dissector (or, for stream protocols,
    /// keep buffering).
    NotMine(bytes::Bytes),
}

/// A single protocol layer's parser.
///
/// Implementations MUST NOT retain a borrow into the payload beyond the
/// `dissect` call itself — payloads handed to sub-dissectors may be
/// sliced, but ownership of the underlying frame bytes stays with
/// [`Packet`] (spec §4.1).
pub trait Dissector: Send + Sync {
    /// This dissector's protocol id.
    fn id(&self) -> ProtocolId;

    /// Consume (a prefix of) `payload`, annotating `packet` with this
    /// protocol's parse result.
    fn dissect(&self, packet: &Packet, payload: bytes::Bytes) -> DissectResult;

    /// Release any protocol-specific data this dissector attached to
    /// `packet`. Default no-op: most dissectors attach plain data that is
    /// dropped along with the packet's protocol map.
    fn free_data(&self, _packet: &Packet) {}

    /// Sub-dissector ids to try, in order, on this dissector's leftover
    /// payload.
    fn subdissectors(&self) -> &[ProtocolId] {
        &[]
    }
}

/// Maps protocol ids to their dissector instance. Built once at
/// [`crate::CaptureEngine`] construction time and shared (read-only) by the
/// single writer thread that drives dissection.
pub struct DissectorRegistry {
    dissectors: HashMap<ProtocolId, Arc<dyn Dissector>>,
    ip: Arc<ip::IpDissector>,
    tcp: Arc<tcp::TcpDissector>,
}

impl DissectorRegistry {
    /// Build the registry with the standard chain: link → ip → udp/tcp;
    /// udp → sip/rtp/rtcp/hep (in order); tcp → sip/tls.
    pub fn standard(config: &crate::config::CaptureConfig) -> Self {
        let ip = Arc::new(ip::IpDissector::new(config));
        let tcp = Arc::new(tcp::TcpDissector::new(config));

        let mut dissectors: HashMap<ProtocolId, Arc<dyn Dissector>> = HashMap::new();
        dissectors.insert(ProtocolId::Link, Arc::new(link::LinkDissector::new()));
        dissectors.insert(ProtocolId::Ip, ip.clone());
        dissectors.insert(ProtocolId::Udp, Arc::new(udp::UdpDissector::new()));
        dissectors.insert(ProtocolId::Tcp, tcp.clone());
        dissectors.insert(ProtocolId::Sip, Arc::new(sip::SipDissector::new(config)));
        dissectors.insert(ProtocolId::Tls, Arc::new(tls::TlsDissector::new()));
        dissectors.insert(ProtocolId::Hep, Arc::new(hep::HepDissector::new(config)));
        dissectors.insert(ProtocolId::Rtp, Arc::new(rtp::RtpDissector::new()));
        dissectors.insert(ProtocolId::Rtcp, Arc::new(rtcp::RtcpDissector::new()));
        Self { dissectors, ip, tcp }
    }

    /// Look up a single dissector by id.
    pub fn get(&self, id: ProtocolId) -> Option<&dyn Dissector> {
        self.dissectors.get(&id).map(|b| b.as_ref())
    }

    /// Drop all in-progress IP fragment and TCP segment reassembly state.
    /// Storage's `clear_all()` only forgets calls/streams; the dissector
    /// chain owns the reassembly tables, so a caller wanting a full clear
    /// with no orphaned state left behind must call both.
    pub fn clear_reassembly(&self) {
        self.ip.clear_reassembly();
        self.tcp.clear_reassembly();
    }

    /// Entry point for a capture input: dissect starting from the given
    /// root protocol (normally [`ProtocolId::Link`], or [`ProtocolId::Hep`]
    /// for an HEP socket source).
    pub fn dissect_from(&self, root: ProtocolId, packet: &Packet, payload: bytes::Bytes) {
        self.dispatch(root, packet, payload);
    }

    /// Invoke a single protocol's dissector and, if it consumed a prefix,
    /// chain into its sub-dissectors (`next()` from spec §4.1).
    fn dispatch(&self, id: ProtocolId, packet: &Packet, payload: bytes::Bytes) {
        let Some(dissector) = self.get(id) else {
            tracing::debug!(protocol = id.name(), "no dissector registered, dropping");
            return;
        };
        match dissector.dissect(packet, payload) {
            DissectResult::Done => {}
            DissectResult::Continue(leftover) => self.next(dissector, packet, leftover),
            DissectResult::NotMine(_) => {
                tracing::trace!(protocol = id.name(), "payload not recognized");
            }
        }
    }

    /// Call each of `current`'s sub-dissectors in order on `data` until one
    /// consumes it or the list is exhausted.
    fn next(&self, current: &dyn Dissector, packet: &Packet, data: bytes::Bytes) {
        let mut data = data;
        for &sub_id in current.subdissectors() {
            let Some(sub) = self.get(sub_id) else {
                continue;
            };
            match sub.dissect(packet, data.clone()) {
                DissectResult::Done => return,
                DissectResult::Continue(leftover) => {
                    self.next(sub, packet, leftover);
                    return;
                }
                DissectResult::NotMine(returned) => {
                    data = returned;
                }
            }
        }
    }
}
