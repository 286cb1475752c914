//! Packet object & frame list (C2).

mod frame;
mod packet;

pub use frame::Frame;
pub use packet::{Packet, ProtoData};

/// Protocol identifiers a dissector chain may attach parse results under.
///
/// A packet carries at most one entry per id (spec §3): a later dissector
/// in the same chain replaces, rather than appends to, an earlier result
/// for the same protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProtocolId {
    Link,
    Ip,
    Udp,
    Tcp,
    Tls,
    Ws,
    Sip,
    Sdp,
    Rtp,
    Rtcp,
    Hep,
}

impl ProtocolId {
    /// Stable short name, used in log messages and diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            ProtocolId::Link => "link",
            ProtocolId::Ip => "ip",
            ProtocolId::Udp => "udp",
            ProtocolId::Tcp => "tcp",
            ProtocolId::Tls => "tls",
            ProtocolId::Ws => "ws",
            ProtocolId::Sip => "sip",
            ProtocolId::Sdp => "sdp",
            ProtocolId::Rtp => "rtp",
            ProtocolId::Rtcp => "rtcp",
            ProtocolId::Hep => "hep",
        }
    }
}
