//! UDP dissector (C5): header strip and port extraction.
//!
//! Grounded on `original_source/src/storage/packet/packet_udp.c`.

use bytes::Bytes;

use super::{DissectResult, Dissector};
use crate::packet::{Packet, ProtoData, ProtocolId};

#[derive(Debug, Clone, Copy)]
pub struct UdpData {
    pub src_port: u16,
    pub dst_port: u16,
    pub length: u16,
}

pub struct UdpDissector;

impl UdpDissector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for UdpDissector {
    fn default() -> Self {
        Self::new()
    }
}

impl Dissector for UdpDissector {
    fn id(&self) -> ProtocolId {
        ProtocolId::Udp
    }

    fn subdissectors(&self) -> &[ProtocolId] {
        &[ProtocolId::Sip, ProtocolId::Rtp, ProtocolId::Rtcp, ProtocolId::Hep]
    }

    fn dissect(&self, packet: &Packet, payload: Bytes) -> DissectResult {
        let Some(ProtoData::Ip(ip)) = packet.protocol_data(ProtocolId::Ip) else {
            return DissectResult::NotMine(payload);
        };
        if !ip.is_udp() {
            return DissectResult::NotMine(payload);
        }
        if payload.len() < 8 {
            tracing::debug!("udp header truncated, dropping");
            return DissectResult::Done;
        }
        let src_port = u16::from_be_bytes([payload[0], payload[1]]);
        let dst_port = u16::from_be_bytes([payload[2], payload[3]]);
        let length = u16::from_be_bytes([payload[4], payload[5]]);
        packet.set_protocol_data(
            ProtocolId::Udp,
            ProtoData::Udp(UdpData {
                src_port,
                dst_port,
                length,
            }),
        );
        let end = (length as usize).max(8).min(payload.len());
        DissectResult::Continue(payload.slice(8..end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dissect::ip::IpData;
    use crate::packet::Frame;
    use std::net::IpAddr;

    #[test]
    fn extracts_ports_and_forwards_payload() {
        let diss = UdpDissector::new();
        let packet = Packet::new(
            "t",
            crate::dissect::link::Dlt::Raw,
            Frame::new(1, vec![]),
        );
        packet.set_protocol_data(
            ProtocolId::Ip,
            ProtoData::Ip(IpData {
                version: 4,
                protocol: 17,
                src: IpAddr::from([10, 0, 0, 1]),
                dst: IpAddr::from([10, 0, 0, 2]),
                header_len: 20,
                total_len: 28,
                reassembled: false,
            }),
        );
        let mut buf = vec![0x13, 0x88, 0x13, 0xc4]; // 5060 -> 5060
        buf.extend_from_slice(&12u16.to_be_bytes()); // length
        buf.extend_from_slice(&[0u8; 2]); // checksum
        buf.extend_from_slice(b"hi");
        let result = diss.dissect(&packet, Bytes::from(buf));
        match result {
            DissectResult::Continue(data) => assert_eq!(&data[..], b"hi"),
            _ => panic!("expected continue"),
        }
    }

    #[test]
    fn ignores_non_udp_ip() {
        let diss = UdpDissector::new();
        let packet = Packet::new(
            "t",
            crate::dissect::link::Dlt::Raw,
            Frame::new(1, vec![]),
        );
        packet.set_protocol_data(
            ProtocolId::Ip,
            ProtoData::Ip(IpData {
                version: 4,
                protocol: 6,
                src: IpAddr::from([10, 0, 0, 1]),
                dst: IpAddr::from([10, 0, 0, 2]),
                header_len: 20,
                total_len: 28,
                reassembled: false,
            }),
        );
        let result = diss.dissect(&packet, Bytes::from(vec![0u8; 8]));
        assert!(matches!(result, DissectResult::NotMine(_)));
    }
}
