//! RTP dissector (C8): header validation and RFC 3551 static payload type
//! lookup.
//!
//! Grounded on `original_source/src/storage/packet/packet_rtp.c`. RTP has
//! no self-describing magic; recognition is version/header-shape
//! validation only, the same heuristic the original uses before handing a
//! packet to storage for stream correlation.

use bytes::Bytes;

use super::{DissectResult, Dissector};
use crate::packet::{Packet, ProtoData, ProtocolId};

/// RFC 3551 §6 static payload type assignments.
fn static_payload_name(pt: u8) -> Option<&'static str> {
    Some(match pt {
        0 => "PCMU",
        3 => "GSM",
        4 => "G723",
        5 => "DVI4/8000",
        6 => "DVI4/16000",
        7 => "LPC",
        8 => "PCMA",
        9 => "G722",
        10 => "L16/44100/2",
        11 => "L16/44100/1",
        12 => "QCELP",
        13 => "CN",
        14 => "MPA",
        15 => "G728",
        16 => "DVI4/11025",
        17 => "DVI4/22050",
        18 => "G729",
        25 => "CelB",
        26 => "JPEG",
        28 => "nv",
        31 => "H261",
        32 => "MPV",
        33 => "MP2T",
        34 => "H263",
        _ => return None,
    })
}

#[derive(Debug, Clone)]
pub struct RtpData {
    pub version: u8,
    pub marker: bool,
    pub payload_type: u8,
    pub payload_type_name: Option<&'static str>,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

pub struct RtpDissector;

impl RtpDissector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RtpDissector {
    fn default() -> Self {
        Self::new()
    }
}

impl Dissector for RtpDissector {
    fn id(&self) -> ProtocolId {
        ProtocolId::Rtp
    }

    fn dissect(&self, packet: &Packet, payload: Bytes) -> DissectResult {
        if payload.len() < 12 {
            return DissectResult::NotMine(payload);
        }
        let version = payload[0] >> 6;
        if version != 2 {
            return DissectResult::NotMine(payload);
        }
        let padding = payload[0] & 0x20 != 0;
        let extension = payload[0] & 0x10 != 0;
        let csrc_count = (payload[0] & 0x0f) as usize;
        let marker = payload[1] & 0x80 != 0;
        let payload_type = payload[1] & 0x7f;

        // RTP payload types are 0-64 or 96-127 (RFC 3551 §6); 65-95 is
        // reserved for RTCP's packet-type byte, so the chain's RTCP
        // dissector gets first refusal there.
        if !(payload_type <= 64 || payload_type >= 96) {
            return DissectResult::NotMine(payload);
        }

        let header_len = 12 + csrc_count * 4;
        if payload.len() < header_len {
            return DissectResult::NotMine(payload);
        }
        let mut ext_len = 0usize;
        if extension {
            if payload.len() < header_len + 4 {
                return DissectResult::NotMine(payload);
            }
            let words = u16::from_be_bytes([payload[header_len + 2], payload[header_len + 3]]);
            ext_len = 4 + words as usize * 4;
            if payload.len() < header_len + ext_len {
                return DissectResult::NotMine(payload);
            }
        }
        let _ = padding;

        let sequence = u16::from_be_bytes([payload[2], payload[3]]);
        let timestamp = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
        let ssrc = u32::from_be_bytes([payload[8], payload[9], payload[10], payload[11]]);

        packet.set_protocol_data(
            ProtocolId::Rtp,
            ProtoData::Rtp(RtpData {
                version,
                marker,
                payload_type,
                payload_type_name: static_payload_name(payload_type),
                sequence,
                timestamp,
                ssrc,
            }),
        );
        DissectResult::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Frame;

    fn rtp_packet(pt: u8) -> Vec<u8> {
        let mut h = vec![0u8; 12];
        h[0] = 0x80; // version 2, no padding/extension/csrc
        h[1] = pt;
        h[2..4].copy_from_slice(&1u16.to_be_bytes());
        h[4..8].copy_from_slice(&1000u32.to_be_bytes());
        h[8..12].copy_from_slice(&0xdead_beefu32.to_be_bytes());
        h
    }

    #[test]
    fn recognizes_pcmu_rtp() {
        let diss = RtpDissector::new();
        let packet = Packet::new("t", crate::dissect::link::Dlt::Raw, Frame::new(1, vec![]));
        let result = diss.dissect(&packet, Bytes::from(rtp_packet(0)));
        assert!(matches!(result, DissectResult::Done));
        let Some(ProtoData::Rtp(data)) = packet.protocol_data(ProtocolId::Rtp) else {
            panic!("missing rtp data");
        };
        assert_eq!(data.payload_type_name, Some("PCMU"));
        assert_eq!(data.ssrc, 0xdead_beef);
    }

    #[test]
    fn rejects_rtcp_reserved_payload_type_range() {
        let diss = RtpDissector::new();
        let packet = Packet::new("t", crate::dissect::link::Dlt::Raw, Frame::new(1, vec![]));
        let bogus = rtp_packet(70);
        assert!(matches!(
            diss.dissect(&packet, Bytes::from(bogus)),
            DissectResult::NotMine(_)
        ));
    }

    #[test]
    fn rejects_non_rtp_version() {
        let diss = RtpDissector::new();
        let packet = Packet::new("t", crate::dissect::link::Dlt::Raw, Frame::new(1, vec![]));
        let mut bogus = rtp_packet(0);
        bogus[0] = 0x40;
        assert!(matches!(
            diss.dissect(&packet, Bytes::from(bogus)),
            DissectResult::NotMine(_)
        ));
    }
}
