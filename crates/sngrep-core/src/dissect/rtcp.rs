//! RTCP dissector (C8): sender/receiver report recognition and Extended
//! Report (XR) VoIP Metrics extraction.
//!
//! Grounded on `original_source/src/storage/packet/packet_rtcp.c`.

use bytes::Bytes;

use super::{DissectResult, Dissector};
use crate::packet::{Packet, ProtoData, ProtocolId};

pub const PT_SR: u8 = 200;
pub const PT_RR: u8 = 201;
pub const PT_SDES: u8 = 202;
pub const PT_BYE: u8 = 203;
pub const PT_APP: u8 = 204;
pub const PT_XR: u8 = 207;

const XR_BLOCK_TYPE_VOIP_METRICS: u8 = 7;

/// RFC 3611 §4.7 VoIP Metrics report block, the fields the original's
/// call-quality view surfaces.
#[derive(Debug, Clone, Copy)]
pub struct VoipMetrics {
    pub loss_rate: u8,
    pub discard_rate: u8,
    pub burst_density: u8,
    pub gap_density: u8,
    pub round_trip_delay_ms: u16,
    pub end_system_delay_ms: u16,
    pub mos_lq: Option<f32>,
    pub mos_cq: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct RtcpData {
    pub packet_type: u8,
    pub ssrc: u32,
    pub voip_metrics: Option<VoipMetrics>,
}

fn parse_xr_voip_metrics(blocks: &[u8]) -> Option<VoipMetrics> {
    let mut offset = 0usize;
    while offset + 4 <= blocks.len() {
        let block_type = blocks[offset];
        let block_words = u16::from_be_bytes([blocks[offset + 2], blocks[offset + 3]]) as usize;
        let block_len = (block_words + 1) * 4;
        if offset + block_len > blocks.len() {
            break;
        }
        if block_type == XR_BLOCK_TYPE_VOIP_METRICS && block_len >= 36 {
            let b = &blocks[offset..offset + block_len];
            let mos_lq = (b[28] != 127).then(|| b[28] as f32 / 10.0);
            let mos_cq = (b[29] != 127).then(|| b[29] as f32 / 10.0);
            return Some(VoipMetrics {
                loss_rate: b[8],
                discard_rate: b[9],
                burst_density: b[10],
                gap_density: b[11],
                round_trip_delay_ms: u16::from_be_bytes([b[16], b[17]]),
                end_system_delay_ms: u16::from_be_bytes([b[18], b[19]]),
                mos_lq,
                mos_cq,
            });
        }
        offset += block_len;
    }
    None
}

pub struct RtcpDissector;

impl RtcpDissector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RtcpDissector {
    fn default() -> Self {
        Self::new()
    }
}

impl Dissector for RtcpDissector {
    fn id(&self) -> ProtocolId {
        ProtocolId::Rtcp
    }

    fn dissect(&self, packet: &Packet, payload: Bytes) -> DissectResult {
        // RTCP packets travel as a compound: walk every sub-packet in the
        // payload (RFC 3550 §6.1) rather than stopping at the first one.
        // Only the first sub-packet's fields are surfaced on the packet;
        // a type outside the recognized set still has its announced
        // length consumed without further parsing.
        let mut offset = 0usize;
        let mut primary: Option<(u8, u32, Option<VoipMetrics>)> = None;
        while offset + 8 <= payload.len() {
            let version = payload[offset] >> 6;
            if version != 2 || !(128..=191).contains(&payload[offset]) {
                break;
            }
            let packet_type = payload[offset + 1];
            if !(192..=223).contains(&packet_type) {
                break;
            }
            let length_words =
                u16::from_be_bytes([payload[offset + 2], payload[offset + 3]]) as usize;
            let chunk_len = (length_words + 1) * 4;
            if offset + chunk_len > payload.len() {
                break;
            }
            if primary.is_none() {
                let ssrc = u32::from_be_bytes([
                    payload[offset + 4],
                    payload[offset + 5],
                    payload[offset + 6],
                    payload[offset + 7],
                ]);
                let voip_metrics = if packet_type == PT_XR && chunk_len > 8 {
                    parse_xr_voip_metrics(&payload[offset + 8..offset + chunk_len])
                } else {
                    None
                };
                primary = Some((packet_type, ssrc, voip_metrics));
            }
            offset += chunk_len;
        }

        let Some((packet_type, ssrc, voip_metrics)) = primary else {
            return DissectResult::NotMine(payload);
        };

        packet.set_protocol_data(
            ProtocolId::Rtcp,
            ProtoData::Rtcp(RtcpData {
                packet_type,
                ssrc,
                voip_metrics,
            }),
        );
        DissectResult::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Frame;

    fn xr_packet() -> Vec<u8> {
        let mut h = vec![0u8; 8];
        h[0] = 0x80;
        h[1] = PT_XR;
        let mut block = vec![0u8; 36];
        block[0] = XR_BLOCK_TYPE_VOIP_METRICS;
        block[2..4].copy_from_slice(&8u16.to_be_bytes()); // (36/4)-1 = 8
        block[8] = 5; // loss rate
        block[16..18].copy_from_slice(&40u16.to_be_bytes()); // rtt
        block[28] = 42; // mos-lq *10
        block[29] = 127; // mos-cq unavailable
        let total_words = ((8 + block.len()) / 4) as u16 - 1;
        h[2..4].copy_from_slice(&total_words.to_be_bytes());
        h[4..8].copy_from_slice(&0x1234u32.to_be_bytes());
        h.extend_from_slice(&block);
        h
    }

    #[test]
    fn parses_xr_voip_metrics() {
        let diss = RtcpDissector::new();
        let packet = Packet::new("t", crate::dissect::link::Dlt::Raw, Frame::new(1, vec![]));
        let result = diss.dissect(&packet, Bytes::from(xr_packet()));
        assert!(matches!(result, DissectResult::Done));
        let Some(ProtoData::Rtcp(data)) = packet.protocol_data(ProtocolId::Rtcp) else {
            panic!("missing rtcp data");
        };
        assert_eq!(data.packet_type, PT_XR);
        let metrics = data.voip_metrics.expect("voip metrics present");
        assert_eq!(metrics.loss_rate, 5);
        assert_eq!(metrics.round_trip_delay_ms, 40);
        assert_eq!(metrics.mos_lq, Some(4.2));
        assert_eq!(metrics.mos_cq, None);
    }

    #[test]
    fn accepts_full_192_to_223_packet_type_range() {
        let diss = RtcpDissector::new();
        let packet = Packet::new("t", crate::dissect::link::Dlt::Raw, Frame::new(1, vec![]));
        let mut pkt = vec![0u8; 8];
        pkt[0] = 0x80;
        pkt[1] = 199; // legal per RFC 5761, but not one of the named PT_* constants
        let result = diss.dissect(&packet, Bytes::from(pkt));
        assert!(matches!(result, DissectResult::Done));
        let Some(ProtoData::Rtcp(data)) = packet.protocol_data(ProtocolId::Rtcp) else {
            panic!("missing rtcp data");
        };
        assert_eq!(data.packet_type, 199);
    }

    #[test]
    fn rejects_packet_type_outside_rtcp_range() {
        let diss = RtcpDissector::new();
        let packet = Packet::new("t", crate::dissect::link::Dlt::Raw, Frame::new(1, vec![]));
        let mut bogus = vec![0u8; 8];
        bogus[0] = 0x80;
        bogus[1] = 100;
        assert!(matches!(
            diss.dissect(&packet, Bytes::from(bogus)),
            DissectResult::NotMine(_)
        ));
    }

    #[test]
    fn walks_compound_packet_past_first_subpacket() {
        let diss = RtcpDissector::new();
        let packet = Packet::new("t", crate::dissect::link::Dlt::Raw, Frame::new(1, vec![]));
        let mut compound = vec![0u8; 8];
        compound[0] = 0x80;
        compound[1] = PT_SR;
        compound[2..4].copy_from_slice(&1u16.to_be_bytes()); // (1+1)*4 = 8 bytes
        compound[4..8].copy_from_slice(&0x1111u32.to_be_bytes());
        compound.extend_from_slice(&xr_packet());

        let result = diss.dissect(&packet, Bytes::from(compound));
        assert!(matches!(result, DissectResult::Done));
        let Some(ProtoData::Rtcp(data)) = packet.protocol_data(ProtocolId::Rtcp) else {
            panic!("missing rtcp data");
        };
        assert_eq!(data.packet_type, PT_SR);
        assert_eq!(data.ssrc, 0x1111);
    }
}
