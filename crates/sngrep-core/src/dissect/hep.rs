//! HEP3 dissector (C7): decodes Homer Encapsulation Protocol chunks and
//! synthesizes the IP/UDP context the SIP dissector expects.
//!
//! Grounded on `original_source/src/storage/packet/packet_hep.c`.

use std::net::IpAddr;

use bytes::Bytes;

use super::{DissectResult, Dissector};
use crate::config::CaptureConfig;
use crate::dissect::ip::IpData;
use crate::dissect::udp::UdpData;
use crate::packet::{Packet, ProtoData, ProtocolId};

const HEP_MAGIC: &[u8; 4] = b"HEP3";

const CHUNK_IP_FAMILY: u16 = 1;
const CHUNK_IP_PROTOCOL: u16 = 2;
const CHUNK_IPV4_SRC: u16 = 3;
const CHUNK_IPV4_DST: u16 = 4;
const CHUNK_IPV6_SRC: u16 = 5;
const CHUNK_IPV6_DST: u16 = 6;
const CHUNK_SRC_PORT: u16 = 7;
const CHUNK_DST_PORT: u16 = 8;
const CHUNK_TS_SEC: u16 = 9;
const CHUNK_TS_USEC: u16 = 10;
const CHUNK_CAPTURE_PROTO: u16 = 11;
const CHUNK_AUTH_KEY: u16 = 14;
const CHUNK_PAYLOAD: u16 = 15;

/// Parsed HEP3 chunk set relevant to reconstructing the encapsulated
/// packet's network context.
#[derive(Debug, Clone)]
pub struct HepData {
    pub src: Option<IpAddr>,
    pub dst: Option<IpAddr>,
    pub src_port: u16,
    pub dst_port: u16,
    pub ip_protocol: u8,
    pub capture_proto: u8,
    pub timestamp_usec: Option<u64>,
}

struct Chunk<'a> {
    vendor: u16,
    kind: u16,
    value: &'a [u8],
}

fn walk_chunks(data: &[u8]) -> Vec<Chunk<'_>> {
    let mut chunks = Vec::new();
    let mut offset = 0usize;
    while offset + 6 <= data.len() {
        let vendor = u16::from_be_bytes([data[offset], data[offset + 1]]);
        let kind = u16::from_be_bytes([data[offset + 2], data[offset + 3]]);
        let len = u16::from_be_bytes([data[offset + 4], data[offset + 5]]) as usize;
        if len < 6 || offset + len > data.len() {
            break;
        }
        chunks.push(Chunk {
            vendor,
            kind,
            value: &data[offset + 6..offset + len],
        });
        offset += len;
    }
    chunks
}

pub struct HepDissector {
    auth_key: Option<String>,
}

impl HepDissector {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            auth_key: config.hep_auth_key.clone(),
        }
    }
}

impl Dissector for HepDissector {
    fn id(&self) -> ProtocolId {
        ProtocolId::Hep
    }

    fn subdissectors(&self) -> &[ProtocolId] {
        &[ProtocolId::Sip]
    }

    fn dissect(&self, packet: &Packet, payload: Bytes) -> DissectResult {
        if payload.len() < 6 || &payload[0..4] != HEP_MAGIC {
            tracing::debug!("missing HEP3 magic, dropping");
            return DissectResult::Done;
        }
        let chunks = walk_chunks(&payload[6..]);

        let mut src = None;
        let mut dst = None;
        let mut src_port = 0u16;
        let mut dst_port = 0u16;
        let mut ip_protocol = 17u8;
        let mut capture_proto = 1u8;
        let mut ts_sec: Option<u32> = None;
        let mut ts_usec: Option<u32> = None;
        let mut auth_ok = self.auth_key.is_none();
        let mut payload_chunk: Option<&[u8]> = None;

        for chunk in &chunks {
            match (chunk.vendor, chunk.kind) {
                (0, CHUNK_IP_FAMILY) => {}
                (0, CHUNK_IP_PROTOCOL) => {
                    if let Some(&b) = chunk.value.first() {
                        ip_protocol = b;
                    }
                }
                (0, CHUNK_IPV4_SRC) if chunk.value.len() == 4 => {
                    src = Some(IpAddr::from(<[u8; 4]>::try_from(chunk.value).unwrap()));
                }
                (0, CHUNK_IPV4_DST) if chunk.value.len() == 4 => {
                    dst = Some(IpAddr::from(<[u8; 4]>::try_from(chunk.value).unwrap()));
                }
                (0, CHUNK_IPV6_SRC) if chunk.value.len() == 16 => {
                    src = Some(IpAddr::from(<[u8; 16]>::try_from(chunk.value).unwrap()));
                }
                (0, CHUNK_IPV6_DST) if chunk.value.len() == 16 => {
                    dst = Some(IpAddr::from(<[u8; 16]>::try_from(chunk.value).unwrap()));
                }
                (0, CHUNK_SRC_PORT) if chunk.value.len() == 2 => {
                    src_port = u16::from_be_bytes([chunk.value[0], chunk.value[1]]);
                }
                (0, CHUNK_DST_PORT) if chunk.value.len() == 2 => {
                    dst_port = u16::from_be_bytes([chunk.value[0], chunk.value[1]]);
                }
                (0, CHUNK_TS_SEC) if chunk.value.len() == 4 => {
                    ts_sec = Some(u32::from_be_bytes(chunk.value.try_into().unwrap()));
                }
                (0, CHUNK_TS_USEC) if chunk.value.len() == 4 => {
                    ts_usec = Some(u32::from_be_bytes(chunk.value.try_into().unwrap()));
                }
                (0, CHUNK_CAPTURE_PROTO) => {
                    if let Some(&b) = chunk.value.first() {
                        capture_proto = b;
                    }
                }
                (0, CHUNK_AUTH_KEY) => {
                    if let Some(expected) = &self.auth_key {
                        auth_ok = std::str::from_utf8(chunk.value)
                            .map(|v| v == expected)
                            .unwrap_or(false);
                    }
                }
                (0, CHUNK_PAYLOAD) => {
                    payload_chunk = Some(chunk.value);
                }
                _ => {}
            }
        }

        if !auth_ok {
            tracing::debug!("HEP3 auth key mismatch, dropping");
            return DissectResult::Done;
        }
        let Some(body) = payload_chunk else {
            tracing::debug!("HEP3 packet missing payload chunk, dropping");
            return DissectResult::Done;
        };

        let timestamp_usec = match (ts_sec, ts_usec) {
            (Some(sec), Some(usec)) => Some(crate::time::from_sec_usec(sec, usec)),
            _ => None,
        };
        if let Some(ts) = timestamp_usec {
            packet.override_last_frame_timestamp(ts);
        }

        packet.set_protocol_data(
            ProtocolId::Hep,
            ProtoData::Hep(HepData {
                src,
                dst,
                src_port,
                dst_port,
                ip_protocol,
                capture_proto,
                timestamp_usec,
            }),
        );

        if let (Some(src), Some(dst)) = (src, dst) {
            packet.set_protocol_data(
                ProtocolId::Ip,
                ProtoData::Ip(IpData {
                    version: if src.is_ipv6() { 6 } else { 4 },
                    protocol: ip_protocol,
                    src,
                    dst,
                    header_len: 0,
                    total_len: body.len(),
                    reassembled: false,
                }),
            );
        }
        packet.set_protocol_data(
            ProtocolId::Udp,
            ProtoData::Udp(UdpData {
                src_port,
                dst_port,
                length: body.len() as u16,
            }),
        );

        // capture_proto 1 == SIP in the HEP3 vocabulary; anything else is
        // outside this pipeline's scope for now.
        if capture_proto != 1 {
            tracing::trace!(capture_proto, "HEP3 payload is not SIP, dropping");
            return DissectResult::Done;
        }

        DissectResult::Continue(Bytes::copy_from_slice(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Frame;

    fn chunk(vendor: u16, kind: u16, value: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&vendor.to_be_bytes());
        out.extend_from_slice(&kind.to_be_bytes());
        out.extend_from_slice(&((6 + value.len()) as u16).to_be_bytes());
        out.extend_from_slice(value);
        out
    }

    fn hep_packet(auth: Option<&str>) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(HEP_MAGIC);
        body.extend_from_slice(&[0u8; 2]); // length placeholder, unused by our parser
        body.extend(chunk(0, CHUNK_IP_PROTOCOL, &[17]));
        body.extend(chunk(0, CHUNK_IPV4_SRC, &[10, 0, 0, 1]));
        body.extend(chunk(0, CHUNK_IPV4_DST, &[10, 0, 0, 2]));
        body.extend(chunk(0, CHUNK_SRC_PORT, &5060u16.to_be_bytes()));
        body.extend(chunk(0, CHUNK_DST_PORT, &5060u16.to_be_bytes()));
        body.extend(chunk(0, CHUNK_CAPTURE_PROTO, &[1]));
        if let Some(key) = auth {
            body.extend(chunk(0, CHUNK_AUTH_KEY, key.as_bytes()));
        }
        let sip = b"OPTIONS sip:x SIP/2.0\r\nCall-ID: a\r\n\r\n";
        body.extend(chunk(0, CHUNK_PAYLOAD, sip));
        body
    }

    #[test]
    fn decodes_chunks_and_forwards_sip_payload() {
        let diss = HepDissector::new(&CaptureConfig::default());
        let packet = Packet::new("t", crate::dissect::link::Dlt::Raw, Frame::new(1, vec![]));
        let result = diss.dissect(&packet, Bytes::from(hep_packet(None)));
        assert!(matches!(result, DissectResult::Continue(_)));
        assert!(packet.has_protocol(ProtocolId::Ip));
        assert!(packet.has_protocol(ProtocolId::Udp));
    }

    #[test]
    fn auth_key_mismatch_drops_packet() {
        let mut config = CaptureConfig::default();
        config.hep_auth_key = Some("secret".to_string());
        let diss = HepDissector::new(&config);
        let packet = Packet::new("t", crate::dissect::link::Dlt::Raw, Frame::new(1, vec![]));
        let result = diss.dissect(&packet, Bytes::from(hep_packet(Some("wrong"))));
        assert!(matches!(result, DissectResult::Done));
        assert!(!packet.has_protocol(ProtocolId::Ip));
    }

    #[test]
    fn auth_key_match_forwards() {
        let mut config = CaptureConfig::default();
        config.hep_auth_key = Some("secret".to_string());
        let diss = HepDissector::new(&config);
        let packet = Packet::new("t", crate::dissect::link::Dlt::Raw, Frame::new(1, vec![]));
        let result = diss.dissect(&packet, Bytes::from(hep_packet(Some("secret"))));
        assert!(matches!(result, DissectResult::Continue(_)));
    }
}
