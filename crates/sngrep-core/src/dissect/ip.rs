//! IP dissector (C4): IPv4/IPv6 header parsing and IPv4 fragment
//! reassembly.
//!
//! Grounded on `original_source/src/storage/packet/packet_ip.c` and
//! `packet_ip.h` (fragment table keyed by `(src, dst, id)`, age-based GC).

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;

use super::{DissectResult, Dissector};
use crate::config::CaptureConfig;
use crate::packet::{Packet, ProtoData, ProtocolId};

/// Parsed IP header fields attached to a packet.
#[derive(Debug, Clone)]
pub struct IpData {
    pub version: u8,
    pub protocol: u8,
    pub src: IpAddr,
    pub dst: IpAddr,
    pub header_len: usize,
    pub total_len: usize,
    pub reassembled: bool,
}

impl IpData {
    pub fn is_udp(&self) -> bool {
        self.protocol == 17
    }

    pub fn is_tcp(&self) -> bool {
        self.protocol == 6
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct DatagramKey {
    src: IpAddr,
    dst: IpAddr,
    id: u16,
    protocol: u8,
}

struct Fragment {
    offset: usize,
    payload: Vec<u8>,
}

struct Datagram {
    fragments: Vec<Fragment>,
    total_len: Option<usize>,
    contributors: Vec<Packet>,
    last_seen_usec: u64,
}

/// IPv4/IPv6 header parsing plus IPv4 fragment reassembly.
pub struct IpDissector {
    fragment_max_age: Duration,
    table: Mutex<HashMap<DatagramKey, Datagram>>,
}

impl IpDissector {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            fragment_max_age: config.ip_fragment_max_age,
            table: Mutex::new(HashMap::new()),
        }
    }

    fn parse_v4(data: &[u8]) -> Option<(IpData, usize, bool, usize)> {
        if data.len() < 20 {
            return None;
        }
        let ihl = (data[0] & 0x0f) as usize * 4;
        if ihl < 20 || data.len() < ihl {
            return None;
        }
        let total_len = u16::from_be_bytes([data[2], data[3]]) as usize;
        let id = u16::from_be_bytes([data[4], data[5]]);
        let flags_frag = u16::from_be_bytes([data[6], data[7]]);
        let more_fragments = flags_frag & 0x2000 != 0;
        let frag_offset = (flags_frag & 0x1fff) as usize * 8;
        let protocol = data[9];
        let src = IpAddr::from([data[12], data[13], data[14], data[15]]);
        let dst = IpAddr::from([data[16], data[17], data[18], data[19]]);
        let fragmented = more_fragments || frag_offset != 0;
        Some((
            IpData {
                version: 4,
                protocol,
                src,
                dst,
                header_len: ihl,
                total_len: total_len.max(ihl),
                reassembled: false,
            },
            ihl,
            fragmented,
            frag_offset,
        ))
    }

    fn parse_v6(data: &[u8]) -> Option<(IpData, usize)> {
        if data.len() < 40 {
            return None;
        }
        let payload_len = u16::from_be_bytes([data[4], data[5]]) as usize;
        let next_header = data[6];
        let src = IpAddr::from(<[u8; 16]>::try_from(&data[8..24]).ok()?);
        let dst = IpAddr::from(<[u8; 16]>::try_from(&data[24..40]).ok()?);
        Some((
            IpData {
                version: 6,
                protocol: next_header,
                src,
                dst,
                header_len: 40,
                total_len: 40 + payload_len,
                reassembled: false,
            },
            40,
        ))
    }

    /// Drop fragment entries whose newest fragment is older than our GC
    /// window, mirroring the periodic sweep TCP reassembly uses (spec §4.4).
    fn gc(&self, table: &mut HashMap<DatagramKey, Datagram>, now_usec: u64) {
        let max_age_usec = self.fragment_max_age.as_micros() as u64;
        table.retain(|_, datagram| {
            now_usec.saturating_sub(datagram.last_seen_usec) <= max_age_usec
        });
    }

    /// Drop every buffered fragment entry. Used by
    /// [`crate::CaptureEngine::clear_all`] so no fragment outlives a
    /// storage-level `clear_all()`.
    pub fn clear_reassembly(&self) {
        self.table.lock().unwrap().clear();
    }
}

impl Dissector for IpDissector {
    fn id(&self) -> ProtocolId {
        ProtocolId::Ip
    }

    fn subdissectors(&self) -> &[ProtocolId] {
        &[ProtocolId::Udp, ProtocolId::Tcp]
    }

    fn dissect(&self, packet: &Packet, payload: Bytes) -> DissectResult {
        if payload.is_empty() {
            return DissectResult::Done;
        }
        let version = payload[0] >> 4;

        if version == 6 {
            let Some((data, header_len)) = Self::parse_v6(&payload) else {
                tracing::debug!("malformed ipv6 header, dropping");
                return DissectResult::Done;
            };
            let end = data.total_len.min(payload.len());
            packet.set_protocol_data(ProtocolId::Ip, ProtoData::Ip(data));
            return DissectResult::Continue(payload.slice(header_len..end));
        }

        if version != 4 {
            tracing::debug!(version, "unsupported ip version, dropping");
            return DissectResult::Done;
        }

        let Some((data, header_len, fragmented, frag_offset)) = Self::parse_v4(&payload) else {
            tracing::debug!("malformed ipv4 header, dropping");
            return DissectResult::Done;
        };

        let ip_end = data.total_len.min(payload.len());
        let ip_payload = payload.slice(header_len..ip_end);

        if !fragmented {
            packet.set_protocol_data(ProtocolId::Ip, ProtoData::Ip(data));
            return DissectResult::Continue(ip_payload);
        }

        let more_fragments = {
            let raw = u16::from_be_bytes([payload[6], payload[7]]);
            raw & 0x2000 != 0
        };
        let id = u16::from_be_bytes([payload[4], payload[5]]);
        let key = DatagramKey {
            src: data.src,
            dst: data.dst,
            id,
            protocol: data.protocol,
        };

        let now = packet.time();
        let mut table = self.table.lock().unwrap();
        self.gc(&mut table, now);

        let datagram = table.entry(key).or_insert_with(|| Datagram {
            fragments: Vec::new(),
            total_len: None,
            contributors: Vec::new(),
            last_seen_usec: now,
        });
        datagram.last_seen_usec = now;
        datagram.fragments.push(Fragment {
            offset: frag_offset,
            payload: ip_payload.to_vec(),
        });
        if !more_fragments {
            datagram.total_len = Some(frag_offset + ip_payload.len());
        }
        datagram.contributors.push(packet.clone());

        let Some(total_len) = datagram.total_len else {
            return DissectResult::Done;
        };
        let mut received: usize = datagram.fragments.iter().map(|f| f.payload.len()).sum();
        // Overlapping retransmitted fragments would double count; cap at total_len.
        received = received.min(total_len);
        if received < total_len {
            return DissectResult::Done;
        }

        let mut datagram = table.remove(&key).unwrap();
        drop(table);

        datagram.fragments.sort_by_key(|f| f.offset);
        let mut reassembled = vec![0u8; total_len];
        for fragment in &datagram.fragments {
            let end = (fragment.offset + fragment.payload.len()).min(total_len);
            if fragment.offset >= end {
                continue;
            }
            reassembled[fragment.offset..end]
                .copy_from_slice(&fragment.payload[..end - fragment.offset]);
        }

        for contributor in &datagram.contributors {
            if !contributor.is_same(packet) {
                packet.absorb_frames_from(contributor);
            }
        }

        let mut data = data;
        data.reassembled = true;
        data.total_len = header_len + total_len;
        packet.set_protocol_data(ProtocolId::Ip, ProtoData::Ip(data));
        DissectResult::Continue(Bytes::from(reassembled))
    }
}
