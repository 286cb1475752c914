//! Link dissector (C4): strips the link-layer header for a variety of PCAP
//! DLT values, accounting for an 802.1Q VLAN tag, then forwards to IP.
//!
//! Grounded on `original_source/src/packet/packet_link.c`.

use bytes::Bytes;

use super::{DissectResult, Dissector};
use crate::packet::{Packet, ProtocolId};

/// PCAP DLT (data link type) values this dissector understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dlt {
    En10mb,
    Ieee802,
    Loop,
    Slip,
    Ppp,
    Raw,
    Fddi,
    Enc,
    LinuxSll,
    Ipnet,
    Nflog,
    /// Any DLT value this dissector doesn't recognize; the numeric value
    /// is kept for diagnostics.
    Unknown(u32),
}

impl Dlt {
    /// Map a raw PCAP `linktype` field to our enum.
    pub fn from_raw(linktype: u32) -> Self {
        match linktype {
            1 => Dlt::En10mb,
            6 => Dlt::Ieee802,
            0 => Dlt::Loop,
            8 | 15 => Dlt::Slip,
            9 | 50 | 51 | 107 => Dlt::Ppp,
            12 | 101 => Dlt::Raw,
            10 => Dlt::Fddi,
            109 => Dlt::Enc,
            113 => Dlt::LinuxSll,
            226 => Dlt::Ipnet,
            239 => Dlt::Nflog,
            other => Dlt::Unknown(other),
        }
    }
}

const ETHERTYPE_VLAN: u16 = 0x8100;
const NFULA_PAYLOAD: u16 = 9;

/// Walk NFLOG TLVs until the payload attribute, returning the header size
/// (4-byte base + every TLV preceding the payload, each length aligned up
/// to 4 bytes).
fn nflog_header_len(data: &[u8]) -> Option<usize> {
    let mut offset = 4usize; // nflog base header
    while offset + 4 <= data.len() {
        let tlv_len = u16::from_ne_bytes([data[offset], data[offset + 1]]) as usize;
        let tlv_type = u16::from_ne_bytes([data[offset + 2], data[offset + 3]]) & 0x7fff;
        if tlv_len < 4 {
            return None;
        }
        if tlv_type == NFULA_PAYLOAD {
            return Some(offset + 4);
        }
        offset += (tlv_len + 3) & !3;
    }
    None
}

/// Fixed or TLV-derived link header size, before VLAN adjustment.
fn base_header_len(dlt: Dlt, data: &[u8]) -> Option<usize> {
    match dlt {
        Dlt::En10mb => Some(14),
        Dlt::Ieee802 => Some(22),
        Dlt::Loop => Some(4),
        Dlt::Slip => Some(16),
        Dlt::Ppp => Some(4),
        Dlt::Raw => Some(0),
        Dlt::Fddi => Some(21),
        Dlt::Enc => Some(12),
        Dlt::LinuxSll => Some(16),
        Dlt::Ipnet => Some(24),
        Dlt::Nflog => nflog_header_len(data),
        Dlt::Unknown(_) => None,
    }
}

/// Whether this DLT's ether-type field sits immediately before the payload
/// and should be checked for a VLAN tag (only Ethernet-framed DLTs carry
/// one at a fixed offset).
fn vlan_ethertype_offset(dlt: Dlt) -> Option<usize> {
    match dlt {
        Dlt::En10mb => Some(12),
        Dlt::LinuxSll => Some(14),
        _ => None,
    }
}

/// Parsed link-layer metadata attached to a packet.
#[derive(Debug, Clone)]
pub struct LinkData {
    pub dlt: Dlt,
    pub header_len: usize,
    pub vlan_tagged: bool,
}

pub struct LinkDissector;

impl LinkDissector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LinkDissector {
    fn default() -> Self {
        Self::new()
    }
}

impl Dissector for LinkDissector {
    fn id(&self) -> ProtocolId {
        ProtocolId::Link
    }

    fn subdissectors(&self) -> &[ProtocolId] {
        &[ProtocolId::Ip]
    }

    fn dissect(&self, packet: &Packet, payload: Bytes) -> DissectResult {
        let dlt = packet.dlt();
        let Dlt::Unknown(raw) = dlt else {
            let Some(mut header_len) = base_header_len(dlt, &payload) else {
                tracing::debug!(dlt = ?dlt, "malformed link header, dropping");
                return DissectResult::Done;
            };

            let mut vlan_tagged = false;
            if let Some(offset) = vlan_ethertype_offset(dlt) {
                if payload.len() >= offset + 2 {
                    let ethertype = u16::from_be_bytes([payload[offset], payload[offset + 1]]);
                    if ethertype == ETHERTYPE_VLAN {
                        vlan_tagged = true;
                        header_len += 4;
                    }
                }
            }

            if payload.len() < header_len {
                tracing::debug!(dlt = ?dlt, "frame shorter than link header, dropping");
                return DissectResult::Done;
            }

            packet.set_protocol_data(
                ProtocolId::Link,
                crate::packet::ProtoData::Link(LinkData {
                    dlt,
                    header_len,
                    vlan_tagged,
                }),
            );

            return DissectResult::Continue(payload.slice(header_len..));
        };

        tracing::debug!(dlt = raw, "unknown DLT, dropping packet");
        DissectResult::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dlt_from_raw_maps_known_values() {
        assert_eq!(Dlt::from_raw(1), Dlt::En10mb);
        assert_eq!(Dlt::from_raw(113), Dlt::LinuxSll);
        assert!(matches!(Dlt::from_raw(9999), Dlt::Unknown(9999)));
    }

    #[test]
    fn nflog_header_walks_to_payload() {
        // base(4) + one TLV of len 8 type 1 + payload TLV marker.
        let mut data = vec![0u8; 4];
        data.extend_from_slice(&8u16.to_ne_bytes()); // tlv len
        data.extend_from_slice(&1u16.to_ne_bytes()); // tlv type
        data.extend_from_slice(&[0u8; 4]); // tlv value (aligned to 8)
        data.extend_from_slice(&4u16.to_ne_bytes()); // payload tlv len
        data.extend_from_slice(&NFULA_PAYLOAD.to_ne_bytes());
        assert_eq!(nflog_header_len(&data), Some(4 + 8 + 4));
    }

    #[test]
    fn ethernet_plus_vlan_is_eighteen_bytes() {
        assert_eq!(base_header_len(Dlt::En10mb, &[]), Some(14));
        assert_eq!(vlan_ethertype_offset(Dlt::En10mb), Some(12));
    }
}
