//! TLS dissector (C6b style recognition, not decryption).
//!
//! TLS is recognized by its record header (content-type + version) so a TCP
//! stream carrying SIP-over-TLS can be tagged, but no decryption or
//! handshake parsing is attempted.

use bytes::Bytes;

use super::{DissectResult, Dissector};
use crate::packet::{Packet, ProtoData, ProtocolId};

const CONTENT_TYPE_CHANGE_CIPHER_SPEC: u8 = 20;
const CONTENT_TYPE_ALERT: u8 = 21;
const CONTENT_TYPE_HANDSHAKE: u8 = 22;
const CONTENT_TYPE_APPLICATION_DATA: u8 = 23;

pub struct TlsDissector;

impl TlsDissector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TlsDissector {
    fn default() -> Self {
        Self::new()
    }
}

impl Dissector for TlsDissector {
    fn id(&self) -> ProtocolId {
        ProtocolId::Tls
    }

    fn dissect(&self, packet: &Packet, payload: Bytes) -> DissectResult {
        if payload.len() < 5 {
            return DissectResult::NotMine(payload);
        }
        let content_type = payload[0];
        if !matches!(
            content_type,
            CONTENT_TYPE_CHANGE_CIPHER_SPEC
                | CONTENT_TYPE_ALERT
                | CONTENT_TYPE_HANDSHAKE
                | CONTENT_TYPE_APPLICATION_DATA
        ) {
            return DissectResult::NotMine(payload);
        }
        let major = payload[1];
        let minor = payload[2];
        if major != 3 || !(1..=4).contains(&minor) {
            return DissectResult::NotMine(payload);
        }

        packet.set_protocol_data(ProtocolId::Tls, ProtoData::Tls);
        DissectResult::Done
    }
}
