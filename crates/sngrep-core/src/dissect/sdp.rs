//! SDP dissector: pulls the connection address, media descriptions and
//! `rtpmap` payload-type names out of a SIP message body.
//!
//! Grounded on `original_source/src/storage/packet/packet_sdp.c`. The
//! resulting [`SdpData`] is what storage (C10) turns into prospective RTP/
//! RTCP streams for a call.

use std::net::IpAddr;

use bytes::Bytes;

use super::{DissectResult, Dissector};
use crate::packet::{Packet, ProtoData, ProtocolId};

#[derive(Debug, Clone)]
pub struct SdpMedia {
    pub media_type: String,
    pub port: u16,
    pub protocol: String,
    pub formats: Vec<u8>,
    pub rtpmap: Vec<(u8, String)>,
}

#[derive(Debug, Clone, Default)]
pub struct SdpData {
    pub session_connection: Option<IpAddr>,
    pub media: Vec<SdpMedia>,
}

pub struct SdpDissector;

impl SdpDissector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SdpDissector {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_connection(line: &str) -> Option<IpAddr> {
    // "c=IN IP4 192.0.2.1" / "c=IN IP6 2001:db8::1"
    let mut parts = line.split_whitespace();
    let _nettype = parts.next()?;
    let _addrtype = parts.next()?;
    parts.next()?.parse().ok()
}

fn parse_media(line: &str) -> Option<(String, u16, String, Vec<u8>)> {
    // "m=audio 49170 RTP/AVP 0 8 101"
    let mut parts = line.split_whitespace();
    let media_type = parts.next()?.to_string();
    let port: u16 = parts.next()?.parse().ok()?;
    let protocol = parts.next()?.to_string();
    let formats = parts.filter_map(|p| p.parse().ok()).collect();
    Some((media_type, port, protocol, formats))
}

fn parse_rtpmap(line: &str) -> Option<(u8, String)> {
    // "a=rtpmap:0 PCMU/8000"
    let rest = line.strip_prefix("a=rtpmap:")?;
    let (pt, name) = rest.split_once(' ')?;
    Some((pt.trim().parse().ok()?, name.trim().to_string()))
}

impl Dissector for SdpDissector {
    fn id(&self) -> ProtocolId {
        ProtocolId::Sdp
    }

    fn dissect(&self, packet: &Packet, payload: Bytes) -> DissectResult {
        let Ok(text) = std::str::from_utf8(&payload) else {
            return DissectResult::NotMine(payload);
        };

        let mut data = SdpData::default();
        let mut current_media: Option<SdpMedia> = None;

        for raw_line in text.lines() {
            let line = raw_line.trim_end_matches('\r');
            if let Some(c) = line.strip_prefix("c=") {
                if let Some(addr) = parse_connection(c) {
                    if data.session_connection.is_none() {
                        data.session_connection = Some(addr);
                    }
                }
            } else if let Some(m) = line.strip_prefix("m=") {
                if let Some(media) = current_media.take() {
                    data.media.push(media);
                }
                if let Some((media_type, port, protocol, formats)) = parse_media(m) {
                    current_media = Some(SdpMedia {
                        media_type,
                        port,
                        protocol,
                        formats,
                        rtpmap: Vec::new(),
                    });
                }
            } else if line.starts_with("a=rtpmap:") {
                if let (Some(media), Some(entry)) = (current_media.as_mut(), parse_rtpmap(line)) {
                    media.rtpmap.push(entry);
                }
            }
        }
        if let Some(media) = current_media.take() {
            data.media.push(media);
        }

        packet.set_protocol_data(ProtocolId::Sdp, ProtoData::Sdp(data));
        DissectResult::Done
    }
}
