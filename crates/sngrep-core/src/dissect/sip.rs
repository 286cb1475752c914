//! SIP dissector (C6): request/status line and header parsing.
//!
//! Grounded on `original_source/src/sip.h` and
//! `original_source/src/storage/packet/packet_sip.c`. Framing for UDP is the
//! datagram itself; for TCP/TLS, `Content-Length` bounds the body, falling
//! back to "no body" when the header is absent (§9 open question).

use bytes::Bytes;

use super::{DissectResult, Dissector};
use crate::config::CaptureConfig;
use crate::packet::{Packet, ProtoData, ProtocolId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SipMethod {
    Invite,
    Ack,
    Bye,
    Cancel,
    Register,
    Options,
    Info,
    Subscribe,
    Notify,
    Refer,
    Message,
    Update,
    Prack,
    Publish,
}

impl SipMethod {
    fn parse(token: &str) -> Option<SipMethod> {
        Some(match token {
            "INVITE" => SipMethod::Invite,
            "ACK" => SipMethod::Ack,
            "BYE" => SipMethod::Bye,
            "CANCEL" => SipMethod::Cancel,
            "REGISTER" => SipMethod::Register,
            "OPTIONS" => SipMethod::Options,
            "INFO" => SipMethod::Info,
            "SUBSCRIBE" => SipMethod::Subscribe,
            "NOTIFY" => SipMethod::Notify,
            "REFER" => SipMethod::Refer,
            "MESSAGE" => SipMethod::Message,
            "UPDATE" => SipMethod::Update,
            "PRACK" => SipMethod::Prack,
            "PUBLISH" => SipMethod::Publish,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            SipMethod::Invite => "INVITE",
            SipMethod::Ack => "ACK",
            SipMethod::Bye => "BYE",
            SipMethod::Cancel => "CANCEL",
            SipMethod::Register => "REGISTER",
            SipMethod::Options => "OPTIONS",
            SipMethod::Info => "INFO",
            SipMethod::Subscribe => "SUBSCRIBE",
            SipMethod::Notify => "NOTIFY",
            SipMethod::Refer => "REFER",
            SipMethod::Message => "MESSAGE",
            SipMethod::Update => "UPDATE",
            SipMethod::Prack => "PRACK",
            SipMethod::Publish => "PUBLISH",
        }
    }
}

/// Parsed SIP request/response line and the headers relevant to call
/// correlation (C10) and stream prospecting (C8/SDP).
#[derive(Debug, Clone)]
pub struct SipData {
    pub is_request: bool,
    pub method: Option<SipMethod>,
    pub status_code: Option<u16>,
    pub call_id: String,
    pub from_tag: Option<String>,
    pub to_tag: Option<String>,
    pub cseq: Option<u32>,
    pub cseq_method: Option<String>,
    pub via_branch: Option<String>,
    pub x_call_id: Option<String>,
    pub content_type: Option<String>,
    pub body_offset: usize,
    pub body_len: usize,
    /// The full message (headers + body) exactly as received, for the
    /// filter engine's raw-payload predicate and for byte-identical
    /// retransmission comparison.
    pub raw: Bytes,
}

fn header_value(tag: &str) -> Option<(&'static str, &'static str)> {
    let (long, short) = match tag {
        "call-id" => ("Call-ID", "i"),
        "from" => ("From", "f"),
        "to" => ("To", "t"),
        "via" => ("Via", "v"),
        "cseq" => ("CSeq", "CSeq"),
        "content-type" => ("Content-Type", "c"),
        "content-length" => ("Content-Length", "l"),
        _ => return None,
    };
    Some((long, short))
}

fn extract_param(value: &str, param: &str) -> Option<String> {
    value.split(';').skip(1).find_map(|seg| {
        let seg = seg.trim();
        let (k, v) = seg.split_once('=')?;
        (k.trim().eq_ignore_ascii_case(param)).then(|| v.trim().to_string())
    })
}

struct Headers<'a> {
    by_name: Vec<(String, &'a str)>,
}

impl<'a> Headers<'a> {
    fn get(&self, tag: &str) -> Option<&'a str> {
        let (long, short) = header_value(tag)?;
        self.by_name
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(long) || name.eq_ignore_ascii_case(short))
            .map(|(_, v)| *v)
    }

    fn get_raw(&self, name: &str) -> Option<&'a str> {
        self.by_name
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| *v)
    }
}

fn parse_headers(text: &str) -> (Headers<'_>, usize) {
    let mut by_name = Vec::new();
    let mut offset = 0usize;
    for line in text.split_inclusive("\r\n") {
        let trimmed = line.trim_end_matches("\r\n");
        offset += line.len();
        if trimmed.is_empty() {
            break;
        }
        if let Some((name, value)) = trimmed.split_once(':') {
            by_name.push((name.trim().to_string(), value.trim()));
        }
    }
    (Headers { by_name }, offset)
}

pub struct SipDissector;

impl SipDissector {
    pub fn new(_config: &CaptureConfig) -> Self {
        Self
    }
}

/// Outcome of probing a byte-stream prefix for a complete SIP message,
/// without committing to a parse. Used by the TCP dissector (§4.4) to
/// decide whether to keep buffering rather than hand off a partial body.
pub(crate) enum SipProbe {
    /// Not enough bytes yet to even find the end of the header block.
    Incomplete,
    /// The header block is complete but doesn't look like a SIP
    /// request/status line at all.
    NotSip,
    /// Header block plus `Content-Length`-declared body ends at this many
    /// bytes into `payload`.
    Complete(usize),
}

/// Check whether `payload` holds a complete SIP message (request/status
/// line, headers, and `Content-Length` bytes of body) without attaching
/// anything to a packet.
pub(crate) fn probe(payload: &[u8]) -> SipProbe {
    let Ok(text) = std::str::from_utf8(payload) else {
        return SipProbe::NotSip;
    };
    let Some(line_end) = text.find("\r\n").or_else(|| text.find('\n')) else {
        return SipProbe::Incomplete;
    };
    let first_line = &text[..line_end];
    if !first_line.starts_with("SIP/2.0 ") {
        let Some(method_token) = first_line.split_whitespace().next() else {
            return SipProbe::Incomplete;
        };
        if SipMethod::parse(method_token).is_none() {
            return SipProbe::NotSip;
        }
    }

    let header_start = line_end + if text[line_end..].starts_with("\r\n") { 2 } else { 1 };
    let Some(terminator) = text[header_start..]
        .find("\r\n\r\n")
        .map(|p| p + 4)
        .or_else(|| text[header_start..].find("\n\n").map(|p| p + 2))
    else {
        return SipProbe::Incomplete;
    };
    let header_end = header_start + terminator;

    let content_length = text[header_start..header_end]
        .split("\r\n")
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            let name = name.trim();
            (name.eq_ignore_ascii_case("Content-Length") || name.eq_ignore_ascii_case("l"))
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);

    SipProbe::Complete(header_end + content_length)
}

impl Dissector for SipDissector {
    fn id(&self) -> ProtocolId {
        ProtocolId::Sip
    }

    fn subdissectors(&self) -> &[ProtocolId] {
        &[ProtocolId::Sdp]
    }

    fn dissect(&self, packet: &Packet, payload: Bytes) -> DissectResult {
        let Ok(text) = std::str::from_utf8(&payload) else {
            return DissectResult::NotMine(payload);
        };
        let Some(line_end) = text.find("\r\n").or_else(|| text.find('\n')) else {
            return DissectResult::NotMine(payload);
        };
        let first_line = &text[..line_end];

        let (is_request, method, status_code) = if let Some(rest) = first_line.strip_prefix("SIP/2.0 ") {
            let code = rest
                .split_whitespace()
                .next()
                .and_then(|c| c.parse::<u16>().ok());
            (false, None, code)
        } else {
            let mut parts = first_line.split_whitespace();
            let Some(method_token) = parts.next() else {
                return DissectResult::NotMine(payload);
            };
            let Some(method) = SipMethod::parse(method_token) else {
                return DissectResult::NotMine(payload);
            };
            if parts.clone().count() < 2 {
                return DissectResult::NotMine(payload);
            }
            (true, Some(method), None)
        };

        let rest = &text[line_end + if text[line_end..].starts_with("\r\n") { 2 } else { 1 }..];
        let (headers, header_block_len) = parse_headers(rest);

        let Some(call_id) = headers.get("call-id") else {
            return DissectResult::NotMine(payload);
        };
        let call_id = call_id.to_string();

        let from_tag = headers.get("from").and_then(|v| extract_param(v, "tag"));
        let to_tag = headers.get("to").and_then(|v| extract_param(v, "tag"));
        let via_branch = headers.get("via").and_then(|v| extract_param(v, "branch"));
        let x_call_id = headers
            .get_raw("X-Call-ID")
            .or_else(|| headers.get_raw("X-CID"))
            .map(|v| v.to_string());
        let content_type = headers.get("content-type").map(|v| v.to_string());

        let (cseq, cseq_method) = headers
            .get("cseq")
            .and_then(|v| {
                let mut parts = v.split_whitespace();
                let num = parts.next()?.parse::<u32>().ok()?;
                let method = parts.next()?.to_string();
                Some((Some(num), Some(method)))
            })
            .unwrap_or((None, None));

        let header_end = line_end
            + if text[line_end..].starts_with("\r\n") { 2 } else { 1 }
            + header_block_len;

        let declared_len: Option<usize> = headers.get("content-length").and_then(|v| v.trim().parse().ok());
        let available = payload.len().saturating_sub(header_end);
        let body_len = declared_len.unwrap_or(0);
        if body_len > available {
            // Fewer bytes than `Content-Length` promised: buffer more
            // rather than hand back a silently truncated message.
            return DissectResult::NotMine(payload);
        }
        let raw = payload.slice(0..header_end + body_len);

        packet.set_protocol_data(
            ProtocolId::Sip,
            ProtoData::Sip(SipData {
                is_request,
                method,
                status_code,
                call_id,
                from_tag,
                to_tag,
                cseq,
                cseq_method,
                via_branch,
                x_call_id,
                content_type: content_type.clone(),
                body_offset: header_end,
                body_len,
                raw,
            }),
        );

        if body_len == 0 {
            return DissectResult::Done;
        }

        let is_sdp = content_type
            .as_deref()
            .map(|ct| ct.eq_ignore_ascii_case("application/sdp"))
            .unwrap_or(false);
        if !is_sdp {
            return DissectResult::Done;
        }

        DissectResult::Continue(payload.slice(header_end..header_end + body_len))
    }
}
