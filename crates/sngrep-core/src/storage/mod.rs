//! Storage (C10): the call index, stream registry, eviction and
//! cross-linking bookkeeping.
//!
//! Grounded on `original_source/src/sip.h` (`call_add_message`,
//! `call_find_by_callid`, `call_find_by_xcallid`). All mutating operations
//! go through a single writer lock (§5); readers take a snapshot.

pub mod attributes;
pub mod filter;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::address::Address;
use crate::config::CaptureConfig;
use crate::dissect::rtcp::RtcpData;
use crate::dissect::rtp::RtpData;
use crate::dissect::sdp::SdpData;
use crate::dissect::sip::{SipData, SipMethod};
use crate::packet::{Packet, ProtoData, ProtocolId};

/// Interned call identifier (the `Call-ID` header value).
pub type CallId = Arc<str>;

/// One SIP message belonging to a call.
#[derive(Clone)]
pub struct Message {
    pub packet: Packet,
    pub is_request: bool,
    pub method: Option<SipMethod>,
    pub status_code: Option<u16>,
    pub cseq: Option<u32>,
    pub cseq_method: Option<String>,
    pub time: u64,
    pub src: Address,
    pub dst: Address,
    pub retransmission: bool,
}

/// Coarse call state, derived from the method/status sequence seen so far
/// (spec §4.10 `state` attribute).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Calling,
    Proceeding,
    InCall,
    Completed,
    Canceled,
    Rejected,
    Unknown,
}

/// A known or prospective RTP/RTCP media stream (spec §4.7/§4.9).
#[derive(Clone)]
pub struct Stream {
    pub src: Option<Address>,
    pub dst: Address,
    pub media_type: String,
    pub formats: Vec<u8>,
    pub rtpmap: Vec<(u8, String)>,
    pub ssrc: Option<u32>,
    pub confirmed: bool,
    pub packet_count: usize,
    pub last_time: u64,
    /// Contributing packets, time-ascending.
    pub packets: Vec<Packet>,
}

impl Stream {
    fn matches_dst(&self, dst: &Address) -> bool {
        self.dst == *dst
    }

    fn matches_pair(&self, src: &Address, dst: &Address) -> bool {
        self.confirmed
            && self.src.as_ref() == Some(src)
            && self.matches_dst(dst)
    }
}

/// A correlated SIP dialog: messages, media streams, and cross-links to
/// other calls via `X-Call-ID`.
#[derive(Clone)]
pub struct Call {
    pub id: CallId,
    pub messages: Vec<Message>,
    pub streams: Vec<Stream>,
    pub xcalls: Vec<CallId>,
    pub first_time: u64,
    pub last_time: u64,
}

impl Call {
    fn new(id: CallId) -> Self {
        Self {
            id,
            messages: Vec::new(),
            streams: Vec::new(),
            xcalls: Vec::new(),
            first_time: 0,
            last_time: 0,
        }
    }

    /// Number of messages counted toward display, honoring
    /// `show_retransmissions`.
    pub fn displayed_message_count(&self, show_retransmissions: bool) -> usize {
        if show_retransmissions {
            self.messages.len()
        } else {
            self.messages.iter().filter(|m| !m.retransmission).count()
        }
    }

    pub fn starting_method(&self) -> Option<SipMethod> {
        self.messages.iter().find_map(|m| m.method)
    }

    /// Derive call state from the method/status sequence (spec §4.10).
    pub fn state(&self) -> CallState {
        let mut state = CallState::Unknown;
        for message in &self.messages {
            if message.retransmission {
                continue;
            }
            if message.is_request {
                match message.method {
                    Some(SipMethod::Invite) => state = CallState::Calling,
                    Some(SipMethod::Cancel) => state = CallState::Canceled,
                    Some(SipMethod::Bye) => state = CallState::Completed,
                    _ => {}
                }
            } else if let Some(code) = message.status_code {
                match code {
                    100..=199 => {
                        if state == CallState::Calling {
                            state = CallState::Proceeding;
                        }
                    }
                    200..=299 => {
                        if state == CallState::Calling || state == CallState::Proceeding {
                            state = CallState::InCall;
                        }
                    }
                    400..=699 => state = CallState::Rejected,
                    _ => {}
                }
            }
        }
        state
    }

    /// Duration from first to last message, in microseconds.
    pub fn duration_usec(&self) -> u64 {
        self.last_time.saturating_sub(self.first_time)
    }

    fn estimated_bytes(&self) -> u64 {
        let message_bytes: u64 = self
            .messages
            .iter()
            .flat_map(|m| m.packet.frames())
            .map(|f| f.bytes.len() as u64 + 64)
            .sum();
        let stream_bytes: u64 = self.streams.len() as u64 * 128;
        message_bytes + stream_bytes
    }
}

/// Notifications storage emits after a mutation (spec §4.9 "notifies
/// observers").
#[derive(Debug, Clone)]
pub enum StorageEvent {
    CallAdded(CallId),
    CallUpdated(CallId),
    CallEvicted(CallId),
    StatsChanged,
}

/// Aggregate counters for the memory cap and diagnostics.
#[derive(Debug, Clone, Copy, Default)]
pub struct StorageStats {
    pub call_count: usize,
    pub message_count: usize,
    pub estimated_bytes: u64,
    pub dropped_orphan_media: u64,
}

type Observer = Box<dyn Fn(StorageEvent) + Send + Sync>;

struct Inner {
    calls: HashMap<CallId, Call>,
    estimated_bytes: u64,
    dropped_orphan_media: u64,
}

/// The central object graph (C10). All mutating methods take the single
/// internal writer lock; the capture pipeline is expected to be the only
/// caller of those, from its one writer thread (spec §5).
pub struct Storage {
    config: CaptureConfig,
    inner: RwLock<Inner>,
    observers: RwLock<Vec<Observer>>,
}

impl Storage {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(Inner {
                calls: HashMap::new(),
                estimated_bytes: 0,
                dropped_orphan_media: 0,
            }),
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, observer: impl Fn(StorageEvent) + Send + Sync + 'static) {
        self.observers.write().unwrap().push(Box::new(observer));
    }

    fn notify(&self, event: StorageEvent) {
        for observer in self.observers.read().unwrap().iter() {
            observer(event.clone());
        }
    }

    /// Ingest a dissected SIP packet: create or update the owning call,
    /// detect retransmissions, cross-link `X-Call-ID`, and register any
    /// prospective streams an SDP body carried.
    pub fn ingest_sip(&self, packet: &Packet) {
        let Some(ProtoData::Sip(sip)) = packet.protocol_data(ProtocolId::Sip) else {
            return;
        };
        let (src, dst) = addresses_of(packet);
        let time = packet.time();

        let retransmission = self.detect_retransmission(&sip, &src, &dst, time);

        let call_id: CallId = Arc::from(sip.call_id.as_str());
        let is_new;
        {
            let mut inner = self.inner.write().unwrap();
            is_new = !inner.calls.contains_key(&call_id);
            let call = inner
                .calls
                .entry(call_id.clone())
                .or_insert_with(|| Call::new(call_id.clone()));
            if call.messages.is_empty() {
                call.first_time = time;
            }
            call.last_time = time;
            call.messages.push(Message {
                packet: packet.clone(),
                is_request: sip.is_request,
                method: sip.method,
                status_code: sip.status_code,
                cseq: sip.cseq,
                cseq_method: sip.cseq_method.clone(),
                time,
                src,
                dst,
                retransmission,
            });

            if let Some(ProtoData::Sdp(sdp)) = packet.protocol_data(ProtocolId::Sdp) {
                register_prospective_streams(call, &sdp, time);
            }

            if let Some(xcid) = &sip.x_call_id {
                let xcid: CallId = Arc::from(xcid.as_str());
                if let Some(this_call) = inner.calls.get_mut(&call_id) {
                    if !this_call.xcalls.contains(&xcid) {
                        this_call.xcalls.push(xcid.clone());
                    }
                }
                if let Some(other) = inner.calls.get_mut(&xcid) {
                    if !other.xcalls.contains(&call_id) {
                        other.xcalls.push(call_id.clone());
                    }
                }
            }

            inner.estimated_bytes = inner.calls.values().map(Call::estimated_bytes).sum();
        }

        self.evict_if_needed();
        self.notify(if is_new {
            StorageEvent::CallAdded(call_id)
        } else {
            StorageEvent::CallUpdated(call_id)
        });
        self.notify(StorageEvent::StatsChanged);
    }

    /// Ingest a dissected RTP packet: bind it to a known or prospective
    /// stream, or drop it per `media_only_for_known_calls`.
    pub fn ingest_rtp(&self, packet: &Packet) {
        let Some(ProtoData::Rtp(rtp)) = packet.protocol_data(ProtocolId::Rtp) else {
            return;
        };
        self.ingest_media(packet, rtp.ssrc, None);
    }

    /// Ingest a dissected RTCP packet: same binding rule as RTP.
    pub fn ingest_rtcp(&self, packet: &Packet) {
        let Some(ProtoData::Rtcp(rtcp)) = packet.protocol_data(ProtocolId::Rtcp) else {
            return;
        };
        self.ingest_media(packet, rtcp.ssrc, Some(&rtcp));
    }

    fn ingest_media(&self, packet: &Packet, ssrc: u32, _rtcp: Option<&RtcpData>) {
        let (src, dst) = addresses_of(packet);
        let time = packet.time();
        let mut inner = self.inner.write().unwrap();

        for call in inner.calls.values_mut() {
            for stream in &mut call.streams {
                if stream.matches_pair(&src, &dst) || (stream.confirmed && stream.dst == src) {
                    bind_stream(stream, packet, &src, ssrc, time);
                    call.last_time = call.last_time.max(time);
                    return;
                }
            }
            for stream in &mut call.streams {
                if !stream.confirmed && stream.matches_dst(&dst) {
                    stream.src = Some(src.clone());
                    bind_stream(stream, packet, &src, ssrc, time);
                    call.last_time = call.last_time.max(time);
                    return;
                }
            }
        }

        if self.config.media_only_for_known_calls {
            inner.dropped_orphan_media += 1;
            tracing::debug!(ssrc, "no known call for media packet, dropping");
            return;
        }

        let orphan_id: CallId = Arc::from(format!("rtp-only:{src}-{dst}"));
        let call = inner
            .calls
            .entry(orphan_id.clone())
            .or_insert_with(|| Call::new(orphan_id));
        if call.streams.is_empty() {
            call.first_time = time;
        }
        call.last_time = time;
        let stream = call.streams.iter_mut().find(|s| s.matches_dst(&dst));
        match stream {
            Some(stream) => bind_stream(stream, packet, &src, ssrc, time),
            None => call.streams.push(Stream {
                src: Some(src),
                dst,
                media_type: "unknown".to_string(),
                formats: Vec::new(),
                rtpmap: Vec::new(),
                ssrc: Some(ssrc),
                confirmed: true,
                packet_count: 1,
                last_time: time,
                packets: vec![packet.clone()],
            }),
        }
    }

    fn detect_retransmission(
        &self,
        sip: &SipData,
        src: &Address,
        dst: &Address,
        time: u64,
    ) -> bool {
        let Ok(calls) = self.inner.read() else {
            return false;
        };
        let Some(call) = calls.calls.get(sip.call_id.as_str()) else {
            return false;
        };
        let window = self.config.retransmission_window.as_micros() as u64;
        call.messages.iter().rev().take(20).any(|m| {
            m.cseq == sip.cseq
                && m.cseq_method == sip.cseq_method
                && m.src == *src
                && m.dst == *dst
                && time.saturating_sub(m.time) <= window
                && matches_body(m, sip)
        })
    }

    fn evict_if_needed(&self) {
        loop {
            let victim = {
                let inner = self.inner.read().unwrap();
                let over_count = inner.calls.len() > self.config.max_dialogs;
                let over_memory = inner.estimated_bytes > self.config.memory_limit;
                if !over_count && !over_memory {
                    break;
                }
                inner
                    .calls
                    .values()
                    .min_by_key(|c| c.last_time)
                    .map(|c| c.id.clone())
            };
            let Some(id) = victim else { break };
            {
                let mut inner = self.inner.write().unwrap();
                inner.calls.remove(&id);
                inner.estimated_bytes = inner.calls.values().map(Call::estimated_bytes).sum();
            }
            self.notify(StorageEvent::CallEvicted(id));
        }
    }

    /// Snapshot of all retained calls, for iteration by callers (UI/export).
    pub fn snapshot(&self) -> Vec<Call> {
        self.inner.read().unwrap().calls.values().cloned().collect()
    }

    pub fn call(&self, call_id: &str) -> Option<Call> {
        self.inner.read().unwrap().calls.get(call_id).cloned()
    }

    pub fn stats(&self) -> StorageStats {
        let inner = self.inner.read().unwrap();
        StorageStats {
            call_count: inner.calls.len(),
            message_count: inner.calls.values().map(|c| c.messages.len()).sum(),
            estimated_bytes: inner.estimated_bytes,
            dropped_orphan_media: inner.dropped_orphan_media,
        }
    }

    /// Drop every retained call.
    pub fn clear_all(&self) {
        let mut inner = self.inner.write().unwrap();
        inner.calls.clear();
        inner.estimated_bytes = 0;
        drop(inner);
        self.notify(StorageEvent::StatsChanged);
    }

    /// Drop calls whose id is not in `displayed` (spec `clear_soft`).
    pub fn clear_soft(&self, displayed: &std::collections::HashSet<CallId>) {
        let mut inner = self.inner.write().unwrap();
        inner.calls.retain(|id, _| displayed.contains(id));
        inner.estimated_bytes = inner.calls.values().map(Call::estimated_bytes).sum();
        drop(inner);
        self.notify(StorageEvent::StatsChanged);
    }
}

fn bind_stream(stream: &mut Stream, packet: &Packet, src: &Address, ssrc: u32, time: u64) {
    stream.src = Some(src.clone());
    stream.ssrc = Some(ssrc);
    stream.confirmed = true;
    stream.packet_count += 1;
    stream.last_time = time;
    stream.packets.push(packet.clone());
}

fn matches_body(message: &Message, sip: &SipData) -> bool {
    let Some(ProtoData::Sip(other)) = message.packet.protocol_data(ProtocolId::Sip) else {
        return false;
    };
    other.raw == sip.raw
}

fn register_prospective_streams(call: &mut Call, sdp: &SdpData, time: u64) {
    let Some(connection) = sdp.session_connection else {
        return;
    };
    for media in &sdp.media {
        let dst = Address::new(connection.to_string(), media.port);
        let existing = call.streams.iter_mut().find(|s| s.dst == dst && !s.confirmed);
        match existing {
            Some(stream) => {
                stream.media_type = media.media_type.clone();
                stream.formats = media.formats.clone();
                stream.rtpmap = media.rtpmap.clone();
                stream.last_time = time;
            }
            None => call.streams.push(Stream {
                src: None,
                dst,
                media_type: media.media_type.clone(),
                formats: media.formats.clone(),
                rtpmap: media.rtpmap.clone(),
                ssrc: None,
                confirmed: false,
                packet_count: 0,
                last_time: time,
                packets: Vec::new(),
            }),
        }
    }
}

fn addresses_of(packet: &Packet) -> (Address, Address) {
    let ports = match packet.protocol_data(ProtocolId::Udp) {
        Some(ProtoData::Udp(udp)) => Some((udp.src_port, udp.dst_port)),
        _ => match packet.protocol_data(ProtocolId::Tcp) {
            Some(ProtoData::Tcp(tcp)) => Some((tcp.src_port, tcp.dst_port)),
            _ => None,
        },
    };
    let (src_port, dst_port) = ports.unwrap_or((0, 0));
    match packet.protocol_data(ProtocolId::Ip) {
        Some(ProtoData::Ip(ip)) => (
            Address::new(ip.src.to_string(), src_port),
            Address::new(ip.dst.to_string(), dst_port),
        ),
        _ => (Address::new(String::new(), src_port), Address::new(String::new(), dst_port)),
    }
}
