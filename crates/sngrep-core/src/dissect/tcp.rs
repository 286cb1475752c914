//! TCP dissector (C5): header parsing and byte-stream reassembly.
//!
//! Grounded on `original_source/src/storage/packet/packet_tcp.c`: segments
//! for a 4-tuple are buffered by sequence number until a contiguous prefix
//! can be handed to the SIP dissector; an unproductive stream is dropped by
//! a periodic GC sweep rather than held forever.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use bytes::Bytes;

use super::sip::{probe, SipProbe};
use super::{DissectResult, Dissector};
use crate::config::CaptureConfig;
use crate::packet::{Packet, ProtoData, ProtocolId};

#[derive(Debug, Clone, Copy)]
pub struct TcpData {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub fin: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct StreamKey {
    src: IpAddr,
    dst: IpAddr,
    src_port: u16,
    dst_port: u16,
}

impl StreamKey {
    fn reversed(&self) -> StreamKey {
        StreamKey {
            src: self.dst,
            dst: self.src,
            src_port: self.dst_port,
            dst_port: self.src_port,
        }
    }
}

struct Segment {
    seq: u32,
    data: Vec<u8>,
    contributor: Packet,
}

struct Stream {
    segments: Vec<Segment>,
    next_seq: Option<u32>,
    last_progress_tick: u64,
}

/// TCP header parsing and in-order byte-stream reassembly, keyed per
/// direction by the 4-tuple.
///
/// `max_age` is a count of frame ticks, not wall-clock time: a stream
/// unprogressed for `TCP_MAX_AGE` frame ticks is dropped. Each call to
/// [`TcpDissector::dissect`] advances a shared tick counter, and a stream's
/// age is measured against the tick it last made progress on.
pub struct TcpDissector {
    max_segments: usize,
    max_age: u64,
    ticks: AtomicU64,
    table: Mutex<HashMap<StreamKey, Stream>>,
}

impl TcpDissector {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            max_segments: config.tcp_max_segments,
            max_age: config.tcp_max_age,
            ticks: AtomicU64::new(0),
            table: Mutex::new(HashMap::new()),
        }
    }

    fn gc(&self, table: &mut HashMap<StreamKey, Stream>, current_tick: u64) {
        let max_age = self.max_age;
        table.retain(|_, stream| current_tick.saturating_sub(stream.last_progress_tick) <= max_age);
    }

    /// Drop every buffered stream's reassembly state. Used by
    /// [`crate::CaptureEngine::clear_all`] so no stream segment outlives a
    /// storage-level `clear_all()`.
    pub fn clear_reassembly(&self) {
        self.table.lock().unwrap().clear();
    }
}

impl Dissector for TcpDissector {
    fn id(&self) -> ProtocolId {
        ProtocolId::Tcp
    }

    fn subdissectors(&self) -> &[ProtocolId] {
        &[ProtocolId::Sip, ProtocolId::Tls]
    }

    fn dissect(&self, packet: &Packet, payload: Bytes) -> DissectResult {
        let Some(ProtoData::Ip(ip)) = packet.protocol_data(ProtocolId::Ip) else {
            return DissectResult::NotMine(payload);
        };
        if !ip.is_tcp() {
            return DissectResult::NotMine(payload);
        }
        if payload.len() < 20 {
            tracing::debug!("tcp header truncated, dropping");
            return DissectResult::Done;
        }
        let src_port = u16::from_be_bytes([payload[0], payload[1]]);
        let dst_port = u16::from_be_bytes([payload[2], payload[3]]);
        let seq = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
        let data_offset = ((payload[12] >> 4) as usize) * 4;
        let fin = payload[13] & 0x01 != 0;
        if data_offset < 20 || payload.len() < data_offset {
            tracing::debug!("tcp data offset out of range, dropping");
            return DissectResult::Done;
        }
        packet.set_protocol_data(
            ProtocolId::Tcp,
            ProtoData::Tcp(TcpData {
                src_port,
                dst_port,
                seq,
                fin,
            }),
        );

        let body = payload.slice(data_offset..);
        if body.is_empty() {
            return DissectResult::Done;
        }

        let key = StreamKey {
            src: ip.src,
            dst: ip.dst,
            src_port,
            dst_port,
        };
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        let mut table = self.table.lock().unwrap();
        self.gc(&mut table, tick);

        let stream = table.entry(key).or_insert_with(|| Stream {
            segments: Vec::new(),
            next_seq: Some(seq),
            last_progress_tick: tick,
        });
        stream.last_progress_tick = tick;
        stream.segments.push(Segment {
            seq,
            data: body.to_vec(),
            contributor: packet.clone(),
        });

        if stream.segments.len() > self.max_segments {
            tracing::debug!(
                port = dst_port,
                "tcp stream exceeded max segments, dropping buffered data"
            );
            table.remove(&key);
            return DissectResult::Done;
        }

        stream.segments.sort_by_key(|s| s.seq);
        let mut contiguous = Vec::new();
        let mut next_seq = stream.next_seq.unwrap_or(seq);
        let mut consumed = 0usize;
        for segment in &stream.segments {
            if segment.seq == next_seq {
                contiguous.extend_from_slice(&segment.data);
                next_seq = next_seq.wrapping_add(segment.data.len() as u32);
                consumed += 1;
            } else if segment.seq.wrapping_sub(next_seq) < u32::MAX / 2 {
                break;
            }
        }

        if contiguous.is_empty() {
            return DissectResult::Done;
        }

        // Don't hand a SIP message to its sub-dissector until `Content-Length`
        // is fully satisfied: a partial body over TCP must keep the segments
        // buffered rather than being parsed as a (wrongly) short message.
        let ready_len = match probe(&contiguous) {
            SipProbe::Incomplete => return DissectResult::Done,
            SipProbe::Complete(n) if n > contiguous.len() => return DissectResult::Done,
            SipProbe::Complete(n) => n,
            SipProbe::NotSip => contiguous.len(),
        };

        let contributors: Vec<Packet> = stream
            .segments
            .drain(0..consumed)
            .map(|s| s.contributor)
            .collect();
        stream.next_seq = Some(next_seq);
        drop(table);

        let reversed_key = key.reversed();
        let _ = reversed_key; // direction is implicit via key; reserved for future bidirectional merge.

        for contributor in &contributors {
            if !contributor.is_same(packet) {
                packet.absorb_frames_from(contributor);
            }
        }

        contiguous.truncate(ready_len);
        DissectResult::Continue(Bytes::from(contiguous))
    }
}
