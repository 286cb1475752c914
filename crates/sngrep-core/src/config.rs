//! Capture core configuration shape (ambient stack — see SPEC_FULL §2.1).
//!
//! The `$SNGREPRC` settings-file parser itself is an external collaborator
//! (out of scope per spec §1); this struct is the typed destination that
//! collaborator would populate, and it is what `CaptureEngine` is
//! constructed from directly when there is no settings file in play.

use std::time::Duration;

/// Tunables named throughout the spec, gathered with their documented
/// defaults.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Maximum number of concurrently retained calls (dialogs). Oldest call
    /// by last-message timestamp is evicted once exceeded.
    pub max_dialogs: usize,
    /// Soft memory cap, in bytes, across all retained frame bytes plus a
    /// per-object overhead estimate. Oldest calls are evicted until under
    /// this cap.
    pub memory_limit: u64,
    /// Window within which a byte-identical message (same 5-tuple, CSeq,
    /// method/status) is treated as a retransmission of an earlier one
    /// rather than a new message.
    pub retransmission_window: Duration,
    /// Whether retransmissions are included in the `displayed` message
    /// count / iteration surface.
    pub show_retransmissions: bool,
    /// IP fragments older than this are discarded by the reassembly GC
    /// without signaling the upper layer.
    pub ip_fragment_max_age: Duration,
    /// A TCP stream with more than this many unconsumed segments is
    /// dropped by the reassembly GC.
    pub tcp_max_segments: usize,
    /// A TCP stream that makes no progress for this many frame ticks is
    /// dropped by the periodic GC sweep.
    pub tcp_max_age: u64,
    /// Period between TCP reassembly GC sweeps.
    pub tcp_gc_interval: Duration,
    /// If set, HEP3 packets must carry a matching auth-key chunk (type 14)
    /// or are dropped silently.
    pub hep_auth_key: Option<String>,
    /// When true, an RTP/RTCP packet matching no known or prospective
    /// stream is dropped rather than attached to a synthetic orphan call.
    pub media_only_for_known_calls: bool,
    /// Capacity of the single-writer capture work queue (§5). When full,
    /// the oldest pending packet from a live source is dropped.
    pub work_queue_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_dialogs: 20_000,
            memory_limit: 256 * 1024 * 1024,
            retransmission_window: Duration::from_millis(500),
            show_retransmissions: true,
            ip_fragment_max_age: Duration::from_secs(30),
            tcp_max_segments: 50,
            tcp_max_age: 1000,
            tcp_gc_interval: Duration::from_secs(10),
            hep_auth_key: None,
            media_only_for_known_calls: false,
            work_queue_capacity: 4096,
        }
    }
}
