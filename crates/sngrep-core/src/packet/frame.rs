//! A single wire-level capture event (C1/C2).

use bytes::Bytes;

/// One captured frame: a pcap record, a live-capture read, or the
/// reconstructed payload of an HEP-encapsulated packet.
///
/// A [`crate::Packet`] holds one frame ordinarily, and more than one after
/// IP fragment or TCP segment reassembly merges several frames' worth of
/// wire bytes into a single logical packet.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Capture timestamp, microseconds since the Unix epoch.
    pub timestamp_usec: u64,
    /// On-wire length of the frame.
    pub len: u32,
    /// Captured length (may be less than `len` if the capture snaplen
    /// truncated it).
    pub caplen: u32,
    /// Raw frame bytes, `caplen` long.
    pub bytes: Bytes,
}

impl Frame {
    /// Build a frame from owned bytes, deriving `len`/`caplen` from the
    /// buffer itself (the common case: nothing was truncated).
    pub fn new(timestamp_usec: u64, bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        let len = bytes.len() as u32;
        Self {
            timestamp_usec,
            len,
            caplen: len,
            bytes,
        }
    }

    /// Build a frame where the on-wire length differs from what was
    /// actually captured (snaplen truncation).
    pub fn with_caplen(timestamp_usec: u64, len: u32, bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        let caplen = bytes.len() as u32;
        Self {
            timestamp_usec,
            len,
            caplen,
            bytes,
        }
    }
}
