//! Timestamp primitives (C1), all in microseconds to match capture frame
//! resolution.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time, microseconds since the Unix epoch. Used to
/// stamp frames from live/HEP sources that carry no capture timestamp of
/// their own (a pcap file's records always do).
pub fn now_usec() -> u64 {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    elapsed.as_micros() as u64
}

/// Combine capture-format seconds/microseconds fields (as carried by pcap
/// records and HEP timestamp chunks) into a single microsecond timestamp.
pub const fn from_sec_usec(sec: u32, usec: u32) -> u64 {
    (sec as u64) * 1_000_000 + usec as u64
}

/// Split a microsecond timestamp back into seconds/microseconds, e.g. for
/// re-emission into a pcap frame header.
pub const fn to_sec_usec(ts: u64) -> (u32, u32) {
    ((ts / 1_000_000) as u32, (ts % 1_000_000) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let ts = from_sec_usec(1_700_000_000, 123_456);
        assert_eq!(to_sec_usec(ts), (1_700_000_000, 123_456));
    }
}
