//! Classic (non-pcap-ng) PCAP file reader.
//!
//! Grounded on `original_source/src/pcap.c`/`pcap.h` (offline mode) for the
//! read loop, and on the block-parsing idiom of
//! `examples/other_examples/*asayers-pcarp*` for reading fixed headers
//! straight out of a byte slice without a libpcap FFI dependency.

use std::path::{Path, PathBuf};

use tokio::io::{AsyncReadExt, BufReader};

use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::dissect::link::Dlt;
use crate::error::{Error, Result};
use crate::packet::{Frame, ProtocolId};

const MAGIC_MICRO_LE: u32 = 0xa1b2_c3d4;
const MAGIC_NANO_LE: u32 = 0xa1b2_3c4d;

#[derive(FromBytes, Immutable, KnownLayout)]
#[repr(C)]
struct GlobalHeaderLe {
    magic: [u8; 4],
    version_major: [u8; 2],
    version_minor: [u8; 2],
    thiszone: [u8; 4],
    sigfigs: [u8; 4],
    snaplen: [u8; 4],
    network: [u8; 4],
}

#[derive(FromBytes, Immutable, KnownLayout)]
#[repr(C)]
struct RecordHeaderLe {
    ts_sec: [u8; 4],
    ts_usec: [u8; 4],
    incl_len: [u8; 4],
    orig_len: [u8; 4],
}

fn u32_from(bytes: [u8; 4], big_endian: bool) -> u32 {
    if big_endian {
        u32::from_be_bytes(bytes)
    } else {
        u32::from_le_bytes(bytes)
    }
}

/// Offline capture read from a classic pcap file (spec §4.8 "PCAP file").
pub struct PcapFileInput {
    path: PathBuf,
    name: String,
    paused: bool,
    file_len: u64,
    bytes_read: u64,
}

impl PcapFileInput {
    /// Open the file and parse its global header, failing fast if it is
    /// not a recognizable pcap capture (spec §7: input-open failures
    /// propagate, exit code 1).
    pub async fn open(path: impl AsRef<Path>) -> Result<(Self, Dlt)> {
        let path = path.as_ref().to_path_buf();
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| Error::InvalidCaptureFile(format!("{}: {e}", path.display())))?;
        let file_len = file.metadata().await.map(|m| m.len()).unwrap_or(0);
        let mut reader = BufReader::new(file);

        let mut header_bytes = [0u8; 24];
        reader
            .read_exact(&mut header_bytes)
            .await
            .map_err(|_| Error::InvalidCaptureFile(format!("{}: truncated header", path.display())))?;
        let header = GlobalHeaderLe::ref_from_bytes(&header_bytes)
            .map_err(|_| Error::InvalidCaptureFile(format!("{}: malformed header", path.display())))?;
        let magic_le = u32::from_le_bytes(header.magic);
        let big_endian = match magic_le {
            MAGIC_MICRO_LE | MAGIC_NANO_LE => false,
            other if other.swap_bytes() == MAGIC_MICRO_LE || other.swap_bytes() == MAGIC_NANO_LE => true,
            _ => {
                return Err(Error::InvalidCaptureFile(format!(
                    "{}: not a pcap file (bad magic)",
                    path.display()
                )))
            }
        };
        let network = u32_from(header.network, big_endian);
        let dlt = Dlt::from_raw(network);

        let name = path.display().to_string();
        Ok((
            Self {
                path,
                name,
                paused: false,
                file_len,
                bytes_read: 24,
            },
            dlt,
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn loaded_fraction(&self) -> f32 {
        if self.file_len == 0 {
            1.0
        } else {
            (self.bytes_read as f64 / self.file_len as f64).min(1.0) as f32
        }
    }

    pub fn pause(&mut self, paused: bool) {
        self.paused = paused;
    }

    /// Read every frame in sequence, submitting each to `submit`.
    /// Synchronous from the caller's perspective but yields between
    /// records so a pause or shutdown request can interleave (spec §4.8).
    pub async fn run(
        &mut self,
        submit: impl Fn(Frame) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>,
    ) -> Result<()> {
        let file = tokio::fs::File::open(&self.path)
            .await
            .map_err(Error::Io)?;
        let mut reader = BufReader::new(file);
        let mut skip = [0u8; 24];
        reader.read_exact(&mut skip).await.map_err(Error::Io)?;

        let (big_endian, nanosecond) = {
            let header = GlobalHeaderLe::ref_from_bytes(&skip).expect("validated in open()");
            let magic_le = u32::from_le_bytes(header.magic);
            let magic_be = magic_le.swap_bytes();
            if magic_le == MAGIC_MICRO_LE {
                (false, false)
            } else if magic_le == MAGIC_NANO_LE {
                (false, true)
            } else if magic_be == MAGIC_MICRO_LE {
                (true, false)
            } else {
                (true, true)
            }
        };

        loop {
            if self.paused {
                tokio::task::yield_now().await;
                continue;
            }
            let mut record_bytes = [0u8; 16];
            match reader.read_exact(&mut record_bytes).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(Error::Io(e)),
            }
            let record = RecordHeaderLe::ref_from_bytes(&record_bytes)
                .map_err(|_| Error::InvalidCaptureFile("malformed record header".to_string()))?;
            let ts_sec = u32_from(record.ts_sec, big_endian);
            let ts_frac = u32_from(record.ts_usec, big_endian);
            let incl_len = u32_from(record.incl_len, big_endian) as usize;
            let orig_len = u32_from(record.orig_len, big_endian);

            let mut data = vec![0u8; incl_len];
            reader.read_exact(&mut data).await.map_err(Error::Io)?;
            self.bytes_read += 16 + incl_len as u64;

            let usec = if nanosecond { ts_frac / 1000 } else { ts_frac };
            let frame = Frame::with_caplen(
                crate::time::from_sec_usec(ts_sec, usec),
                orig_len,
                data,
            );
            submit(frame).await;
            tokio::task::yield_now().await;
        }
        Ok(())
    }

    pub const ROOT: ProtocolId = ProtocolId::Link;
}
